//! CPU architecture types and utilities.

use std::fmt;

/// One of the two architectures a universal app is merged from.
///
/// # Examples
///
/// ```
/// use kodegen_bundler_universal::merger::Arch;
///
/// assert_eq!(Arch::Arm64.suffixed("app", Some("asar")), "app-arm64.asar");
/// assert_eq!(Arch::X64.suffixed("app", None), "app-x64");
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// x86_64 - Intel Macs
    X64,
    /// AArch64 - Apple Silicon
    Arm64,
}

impl Arch {
    /// Identifier used in file names and reported by `process.arch`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X64 => "x64",
            Arch::Arm64 => "arm64",
        }
    }

    /// Builds the arch-suffixed sibling name, `<stem>-<arch>[.<extension>]`.
    pub fn suffixed(&self, stem: &str, extension: Option<&str>) -> String {
        match extension {
            Some(ext) => format!("{}-{}.{}", stem, self.as_str(), ext),
            None => format!("{}-{}", stem, self.as_str()),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
