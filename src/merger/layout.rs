//! Well-known locations inside a macOS app bundle.

use std::path::{Path, PathBuf};

/// Extension of packed-resource archives.
pub const ASAR_EXTENSION: &str = "asar";

/// Extension of V8 snapshot files.
pub const SNAPSHOT_EXTENSION: &str = "bin";

/// File name of property lists that receive integrity data.
pub const INFO_PLIST: &str = "Info.plist";

/// Name of the application payload inside `Contents/Resources`.
pub const APP_NAME: &str = "app";

/// Bundle-relative directory holding files that must live outside `app.asar`.
pub const UNPACKED_NATIVE_DIR: &str = "Contents/Resources/app.asar.unpacked";

/// `Contents` of a bundle.
pub fn contents_dir(app: &Path) -> PathBuf {
    app.join("Contents")
}

/// `Contents/Resources` of a bundle.
pub fn resources_dir(app: &Path) -> PathBuf {
    contents_dir(app).join("Resources")
}

/// Loose application folder, `Contents/Resources/app`.
pub fn app_dir(app: &Path) -> PathBuf {
    resources_dir(app).join(APP_NAME)
}

/// Packed application archive, `Contents/Resources/app.asar`.
pub fn app_asar(app: &Path) -> PathBuf {
    resources_dir(app).join(format!("{}.{}", APP_NAME, ASAR_EXTENSION))
}

/// Side directory of an archive, `<archive>.unpacked`.
pub fn unpacked_dir(asar: &Path) -> PathBuf {
    let mut name = asar.as_os_str().to_os_string();
    name.push(".unpacked");
    PathBuf::from(name)
}

/// Whether the bundle ships `app.asar` or a loose `app` folder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum AsarMode {
    /// No archive; resources live in `Contents/Resources/app`.
    NoAsar,
    /// Resources are packed into `Contents/Resources/app.asar`.
    HasAsar,
}

impl AsarMode {
    /// Detects the mode of the bundle at `app`.
    pub async fn detect(app: &Path) -> Self {
        if tokio::fs::try_exists(app_asar(app)).await.unwrap_or(false) {
            Self::HasAsar
        } else {
            Self::NoAsar
        }
    }
}
