//! Builder for constructing MergeOptions.

use super::MergeOptions;
use crate::merger::{Result, utils::glob::GlobRule};
use std::path::{Path, PathBuf};

/// Builder for constructing [`MergeOptions`].
///
/// Glob rules are compiled as they are set, so an invalid pattern is reported
/// before any bundle is touched.
///
/// # Required
///
/// `x64_app_path`, `arm64_app_path` and `out_app_path`.
#[derive(Default)]
pub struct MergeOptionsBuilder {
    x64_app_path: Option<PathBuf>,
    arm64_app_path: Option<PathBuf>,
    out_app_path: Option<PathBuf>,
    force: bool,
    merge_asars: bool,
    single_arch_files: Option<GlobRule>,
    x64_arch_files: Option<GlobRule>,
    info_plists_to_ignore: Option<GlobRule>,
}

impl MergeOptionsBuilder {
    /// Creates a new options builder.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the x64 input bundle.
    pub fn x64_app_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.x64_app_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the arm64 input bundle.
    pub fn arm64_app_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.arm64_app_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets where the universal bundle is written.
    pub fn out_app_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.out_app_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Overwrite an existing output bundle.
    ///
    /// Default: false
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Merge `app.asar` archives instead of generating an arch-dispatch shim.
    ///
    /// Default: false
    pub fn merge_asars(mut self, merge: bool) -> Self {
        self.merge_asars = merge;
        self
    }

    /// Sets the single-architecture allow-list.
    pub fn single_arch_files(mut self, pattern: &str) -> Result<Self> {
        self.single_arch_files = Some(GlobRule::new(pattern)?);
        Ok(self)
    }

    /// Sets the rule for Mach-O files that are identical in both builds.
    pub fn x64_arch_files(mut self, pattern: &str) -> Result<Self> {
        self.x64_arch_files = Some(GlobRule::new(pattern)?);
        Ok(self)
    }

    /// Sets the rule for Info.plist files that are left without integrity data.
    pub fn info_plists_to_ignore(mut self, pattern: &str) -> Result<Self> {
        self.info_plists_to_ignore = Some(GlobRule::new(pattern)?);
        Ok(self)
    }

    /// Builds the options.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the three bundle paths is missing.
    pub fn build(self) -> Result<MergeOptions> {
        use crate::merger::error::Context;

        Ok(MergeOptions::new(
            self.x64_app_path.context("x64_app_path is required")?,
            self.arm64_app_path.context("arm64_app_path is required")?,
            self.out_app_path.context("out_app_path is required")?,
            self.force,
            self.merge_asars,
            self.single_arch_files,
            self.x64_arch_files,
            self.info_plists_to_ignore,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_paths() {
        let err = MergeOptionsBuilder::new()
            .x64_app_path("/a/x64.app")
            .arm64_app_path("/a/arm64.app")
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("out_app_path is required"));
    }

    #[test]
    fn test_build_defaults() {
        let options = MergeOptionsBuilder::new()
            .x64_app_path("/a/x64.app")
            .arm64_app_path("/a/arm64.app")
            .out_app_path("/a/out.app")
            .build()
            .unwrap();

        assert!(!options.force());
        assert!(!options.merge_asars());
        assert!(options.single_arch_files().is_none());
        assert!(options.x64_arch_files().is_none());
        assert!(options.info_plists_to_ignore().is_none());
    }

    #[test]
    fn test_invalid_glob_rejected() {
        assert!(MergeOptionsBuilder::new().x64_arch_files("[").is_err());
    }
}
