//! Immutable configuration for one merge invocation.

use crate::merger::utils::glob::GlobRule;
use std::path::{Path, PathBuf};

/// Options for merging an x64 and an arm64 app bundle.
///
/// Constructed via [`MergeOptionsBuilder`](super::MergeOptionsBuilder). Paths are
/// stored as given; the orchestrator rejects relative paths during validation.
///
/// # Examples
///
/// ```no_run
/// use kodegen_bundler_universal::merger::MergeOptionsBuilder;
///
/// # fn example() -> kodegen_bundler_universal::merger::Result<()> {
/// let options = MergeOptionsBuilder::new()
///     .x64_app_path("/build/x64/MyApp.app")
///     .arm64_app_path("/build/arm64/MyApp.app")
///     .out_app_path("/build/universal/MyApp.app")
///     .merge_asars(true)
///     .single_arch_files("node_modules/some-mac-only/**")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct MergeOptions {
    x64_app_path: PathBuf,
    arm64_app_path: PathBuf,
    out_app_path: PathBuf,

    /// Remove an existing output bundle instead of failing.
    force: bool,

    /// Merge `app.asar` archives instead of shimming between them.
    merge_asars: bool,

    /// Files allowed to exist in only one build.
    ///
    /// Matched against archive entries, and against paths relative to
    /// `Contents/Resources/app.asar.unpacked` during classification.
    single_arch_files: Option<GlobRule>,

    /// Mach-O files allowed to be identical in both builds (already universal
    /// or architecture independent).
    x64_arch_files: Option<GlobRule>,

    /// Info.plist files that must not receive the integrity map.
    info_plists_to_ignore: Option<GlobRule>,
}

impl MergeOptions {
    /// Returns the x64 input bundle path.
    pub fn x64_app_path(&self) -> &Path {
        &self.x64_app_path
    }

    /// Returns the arm64 input bundle path.
    pub fn arm64_app_path(&self) -> &Path {
        &self.arm64_app_path
    }

    /// Returns the output bundle path.
    pub fn out_app_path(&self) -> &Path {
        &self.out_app_path
    }

    /// Whether an existing output bundle is overwritten.
    pub fn force(&self) -> bool {
        self.force
    }

    /// Whether archives are merged rather than shimmed.
    pub fn merge_asars(&self) -> bool {
        self.merge_asars
    }

    /// Returns the single-architecture allow-list.
    pub fn single_arch_files(&self) -> Option<&GlobRule> {
        self.single_arch_files.as_ref()
    }

    /// Returns the already-fused Mach-O allow-list.
    pub fn x64_arch_files(&self) -> Option<&GlobRule> {
        self.x64_arch_files.as_ref()
    }

    /// Returns the integrity-exempt plist rule.
    pub fn info_plists_to_ignore(&self) -> Option<&GlobRule> {
        self.info_plists_to_ignore.as_ref()
    }

    /// Creates new options (used by MergeOptionsBuilder).
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        x64_app_path: PathBuf,
        arm64_app_path: PathBuf,
        out_app_path: PathBuf,
        force: bool,
        merge_asars: bool,
        single_arch_files: Option<GlobRule>,
        x64_arch_files: Option<GlobRule>,
        info_plists_to_ignore: Option<GlobRule>,
    ) -> Self {
        Self {
            x64_app_path,
            arm64_app_path,
            out_app_path,
            force,
            merge_asars,
            single_arch_files,
            x64_arch_files,
            info_plists_to_ignore,
        }
    }
}
