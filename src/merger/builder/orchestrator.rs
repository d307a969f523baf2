//! Main merge pipeline.
//!
//! This module provides the [`Merger`] orchestrator that sequences
//! classification, reconciliation, fusion, archive merging, shimming and
//! integrity injection over a scratch copy of the x64 bundle.

use super::workspace::MergeWorkspace;
use crate::merger::{
    MergeOptions,
    asar::{AsarMergeOptions, merge_asars},
    checksum::calculate_sha256,
    diff,
    error::{Context, Error, Result},
    files::{AppFile, AppFileType, get_all_app_files},
    info_plist::inject_integrity,
    integrity::{IntegrityMap, compute_integrity_data},
    layout::{self, AsarMode},
    macho::{
        AnyFuser, AnyInspector, BinaryFuser, FusionRecord, MachOOutcome, NativeBinaryInspector,
        merge_macho_file,
    },
    shim::{self, ShimKind},
    utils::fs,
};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Upper bound on concurrent file hashing tasks.
const MAX_CONCURRENT_HASHES: usize = 16;

/// Directories whose contents Xcode emits nondeterministically.
const NONDETERMINISTIC_DIRS: &[&str] = &["MainMenu.nib"];

/// Pipeline stages, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeStage {
    /// Host, paths and output checks
    Validate,
    /// Archive presence on both inputs
    DetectMode,
    /// Copy of the x64 bundle into the workspace
    Stage,
    /// File classification of both sides
    Classify,
    /// One-sided file check
    CheckParity,
    /// Plain file content check
    ReconcilePlain,
    /// Native binary fusion
    ReconcileMachO,
    /// Loose folder comparison and shimming
    MergeLoose,
    /// Archive merge or shimming
    MergeArchive,
    /// Archive fingerprints
    ComputeIntegrity,
    /// Plist reconciliation
    InjectIntegrity,
    /// arm64 snapshot copy
    CopySnapshots,
    /// Move to the output path
    Promote,
    /// Workspace removal
    Cleanup,
}

impl fmt::Display for MergeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of a successful merge.
#[derive(Clone, Debug, Serialize)]
pub struct MergeReport {
    /// Whether the inputs shipped `app.asar`
    pub asar_mode: AsarMode,
    /// Bundle-relative binaries that were fused or already universal
    pub fused: Vec<PathBuf>,
    /// Archive entries fused during an archive merge
    pub fused_archive_entries: Vec<String>,
    /// Shim generated, if payloads could not be merged
    pub shim: Option<ShimKind>,
    /// Fingerprints injected into `Info.plist`
    pub integrity: IntegrityMap,
    /// The universal bundle
    pub output: PathBuf,
}

/// Main merge orchestrator.
///
/// Generic over the [`NativeBinaryInspector`] used to classify files and the
/// [`BinaryFuser`] used to create universal binaries.
///
/// # Examples
///
/// ```no_run
/// use kodegen_bundler_universal::merger::{
///     FatBinaryFuser, MagicInspector, MergeOptionsBuilder, Merger,
/// };
///
/// # async fn example() -> kodegen_bundler_universal::merger::Result<()> {
/// let options = MergeOptionsBuilder::new()
///     .x64_app_path("/builds/x64/Demo.app")
///     .arm64_app_path("/builds/arm64/Demo.app")
///     .out_app_path("/builds/universal/Demo.app")
///     .build()?;
///
/// let report = Merger::new(options, MagicInspector, FatBinaryFuser).merge().await?;
/// println!("{}", report.output.display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Merger<I, F> {
    options: MergeOptions,
    inspector: I,
    fuser: F,
}

/// Per-stage results threaded through [`Merger::run`].
struct Classified {
    x64: Vec<AppFile>,
    arm64: Vec<AppFile>,
}

impl<I: NativeBinaryInspector, F: BinaryFuser> Merger<I, F> {
    /// Creates a merger with explicit capabilities.
    pub fn new(options: MergeOptions, inspector: I, fuser: F) -> Self {
        Self {
            options,
            inspector,
            fuser,
        }
    }

    /// Runs the whole pipeline.
    ///
    /// Nothing is written at the output path unless every stage succeeds, and
    /// the scratch workspace is removed on every exit path.
    pub async fn merge(&self) -> Result<MergeReport> {
        stage(MergeStage::Validate);
        self.validate().await?;

        stage(MergeStage::DetectMode);
        let mode = self.detect_mode().await?;

        let out_parent = self
            .options
            .out_app_path()
            .parent()
            .unwrap_or_else(|| Path::new("/"));
        let workspace = MergeWorkspace::create_in(out_parent).await?;

        let result = self.run(&workspace, mode).await;

        stage(MergeStage::Cleanup);
        match result {
            Ok(report) => {
                if let Err(e) = workspace.close() {
                    log::warn!("failed to remove scratch workspace: {}", e);
                }
                log::info!("✓ Created universal app at {}", report.output.display());
                Ok(report)
            }
            Err(e) => {
                drop(workspace);
                Err(e)
            }
        }
    }

    async fn validate(&self) -> Result<()> {
        if !self.inspector.host_supported() || !self.fuser.host_supported() {
            return Err(Error::Validation(format!(
                "the selected tools ({}, {}) are not available on this host; \
                 run on macOS or choose the built-in fuser and magic inspector",
                self.inspector.name(),
                self.fuser.name()
            )));
        }

        let paths = [
            ("x64AppPath", self.options.x64_app_path()),
            ("arm64AppPath", self.options.arm64_app_path()),
            ("outAppPath", self.options.out_app_path()),
        ];
        for (name, path) in paths {
            if !path.is_absolute() {
                return Err(Error::Validation(format!(
                    "{} must be absolute, got {}",
                    name,
                    path.display()
                )));
            }
        }

        for (name, path) in &paths[..2] {
            let is_dir = tokio::fs::metadata(path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if !is_dir {
                return Err(Error::Validation(format!(
                    "{} does not exist or is not a directory: {}",
                    name,
                    path.display()
                )));
            }
        }

        let out = self.options.out_app_path();
        if fs::path_exists(out).await {
            if !self.options.force() {
                return Err(Error::Validation(format!(
                    "The out path \"{}\" already exists and force is not set to true",
                    out.display()
                )));
            }
            log::debug!("overwriting existing application at {}", out.display());
            fs::remove_path(out).await?;
        }

        Ok(())
    }

    async fn detect_mode(&self) -> Result<AsarMode> {
        let x64 = AsarMode::detect(self.options.x64_app_path()).await;
        let arm64 = AsarMode::detect(self.options.arm64_app_path()).await;
        log::debug!("archive mode: x64 {:?}, arm64 {:?}", x64, arm64);

        if x64 != arm64 {
            return Err(Error::ModeMismatch {
                x64_has_asar: x64 == AsarMode::HasAsar,
                arm64_has_asar: arm64 == AsarMode::HasAsar,
            });
        }
        Ok(x64)
    }

    async fn run(&self, workspace: &MergeWorkspace, mode: AsarMode) -> Result<MergeReport> {
        let tmp_app = workspace.tmp_app();
        let arm64_app = self.options.arm64_app_path();

        stage(MergeStage::Stage);
        fs::copy_dir(self.options.x64_app_path(), &tmp_app).await?;

        stage(MergeStage::Classify);
        let classified = Classified {
            x64: get_all_app_files(&tmp_app, self.options.single_arch_files(), &self.inspector).await?,
            arm64: get_all_app_files(arm64_app, self.options.single_arch_files(), &self.inspector)
                .await?,
        };

        stage(MergeStage::CheckParity);
        check_parity(&classified)?;

        stage(MergeStage::ReconcilePlain);
        self.reconcile_plain(&classified.x64).await?;

        stage(MergeStage::ReconcileMachO);
        let fused = self.reconcile_macho(&classified.x64, &tmp_app).await?;

        let mut shim = None;
        let mut fused_archive_entries = Vec::new();
        match mode {
            AsarMode::NoAsar => {
                stage(MergeStage::MergeLoose);
                let unresolved = diff::unresolved_differences(
                    &layout::app_dir(&tmp_app),
                    &layout::app_dir(arm64_app),
                    &Path::new("Contents").join("Resources").join(layout::APP_NAME),
                    &fused,
                )
                .await?;
                if !unresolved.is_empty() {
                    log::info!(
                        "app folders differ in {} entries, generating shim",
                        unresolved.len()
                    );
                    shim::generate_loose_shim(
                        &tmp_app,
                        arm64_app,
                        self.options.x64_app_path(),
                        &workspace.entry_dir(),
                    )
                    .await?;
                    shim = Some(ShimKind::Loose);
                }
            }
            AsarMode::HasAsar => {
                stage(MergeStage::MergeArchive);
                if self.options.merge_asars() {
                    let x64_asar = layout::app_asar(&tmp_app);
                    let arm64_asar = layout::app_asar(arm64_app);
                    let merge = AsarMergeOptions {
                        x64_asar: &x64_asar,
                        arm64_asar: &arm64_asar,
                        output: &x64_asar,
                        single_arch_files: self.options.single_arch_files(),
                    };
                    fused_archive_entries = merge_asars(&merge, &self.fuser)
                        .await
                        .with_context(|| {
                            format!("merging {} into {}", arm64_asar.display(), x64_asar.display())
                        })?;
                    log::info!("✓ Merged app.asar ({} fused entries)", fused_archive_entries.len());
                } else {
                    let x64_sha = calculate_sha256(&layout::app_asar(&tmp_app)).await?;
                    let arm64_sha = calculate_sha256(&layout::app_asar(arm64_app)).await?;
                    if x64_sha == arm64_sha {
                        log::debug!("app.asar is identical in both builds ({})", x64_sha);
                    } else {
                        log::info!("app.asar differs ({} != {}), generating shim", x64_sha, arm64_sha);
                        shim::generate_asar_shim(&tmp_app, arm64_app, &workspace.entry_dir())
                            .await?;
                        shim = Some(ShimKind::Asar);
                    }
                }
            }
        }

        stage(MergeStage::ComputeIntegrity);
        let integrity =
            compute_integrity_data(&layout::contents_dir(&tmp_app), &self.inspector).await?;

        stage(MergeStage::InjectIntegrity);
        for plist in files_of(&classified.x64, AppFileType::InfoPlist) {
            inject_integrity(
                &plist.relative_path,
                self.options.x64_app_path(),
                arm64_app,
                &tmp_app,
                &integrity,
                self.options.info_plists_to_ignore(),
            )
            .await?;
        }

        stage(MergeStage::CopySnapshots);
        for snapshot in files_of(&classified.arm64, AppFileType::Snapshot) {
            log::debug!("copying snapshot {}", snapshot.relative_path.display());
            fs::copy_file(
                &arm64_app.join(&snapshot.relative_path),
                &tmp_app.join(&snapshot.relative_path),
            )
            .await?;
        }

        stage(MergeStage::Promote);
        let output = self.options.out_app_path().to_path_buf();
        fs::move_path(&tmp_app, &output).await?;

        Ok(MergeReport {
            asar_mode: mode,
            fused: fused.iter().cloned().collect(),
            fused_archive_entries,
            shim,
            integrity,
            output,
        })
    }

    /// Requires every plain file to hash identically on both sides.
    async fn reconcile_plain(&self, x64_files: &[AppFile]) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_HASHES));
        let mut tasks = JoinSet::new();

        for file in files_of(x64_files, AppFileType::PlainFile) {
            let relative = file.relative_path.clone();
            let x64_path = self.options.x64_app_path().join(&relative);
            let arm64_path = self.options.arm64_app_path().join(&relative);
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::GenericError(e.to_string()))?;
                let x64_sha = calculate_sha256(&x64_path).await?;
                let arm64_sha = calculate_sha256(&arm64_path).await?;
                Ok::<_, Error>((relative, x64_sha, arm64_sha))
            });
        }

        let mut mismatches = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (relative, x64_sha, arm64_sha) =
                joined.map_err(|e| Error::GenericError(format!("Hashing task panicked: {}", e)))??;
            if x64_sha != arm64_sha {
                mismatches.push((relative, x64_sha, arm64_sha));
            }
        }
        mismatches.sort();

        for (relative, x64_sha, arm64_sha) in mismatches {
            if is_nondeterministic(&relative) {
                log::warn!(
                    "{} differs between builds but is a known nondeterministic artifact, keeping the x64 copy",
                    relative.display()
                );
                continue;
            }
            return Err(Error::ContentMismatch {
                path: relative,
                x64_sha,
                arm64_sha,
            });
        }

        Ok(())
    }

    /// Fuses every native binary pair into the working copy.
    async fn reconcile_macho(&self, x64_files: &[AppFile], tmp_app: &Path) -> Result<FusionRecord> {
        let mut record = FusionRecord::new();

        for file in files_of(x64_files, AppFileType::MachOBinary) {
            let outcome = merge_macho_file(
                &file.relative_path,
                tmp_app,
                self.options.arm64_app_path(),
                self.options.x64_arch_files(),
                &self.fuser,
            )
            .await?;

            match outcome {
                MachOOutcome::Fused | MachOOutcome::AlreadyUniversal => {
                    record.insert(&file.relative_path);
                }
                MachOOutcome::ArchitectureGeneric => {}
            }
        }

        log::info!("✓ Reconciled {} native binaries", record.len());
        Ok(record)
    }
}

/// Merges two bundles with automatically selected tools.
///
/// Uses `lipo` and `file` when they are installed, otherwise the built-in
/// fat writer and magic-number inspection.
pub async fn make_universal_app(options: MergeOptions) -> Result<MergeReport> {
    Merger::new(options, AnyInspector::auto(), AnyFuser::auto())
        .merge()
        .await
}

fn stage(stage: MergeStage) {
    log::debug!("stage: {}", stage);
}

fn files_of(files: &[AppFile], file_type: AppFileType) -> impl Iterator<Item = &AppFile> {
    files.iter().filter(move |f| f.file_type == file_type)
}

fn is_nondeterministic(relative_path: &Path) -> bool {
    relative_path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .is_some_and(|name| NONDETERMINISTIC_DIRS.contains(&name))
}

/// Fails when a file that must exist on both sides exists on only one.
fn check_parity(classified: &Classified) -> Result<()> {
    fn one_sided(side: &[AppFile], other: &[AppFile]) -> Vec<PathBuf> {
        let present: HashSet<&Path> = other.iter().map(|f| f.relative_path.as_path()).collect();
        side.iter()
            .filter(|f| f.file_type.requires_parity())
            .filter(|f| !present.contains(f.relative_path.as_path()))
            .map(|f| f.relative_path.clone())
            .collect()
    }

    let unique_to_x64 = one_sided(&classified.x64, &classified.arm64);
    let unique_to_arm64 = one_sided(&classified.arm64, &classified.x64);

    if unique_to_x64.is_empty() && unique_to_arm64.is_empty() {
        return Ok(());
    }
    Err(Error::StructuralParity {
        unique_to_x64,
        unique_to_arm64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, file_type: AppFileType) -> AppFile {
        AppFile {
            relative_path: PathBuf::from(path),
            file_type,
        }
    }

    #[test]
    fn test_parity_ignores_exempt_types() {
        let classified = Classified {
            x64: vec![
                file("Contents/Info.plist", AppFileType::InfoPlist),
                file("Contents/Resources/app-x64.asar", AppFileType::ArchiveCode),
                file("Contents/Resources/snapshot.x86_64.bin", AppFileType::Snapshot),
            ],
            arm64: vec![
                file("Contents/Info.plist", AppFileType::InfoPlist),
                file("Contents/Resources/app.asar.unpacked/arm.node", AppFileType::SingleArch),
            ],
        };
        assert!(check_parity(&classified).is_ok());
    }

    #[test]
    fn test_parity_lists_both_sides() {
        let classified = Classified {
            x64: vec![file("Contents/Frameworks/x.dylib", AppFileType::MachOBinary)],
            arm64: vec![file("Contents/Resources/arm.txt", AppFileType::PlainFile)],
        };
        match check_parity(&classified).unwrap_err() {
            Error::StructuralParity {
                unique_to_x64,
                unique_to_arm64,
            } => {
                assert_eq!(unique_to_x64, vec![PathBuf::from("Contents/Frameworks/x.dylib")]);
                assert_eq!(unique_to_arm64, vec![PathBuf::from("Contents/Resources/arm.txt")]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_nondeterministic_exception() {
        assert!(is_nondeterministic(Path::new(
            "Contents/Resources/Base.lproj/MainMenu.nib/keyedobjects.nib"
        )));
        assert!(!is_nondeterministic(Path::new("Contents/Resources/MainMenu.nib")));
    }
}
