//! File classification for app bundles.
//!
//! Walks a bundle and assigns every regular file an [`AppFileType`], which
//! decides how the merge treats it.

use crate::merger::{
    error::{Error, ErrorExt, Result},
    layout::{ASAR_EXTENSION, INFO_PLIST, SNAPSHOT_EXTENSION, UNPACKED_NATIVE_DIR},
    macho::NativeBinaryInspector,
    utils::glob::GlobRule,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Semantic type of a file inside a bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum AppFileType {
    /// Mach-O or universal binary
    MachOBinary,
    /// Anything else; must be identical across builds
    PlainFile,
    /// `Info.plist`
    InfoPlist,
    /// V8 snapshot (`*.bin`), architecture specific by nature
    Snapshot,
    /// Packed-resource archive (`*.asar`)
    ArchiveCode,
    /// Allow-listed file inside `app.asar.unpacked`
    SingleArch,
}

impl AppFileType {
    /// Whether files of this type must exist in both builds.
    pub fn requires_parity(&self) -> bool {
        !matches!(
            self,
            AppFileType::ArchiveCode | AppFileType::SingleArch | AppFileType::Snapshot
        )
    }
}

/// A classified file, relative to the bundle root.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct AppFile {
    /// Path relative to the bundle root
    pub relative_path: PathBuf,
    /// Classification
    pub file_type: AppFileType,
}

/// Whether `relative_path` is an allow-listed file in the unpacked native directory.
fn is_single_arch_file(relative_path: &Path, single_arch_files: Option<&GlobRule>) -> bool {
    let Some(rule) = single_arch_files else {
        return false;
    };
    match relative_path.strip_prefix(UNPACKED_NATIVE_DIR) {
        Ok(inside) => rule.matches(inside),
        Err(_) => false,
    }
}

/// Collects bundle-relative paths of regular files under `root`, in sorted
/// order, skipping symlinks and files already reached through another path.
fn collect_regular_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut visited = HashSet::new();
    let mut files = Vec::new();

    for entry in walkdir::WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            Error::GenericError(format!("walking {}: {}", root.display(), e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let real = std::fs::canonicalize(entry.path())
            .fs_context("resolving real path", entry.path())?;
        if !visited.insert(real) {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::GenericError(e.to_string()))?;
        files.push(relative.to_path_buf());
    }

    Ok(files)
}

/// Classifies every regular file reachable under `app_path`.
///
/// Classification order (first match wins):
/// 1. `*.asar` - [`AppFileType::ArchiveCode`]
/// 2. allow-listed in `Contents/Resources/app.asar.unpacked` - [`AppFileType::SingleArch`]
/// 3. native binary per `inspector` - [`AppFileType::MachOBinary`]
/// 4. `*.bin` - [`AppFileType::Snapshot`]
/// 5. named `Info.plist` - [`AppFileType::InfoPlist`]
/// 6. otherwise [`AppFileType::PlainFile`]
pub async fn get_all_app_files<I: NativeBinaryInspector>(
    app_path: &Path,
    single_arch_files: Option<&GlobRule>,
    inspector: &I,
) -> Result<Vec<AppFile>> {
    let root = tokio::fs::canonicalize(app_path)
        .await
        .fs_context("resolving bundle path", app_path)?;

    let relative_paths = {
        let root = root.clone();
        tokio::task::spawn_blocking(move || collect_regular_files(&root))
            .await
            .map_err(|e| Error::GenericError(format!("File walk task panicked: {}", e)))??
    };

    let mut files = Vec::with_capacity(relative_paths.len());
    for relative_path in relative_paths {
        let extension = relative_path.extension().and_then(|e| e.to_str());

        let file_type = if extension == Some(ASAR_EXTENSION) {
            AppFileType::ArchiveCode
        } else if is_single_arch_file(&relative_path, single_arch_files) {
            AppFileType::SingleArch
        } else if inspector.is_native_binary(&root.join(&relative_path)).await? {
            AppFileType::MachOBinary
        } else if extension == Some(SNAPSHOT_EXTENSION) {
            AppFileType::Snapshot
        } else if relative_path.file_name().and_then(|n| n.to_str()) == Some(INFO_PLIST) {
            AppFileType::InfoPlist
        } else {
            AppFileType::PlainFile
        };

        log::trace!("{:?}: {}", file_type, relative_path.display());
        files.push(AppFile {
            relative_path,
            file_type,
        });
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merger::macho::{MagicInspector, test_support::thin_macho};
    use goblin::mach::cputype::CPU_TYPE_ARM64;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, bytes: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    fn type_of(files: &[AppFile], rel: &str) -> Option<AppFileType> {
        files
            .iter()
            .find(|f| f.relative_path == Path::new(rel))
            .map(|f| f.file_type)
    }

    #[tokio::test]
    async fn test_classification_order() {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("App.app");
        let macho = thin_macho(CPU_TYPE_ARM64, b"code");
        write(&app, "Contents/Info.plist", b"<plist/>");
        write(&app, "Contents/MacOS/App", &macho);
        write(&app, "Contents/Resources/app.asar", &macho);
        write(&app, "Contents/Resources/v8_context_snapshot.bin", b"snap");
        write(&app, "Contents/Resources/icon.icns", b"icon");
        write(&app, "Contents/Resources/app.asar.unpacked/only-x64.node", &macho);
        write(&app, "Contents/Resources/app.asar.unpacked/addon.node", &macho);

        let rule = GlobRule::new("only-*.node").unwrap();
        let files = get_all_app_files(&app, Some(&rule), &MagicInspector)
            .await
            .unwrap();

        assert_eq!(files.len(), 7);
        assert_eq!(type_of(&files, "Contents/Info.plist"), Some(AppFileType::InfoPlist));
        assert_eq!(type_of(&files, "Contents/MacOS/App"), Some(AppFileType::MachOBinary));
        assert_eq!(
            type_of(&files, "Contents/Resources/app.asar"),
            Some(AppFileType::ArchiveCode)
        );
        assert_eq!(
            type_of(&files, "Contents/Resources/v8_context_snapshot.bin"),
            Some(AppFileType::Snapshot)
        );
        assert_eq!(
            type_of(&files, "Contents/Resources/icon.icns"),
            Some(AppFileType::PlainFile)
        );
        assert_eq!(
            type_of(&files, "Contents/Resources/app.asar.unpacked/only-x64.node"),
            Some(AppFileType::SingleArch)
        );
        assert_eq!(
            type_of(&files, "Contents/Resources/app.asar.unpacked/addon.node"),
            Some(AppFileType::MachOBinary)
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_are_skipped() {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("App.app");
        write(&app, "Contents/Frameworks/F.framework/Versions/A/F", b"lib");
        std::os::unix::fs::symlink(
            "Versions/A/F",
            app.join("Contents/Frameworks/F.framework/F"),
        )
        .unwrap();
        std::os::unix::fs::symlink(".", app.join("Contents/loop")).unwrap();

        let files = get_all_app_files(&app, None, &MagicInspector).await.unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(
            files[0].relative_path,
            PathBuf::from("Contents/Frameworks/F.framework/Versions/A/F")
        );
    }
}
