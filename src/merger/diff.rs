//! Tree comparison of the loose `Contents/Resources/app` folders.

use crate::merger::{
    error::{Error, ErrorExt, Result},
    macho::FusionRecord,
    utils::fs::files_equal,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EntryKind {
    Directory,
    File,
    Link,
}

fn scan(root: &Path) -> Result<BTreeMap<PathBuf, EntryKind>> {
    let mut entries = BTreeMap::new();
    if !root.exists() {
        return Ok(entries);
    }

    for item in walkdir::WalkDir::new(root).follow_links(false).min_depth(1) {
        let item = item.map_err(|e| Error::GenericError(format!("walking {}: {}", root.display(), e)))?;
        let relative = item
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::GenericError(e.to_string()))?
            .to_path_buf();
        let kind = if item.file_type().is_symlink() {
            EntryKind::Link
        } else if item.file_type().is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        entries.insert(relative, kind);
    }

    Ok(entries)
}

fn entries_equal(left: &Path, right: &Path, kind: EntryKind) -> Result<bool> {
    match kind {
        EntryKind::Directory => Ok(true),
        EntryKind::Link => {
            let a = std::fs::read_link(left).fs_context("reading link", left)?;
            let b = std::fs::read_link(right).fs_context("reading link", right)?;
            Ok(a == b)
        }
        EntryKind::File => files_equal(left, right),
    }
}

fn diff_trees(x64_dir: &Path, arm64_dir: &Path) -> Result<Vec<PathBuf>> {
    let left = scan(x64_dir)?;
    let right = scan(arm64_dir)?;

    let mut differing = Vec::new();
    for (relative, kind) in &left {
        match right.get(relative) {
            Some(other) if other == kind => {
                if !entries_equal(&x64_dir.join(relative), &arm64_dir.join(relative), *kind)? {
                    differing.push(relative.clone());
                }
            }
            _ => differing.push(relative.clone()),
        }
    }
    for relative in right.keys() {
        if !left.contains_key(relative) {
            differing.push(relative.clone());
        }
    }

    differing.sort();
    Ok(differing)
}

/// Entries that differ between `x64_dir` and `arm64_dir` by presence, kind,
/// size or content, minus those settled by Mach-O fusion.
///
/// `bundle_prefix` is the bundle-relative location of both directories, used
/// to look entries up in `fused`.
pub async fn unresolved_differences(
    x64_dir: &Path,
    arm64_dir: &Path,
    bundle_prefix: &Path,
    fused: &FusionRecord,
) -> Result<Vec<PathBuf>> {
    let differing = {
        let x64_dir = x64_dir.to_path_buf();
        let arm64_dir = arm64_dir.to_path_buf();
        tokio::task::spawn_blocking(move || diff_trees(&x64_dir, &arm64_dir))
            .await
            .map_err(|e| Error::GenericError(format!("Tree comparison task panicked: {}", e)))??
    };

    let unresolved: Vec<PathBuf> = differing
        .into_iter()
        .filter(|relative| !fused.contains(&bundle_prefix.join(relative)))
        .collect();

    for relative in &unresolved {
        log::debug!("unresolved difference: {}", relative.display());
    }
    Ok(unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, bytes: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[tokio::test]
    async fn test_identical_trees_have_no_differences() {
        let temp = TempDir::new().unwrap();
        let (x64, arm64) = (temp.path().join("x64"), temp.path().join("arm64"));
        for root in [&x64, &arm64] {
            write(root, "index.js", b"same");
            write(root, "lib/util.js", b"util");
        }

        let prefix = Path::new("Contents/Resources/app");
        let unresolved = unresolved_differences(&x64, &arm64, prefix, &FusionRecord::new())
            .await
            .unwrap();
        assert!(unresolved.is_empty());
    }

    #[tokio::test]
    async fn test_fused_paths_are_excluded() {
        let temp = TempDir::new().unwrap();
        let (x64, arm64) = (temp.path().join("x64"), temp.path().join("arm64"));
        write(&x64, "addon.node", b"fat");
        write(&arm64, "addon.node", b"arm");
        write(&x64, "x64-only.js", b"x");

        let prefix = Path::new("Contents/Resources/app");
        let mut fused = FusionRecord::new();
        fused.insert("Contents/Resources/app/addon.node");

        let unresolved = unresolved_differences(&x64, &arm64, prefix, &fused).await.unwrap();
        assert_eq!(unresolved, vec![PathBuf::from("x64-only.js")]);
    }

    #[tokio::test]
    async fn test_same_size_different_content_is_detected() {
        let temp = TempDir::new().unwrap();
        let (x64, arm64) = (temp.path().join("x64"), temp.path().join("arm64"));
        write(&x64, "a.js", b"aaaa");
        write(&arm64, "a.js", b"bbbb");

        let prefix = Path::new("Contents/Resources/app");
        let unresolved = unresolved_differences(&x64, &arm64, prefix, &FusionRecord::new())
            .await
            .unwrap();
        assert_eq!(unresolved, vec![PathBuf::from("a.js")]);
    }
}
