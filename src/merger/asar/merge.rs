//! Merging two archives into one universal archive.

use super::{Archive, NodeKind, PackOptions, create_package};
use crate::merger::{
    error::{Error, ErrorExt, Result},
    macho::{BinaryFuser, is_native_header, is_thin_magic, is_universal_header},
    utils::{
        fs,
        glob::{GlobRule, describe_rule},
    },
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Prefix of the extraction directories created next to the output archive.
const SCRATCH_PREFIX: &str = ".asar-merge-";

/// Inputs of [`merge_asars`].
#[derive(Clone, Copy, Debug)]
pub struct AsarMergeOptions<'a> {
    /// x64 archive
    pub x64_asar: &'a Path,
    /// arm64 archive
    pub arm64_asar: &'a Path,
    /// Where to write the merged archive; may be `x64_asar`
    pub output: &'a Path,
    /// Entries allowed to exist in only one archive
    pub single_arch_files: Option<&'a GlobRule>,
}

/// Fails on any entry of `archive` missing from `other` that the rule does not
/// cover, directories included, and returns the allowed unique entries.
fn unique_entries(
    archive: &Archive,
    entries: &BTreeSet<String>,
    other: &BTreeSet<String>,
    single_arch_files: Option<&GlobRule>,
) -> Result<Vec<String>> {
    let mut unique = Vec::new();
    for entry in entries.difference(other) {
        if !single_arch_files.is_some_and(|rule| rule.matches(entry)) {
            return Err(Error::UncoveredSingleArch {
                path: entry.clone(),
                origin: format!("only present in \"{}\" and", archive.path().display()),
                option: "singleArchFiles",
                rule: describe_rule(single_arch_files),
            });
        }
        unique.push(entry.clone());
    }
    Ok(unique)
}

/// Entries present in both archives whose file content differs and needs
/// fusing.
async fn common_bindings(
    x64: &Archive,
    arm64: &Archive,
    common: impl Iterator<Item = &String>,
) -> Result<Vec<String>> {
    let mut bindings = Vec::new();

    for entry in common {
        let (Some(x64_node), Some(arm64_node)) = (x64.stat(entry), arm64.stat(entry)) else {
            continue;
        };
        match (x64_node.kind(), arm64_node.kind()) {
            (NodeKind::Directory, NodeKind::Directory) => continue,
            (NodeKind::Link, NodeKind::Link) if x64_node.link == arm64_node.link => continue,
            (NodeKind::File, NodeKind::File) => {}
            _ => {
                return Err(Error::UnreconcilableBinary {
                    path: PathBuf::from(entry),
                });
            }
        }

        let x64_content = x64.read_file(entry).await?;
        let arm64_content = arm64.read_file(entry).await?;
        if x64_content == arm64_content {
            continue;
        }

        // The x64 side may already have been fused through the unpacked
        // side directory.
        if is_universal_header(&x64_content) {
            if !is_native_header(&arm64_content) {
                return Err(Error::UnreconcilableBinary {
                    path: PathBuf::from(entry),
                });
            }
            log::debug!("{} is already universal, skipping", entry);
            continue;
        }
        if !is_thin_magic(&x64_content) {
            return Err(Error::UnreconcilableBinary {
                path: PathBuf::from(entry),
            });
        }

        bindings.push(entry.clone());
    }

    Ok(bindings)
}

/// Copies an arm64-only entry from the extracted arm64 tree into the x64 tree.
async fn copy_unique_entry(arm64: &Archive, entry: &str, from_root: &Path, to_root: &Path) -> Result<()> {
    let source = from_root.join(entry);
    let destination = to_root.join(entry);

    match arm64.stat(entry).map(|n| n.kind()) {
        Some(NodeKind::Directory) => tokio::fs::create_dir_all(&destination)
            .await
            .fs_context("creating directory", &destination),
        Some(NodeKind::Link) => {
            let target = tokio::fs::read_link(&source)
                .await
                .fs_context("reading link", &source)?;
            fs::create_symlink(&target, &destination).await
        }
        Some(NodeKind::File) => fs::copy_file(&source, &destination).await,
        None => Ok(()),
    }
}

/// Merges two archives into `options.output`.
///
/// Unique entries must be covered by `single_arch_files`. Shared files that
/// differ must be thin Mach-O binaries on the x64 side and are fused with
/// `fuser`. Unpacked flags from either side are preserved and the output is
/// packed in sorted path order. Returns the fused entries.
///
/// Both archives are extracted into scratch directories next to
/// `options.output`, removed on every exit path.
pub async fn merge_asars<F: BinaryFuser>(options: &AsarMergeOptions<'_>, fuser: &F) -> Result<Vec<String>> {
    log::debug!(
        "merging {} and {}",
        options.x64_asar.display(),
        options.arm64_asar.display()
    );

    let x64 = Archive::open(options.x64_asar).await?;
    let arm64 = Archive::open(options.arm64_asar).await?;
    let x64_entries: BTreeSet<String> = x64.list().into_iter().collect();
    let arm64_entries: BTreeSet<String> = arm64.list().into_iter().collect();

    unique_entries(&x64, &x64_entries, &arm64_entries, options.single_arch_files)?;
    let arm64_unique = unique_entries(&arm64, &arm64_entries, &x64_entries, options.single_arch_files)?;

    let bindings = common_bindings(&x64, &arm64, x64_entries.intersection(&arm64_entries)).await?;

    let mut unpack = BTreeSet::new();
    for (archive, entries) in [(&x64, &x64_entries), (&arm64, &arm64_entries)] {
        for entry in entries {
            if archive
                .stat(entry)
                .is_some_and(|n| n.unpacked && !n.is_directory())
            {
                unpack.insert(entry.clone());
            }
        }
    }

    let scratch_root = options
        .output
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let x64_dir = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .suffix("-x64")
        .tempdir_in(scratch_root)
        .fs_context("creating scratch directory", scratch_root)?;
    let arm64_dir = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .suffix("-arm64")
        .tempdir_in(scratch_root)
        .fs_context("creating scratch directory", scratch_root)?;

    x64.extract_all(x64_dir.path()).await?;
    arm64.extract_all(arm64_dir.path()).await?;

    for entry in &arm64_unique {
        copy_unique_entry(&arm64, entry, arm64_dir.path(), x64_dir.path()).await?;
    }

    for binding in &bindings {
        let x64_file = tokio::fs::canonicalize(x64_dir.path().join(binding))
            .await
            .fs_context("resolving extracted file", x64_dir.path().join(binding))?;
        let arm64_file = tokio::fs::canonicalize(arm64_dir.path().join(binding))
            .await
            .fs_context("resolving extracted file", arm64_dir.path().join(binding))?;
        log::debug!("fusing {} with {}", binding, fuser.name());
        fuser.fuse(&x64_file, &arm64_file, &x64_file).await?;
    }

    let ordering = x64_entries
        .union(&arm64_entries)
        .filter(|entry| {
            x64.stat(entry)
                .or_else(|| arm64.stat(entry))
                .is_some_and(|n| n.kind() == NodeKind::File)
        })
        .cloned()
        .collect();
    let pack = PackOptions { unpack, ordering };
    create_package(x64_dir.path(), options.output, &pack).await?;

    log::debug!(
        "merged archive written to {} ({} fused)",
        options.output.display(),
        bindings.len()
    );
    Ok(bindings)
}
