//! Building archives from a directory tree.
//!
//! Packing runs in two passes over the source tree: the first records sizes,
//! link targets and integrity hashes to build the header, the second streams
//! payloads into the archive in header order. Output depends only on the
//! source tree and [`PackOptions`], so packing the same tree twice yields
//! identical bytes.

use super::header::{FileIntegrity, INTEGRITY_BLOCK_SIZE, Node, encode_header};
use crate::merger::{
    error::{Error, ErrorExt, Result},
    layout,
    utils::glob::to_slash,
};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use std::io::{BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

/// How to lay out a new archive.
#[derive(Clone, Debug, Default)]
pub struct PackOptions {
    /// Entries (files or whole directories) stored in the `.unpacked` side
    /// directory instead of the archive body.
    pub unpack: BTreeSet<String>,
    /// Files whose payloads come first, in this order. Remaining files follow
    /// in sorted path order.
    pub ordering: Vec<String>,
}

impl PackOptions {
    /// Whether `entry` or one of its ancestors is marked unpacked.
    fn is_unpacked(&self, entry: &str) -> bool {
        if self.unpack.contains(entry) {
            return true;
        }
        let mut prefix = entry;
        while let Some((parent, _)) = prefix.rsplit_once('/') {
            if self.unpack.contains(parent) {
                return true;
            }
            prefix = parent;
        }
        false
    }
}

enum SourceKind {
    Directory,
    File { size: u64, executable: bool },
    Link { target: String },
}

struct SourceEntry {
    entry: String,
    source: PathBuf,
    kind: SourceKind,
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}

/// Resolves `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Archive-root-relative target of the symlink at `link`.
fn archive_link_target(root: &Path, link: &Path) -> Result<String> {
    let target = std::fs::read_link(link).fs_context("reading link", link)?;
    let absolute = if target.is_absolute() {
        target.clone()
    } else {
        link.parent().unwrap_or(root).join(&target)
    };

    let resolved = normalize_lexically(&absolute);
    match resolved.strip_prefix(root) {
        Ok(inside) => Ok(to_slash(inside)),
        Err(_) => Err(Error::ArchiveFormat {
            path: link.to_path_buf(),
            reason: format!("link target {} is outside the packed directory", target.display()),
        }),
    }
}

fn collect_entries(root: &Path) -> Result<Vec<SourceEntry>> {
    let mut entries = Vec::new();

    for item in walkdir::WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
    {
        let item = item.map_err(|e| Error::GenericError(format!("walking {}: {}", root.display(), e)))?;
        let relative = item
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::GenericError(e.to_string()))?;
        let entry = to_slash(relative);

        let kind = if item.file_type().is_symlink() {
            SourceKind::Link {
                target: archive_link_target(root, item.path())?,
            }
        } else if item.file_type().is_dir() {
            SourceKind::Directory
        } else {
            let metadata = item
                .metadata()
                .map_err(|e| Error::GenericError(format!("reading {}: {}", item.path().display(), e)))?;
            SourceKind::File {
                size: metadata.len(),
                executable: is_executable(&metadata),
            }
        };

        entries.push(SourceEntry {
            entry,
            source: item.path().to_path_buf(),
            kind,
        });
    }

    Ok(entries)
}

/// Whole-file hash plus one hash per 4 MiB block.
fn file_integrity(path: &Path) -> Result<FileIntegrity> {
    let mut file = std::fs::File::open(path).fs_context("opening file", path)?;
    let mut whole = Sha256::new();
    let mut blocks = Vec::new();
    let mut block = Vec::with_capacity(INTEGRITY_BLOCK_SIZE as usize);

    loop {
        block.clear();
        (&mut file)
            .take(INTEGRITY_BLOCK_SIZE)
            .read_to_end(&mut block)
            .fs_context("reading file", path)?;
        if block.is_empty() && !blocks.is_empty() {
            break;
        }
        whole.update(&block);
        blocks.push(hex::encode(Sha256::digest(&block)));
        if (block.len() as u64) < INTEGRITY_BLOCK_SIZE {
            break;
        }
    }

    Ok(FileIntegrity {
        algorithm: "SHA256".to_string(),
        hash: hex::encode(whole.finalize()),
        block_size: INTEGRITY_BLOCK_SIZE,
        blocks,
    })
}

/// Inserts `node` at `entry`, creating intermediate directories.
fn insert_node(root: &mut Node, entry: &str, node: Node) -> Result<()> {
    let mut components: Vec<&str> = entry.split('/').collect();
    let Some(name) = components.pop() else {
        return Ok(());
    };

    let mut current = root;
    for component in components {
        let children = current
            .files
            .get_or_insert_with(Default::default);
        current = children
            .entry(component.to_string())
            .or_insert_with(Node::directory);
        if !current.is_directory() {
            return Err(Error::GenericError(format!(
                "\"{}\" is both a file and a directory",
                component
            )));
        }
    }

    let children = current.files.get_or_insert_with(Default::default);
    // A directory may have been created implicitly by a deeper entry.
    let existing_dir = node.is_directory() && children.get(name).is_some_and(Node::is_directory);
    if existing_dir {
        if let Some(existing) = children.get_mut(name) {
            existing.unpacked |= node.unpacked;
        }
    } else {
        children.insert(name.to_string(), node);
    }
    Ok(())
}

fn create_package_blocking(src: &Path, dest: &Path, options: &PackOptions) -> Result<()> {
    let root = std::fs::canonicalize(src).fs_context("resolving source directory", src)?;
    let entries = collect_entries(&root)?;

    let mut header = Node::directory();
    let mut packed: Vec<&SourceEntry> = Vec::new();
    let mut unpacked: Vec<&SourceEntry> = Vec::new();

    // Pass one: everything except payload offsets.
    let mut file_nodes: Vec<&SourceEntry> = Vec::new();
    for source in &entries {
        match &source.kind {
            SourceKind::Directory => {
                let mut node = Node::directory();
                node.unpacked = options.is_unpacked(&source.entry);
                insert_node(&mut header, &source.entry, node)?;
            }
            SourceKind::Link { target } => {
                let node = Node {
                    link: Some(target.clone()),
                    ..Default::default()
                };
                insert_node(&mut header, &source.entry, node)?;
            }
            SourceKind::File { size, executable } => {
                let is_unpacked = options.is_unpacked(&source.entry);
                let node = Node {
                    size: Some(*size),
                    unpacked: is_unpacked,
                    executable: *executable,
                    integrity: Some(file_integrity(&source.source)?),
                    ..Default::default()
                };
                if is_unpacked {
                    unpacked.push(source);
                } else {
                    file_nodes.push(source);
                }
                insert_node(&mut header, &source.entry, node)?;
            }
        }
    }

    // Payload order: explicit ordering first, then sorted walk order.
    let mut seen = HashSet::new();
    for wanted in &options.ordering {
        let wanted = wanted.trim_start_matches('/');
        if let Some(source) = file_nodes.iter().find(|s| s.entry == wanted) {
            if seen.insert(source.entry.as_str()) {
                packed.push(source);
            }
        }
    }
    for source in &file_nodes {
        if seen.insert(source.entry.as_str()) {
            packed.push(source);
        }
    }

    let mut offset = 0u64;
    for source in &packed {
        let SourceKind::File { size, .. } = source.kind else {
            continue;
        };
        let entry = source.entry.as_str();
        set_offset(&mut header, entry, offset)?;
        offset += size;
    }

    // Pass two: header, then payloads.
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).fs_context("creating archive directory", parent)?;
    }
    let out = std::fs::File::create(dest).fs_context("creating archive", dest)?;
    let mut writer = BufWriter::new(out);
    writer
        .write_all(&encode_header(&header)?)
        .fs_context("writing archive header", dest)?;
    for source in &packed {
        let mut input = std::fs::File::open(&source.source).fs_context("opening file", &source.source)?;
        std::io::copy(&mut input, &mut writer).fs_context("writing archive payload", dest)?;
    }
    writer.flush().fs_context("writing archive", dest)?;

    let unpacked_root = layout::unpacked_dir(dest);
    match std::fs::remove_dir_all(&unpacked_root) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).fs_context("removing stale unpacked directory", &unpacked_root),
    }
    for source in &unpacked {
        let target = unpacked_root.join(&source.entry);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).fs_context("creating directory", parent)?;
        }
        std::fs::copy(&source.source, &target).fs_context("copying unpacked file", &source.source)?;
    }

    log::debug!(
        "packed {} into {} ({} packed, {} unpacked)",
        src.display(),
        dest.display(),
        packed.len(),
        unpacked.len()
    );
    Ok(())
}

fn set_offset(root: &mut Node, entry: &str, offset: u64) -> Result<()> {
    let mut node = root;
    for component in entry.split('/') {
        node = node
            .files
            .as_mut()
            .and_then(|children| children.get_mut(component))
            .ok_or_else(|| Error::GenericError(format!("\"{}\" missing from header", entry)))?;
    }
    node.offset = Some(offset.to_string());
    Ok(())
}

/// Packs the directory `src` into a new archive at `dest`.
///
/// Any existing `<dest>.unpacked` directory is replaced. Symlinks are stored
/// as links and must point inside `src`.
pub async fn create_package(src: &Path, dest: &Path, options: &PackOptions) -> Result<()> {
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();
    let options = options.clone();

    tokio::task::spawn_blocking(move || create_package_blocking(&src, &dest, &options))
        .await
        .map_err(|e| Error::GenericError(format!("Archive packing task panicked: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merger::asar::Archive;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, bytes: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[tokio::test]
    async fn test_packing_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        write(&src, "b.js", b"b");
        write(&src, "a/c.js", b"cc");

        let first = temp.path().join("first.asar");
        let second = temp.path().join("second.asar");
        create_package(&src, &first, &PackOptions::default()).await.unwrap();
        create_package(&src, &second, &PackOptions::default()).await.unwrap();

        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
    }

    #[tokio::test]
    async fn test_ordering_controls_payload_offsets() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        write(&src, "a.js", b"aaaa");
        write(&src, "z.js", b"zz");
        let dest = temp.path().join("app.asar");

        let options = PackOptions {
            unpack: BTreeSet::new(),
            ordering: vec!["/z.js".to_string()],
        };
        create_package(&src, &dest, &options).await.unwrap();

        let archive = Archive::open(&dest).await.unwrap();
        assert_eq!(archive.stat("z.js").unwrap().offset(), Some(0));
        assert_eq!(archive.stat("a.js").unwrap().offset(), Some(2));
    }

    #[tokio::test]
    async fn test_integrity_is_recorded() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        write(&src, "index.js", b"hello");
        let dest = temp.path().join("app.asar");
        create_package(&src, &dest, &PackOptions::default()).await.unwrap();

        let archive = Archive::open(&dest).await.unwrap();
        let integrity = archive.stat("index.js").unwrap().integrity.clone().unwrap();
        let expected = crate::merger::checksum::sha256_hex(b"hello");
        assert_eq!(integrity.algorithm, "SHA256");
        assert_eq!(integrity.hash, expected);
        assert_eq!(integrity.blocks, vec![expected]);
    }

    #[tokio::test]
    async fn test_unpacked_directory_and_stale_side_directory() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        write(&src, "native/addon.node", b"addon");
        write(&src, "index.js", b"js");
        let dest = temp.path().join("app.asar");
        write(temp.path(), "app.asar.unpacked/stale.node", b"old");

        let options = PackOptions {
            unpack: BTreeSet::from(["native".to_string()]),
            ordering: Vec::new(),
        };
        create_package(&src, &dest, &options).await.unwrap();

        let archive = Archive::open(&dest).await.unwrap();
        assert!(archive.stat("native").unwrap().unpacked);
        assert!(archive.stat("native/addon.node").unwrap().unpacked);
        assert!(!archive.stat("index.js").unwrap().unpacked);
        assert!(temp.path().join("app.asar.unpacked/native/addon.node").is_file());
        assert!(!temp.path().join("app.asar.unpacked/stale.node").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_link_escaping_source_is_rejected() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::os::unix::fs::symlink("../../etc/passwd", src.join("escape")).unwrap();

        let err = create_package(&src, &temp.path().join("x.asar"), &PackOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ArchiveFormat { .. }));
    }
}
