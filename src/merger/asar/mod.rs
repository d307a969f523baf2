//! Packed-resource archive (ASAR) codec.
//!
//! # Module Organization
//!
//! - [`header`] - pickle-framed JSON header
//! - [`pack`] - building archives from directories ([`create_package`])
//! - [`merge`] - merging an x64 and an arm64 archive ([`merge_asars`])

pub mod header;
pub mod merge;
pub mod pack;

pub use header::{FileIntegrity, Node, NodeKind, RawHeader};
pub use merge::{AsarMergeOptions, merge_asars};
pub use pack::{PackOptions, create_package};

use crate::merger::{
    error::{Error, ErrorExt, Result},
    layout,
};
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Splits an entry path into its components, ignoring leading or doubled
/// separators and `.` segments.
fn entry_components(entry: &str) -> impl Iterator<Item = &str> {
    entry.split('/').filter(|c| !c.is_empty() && *c != ".")
}

/// Link target relative to the directory holding `entry`.
fn relative_link_target(entry: &str, target: &str) -> PathBuf {
    let depth = entry_components(entry).count().saturating_sub(1);
    let mut relative = PathBuf::new();
    for _ in 0..depth {
        relative.push(Component::ParentDir);
    }
    for component in entry_components(target) {
        relative.push(component);
    }
    relative
}

/// An opened archive with its parsed header.
#[derive(Clone, Debug)]
pub struct Archive {
    path: PathBuf,
    raw: RawHeader,
}

impl Archive {
    /// Reads the header of the archive at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let raw = header::read_raw_header(&path).await?;
        Ok(Self { path, raw })
    }

    /// Path of the archive file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header as stored, including the exact JSON text.
    pub fn raw_header(&self) -> &RawHeader {
        &self.raw
    }

    /// Root directory node.
    pub fn header(&self) -> &Node {
        &self.raw.header
    }

    /// Side directory holding unpacked payloads.
    pub fn unpacked_dir(&self) -> PathBuf {
        layout::unpacked_dir(&self.path)
    }

    /// Every entry (directories, files and links) as `/`-separated paths
    /// without a leading separator, depth first with children sorted.
    pub fn list(&self) -> Vec<String> {
        fn walk(node: &Node, prefix: &str, out: &mut Vec<String>) {
            let Some(children) = &node.files else {
                return;
            };
            for (name, child) in children {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", prefix, name)
                };
                out.push(path.clone());
                walk(child, &path, out);
            }
        }

        let mut entries = Vec::new();
        walk(self.header(), "", &mut entries);
        entries
    }

    /// Looks up the node for `entry`. Intermediate links are not followed.
    pub fn stat(&self, entry: &str) -> Option<&Node> {
        let mut node = self.header();
        for component in entry_components(entry) {
            node = node.files.as_ref()?.get(component)?;
        }
        Some(node)
    }

    fn stat_file(&self, entry: &str) -> Result<&Node> {
        let node = self.stat(entry).ok_or_else(|| Error::ArchiveFormat {
            path: self.path.clone(),
            reason: format!("no entry named \"{}\"", entry),
        })?;
        if node.kind() != NodeKind::File {
            return Err(Error::ArchiveFormat {
                path: self.path.clone(),
                reason: format!("\"{}\" is not a file", entry),
            });
        }
        Ok(node)
    }

    async fn read_packed(&self, file: &mut tokio::fs::File, entry: &str, node: &Node) -> Result<Vec<u8>> {
        let offset = node.offset().ok_or_else(|| Error::ArchiveFormat {
            path: self.path.clone(),
            reason: format!("\"{}\" has no payload offset", entry),
        })?;
        let size = node.size.unwrap_or(0);

        let archive_len = file
            .metadata()
            .await
            .fs_context("reading archive metadata", &self.path)?
            .len();
        let end = self
            .raw
            .data_offset()
            .checked_add(offset)
            .and_then(|start| start.checked_add(size));
        if end.is_none_or(|end| end > archive_len) {
            return Err(Error::ArchiveFormat {
                path: self.path.clone(),
                reason: format!("payload of \"{}\" lies outside the archive", entry),
            });
        }

        file.seek(std::io::SeekFrom::Start(self.raw.data_offset() + offset))
            .await
            .fs_context("seeking archive", &self.path)?;
        let mut bytes = vec![0u8; size as usize];
        file.read_exact(&mut bytes).await.map_err(|_| Error::ArchiveFormat {
            path: self.path.clone(),
            reason: format!("payload of \"{}\" is truncated", entry),
        })?;
        Ok(bytes)
    }

    /// Reads the content of the file `entry`, from the side directory when
    /// the entry is unpacked.
    pub async fn read_file(&self, entry: &str) -> Result<Vec<u8>> {
        let node = self.stat_file(entry)?;
        if node.unpacked {
            let path = self.unpacked_dir().join(entry.trim_start_matches('/'));
            return tokio::fs::read(&path)
                .await
                .fs_context("reading unpacked file", &path);
        }

        let mut file = tokio::fs::File::open(&self.path)
            .await
            .fs_context("opening archive", &self.path)?;
        self.read_packed(&mut file, entry, node).await
    }

    /// Writes every entry of the archive below `dest`.
    pub async fn extract_all(&self, dest: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dest)
            .await
            .fs_context("creating extraction directory", dest)?;
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .fs_context("opening archive", &self.path)?;

        for entry in self.list() {
            let Some(node) = self.stat(&entry) else {
                continue;
            };
            let target = dest.join(&entry);

            match node.kind() {
                NodeKind::Directory => {
                    tokio::fs::create_dir_all(&target)
                        .await
                        .fs_context("creating directory", &target)?;
                }
                NodeKind::Link => {
                    let link = node.link.as_deref().unwrap_or_default();
                    let relative = relative_link_target(&entry, link);
                    crate::merger::utils::fs::create_symlink(&relative, &target).await?;
                }
                NodeKind::File => {
                    if node.unpacked {
                        let source = self.unpacked_dir().join(&entry);
                        crate::merger::utils::fs::copy_file(&source, &target).await?;
                    } else {
                        let bytes = self.read_packed(&mut file, &entry, node).await?;
                        tokio::fs::write(&target, bytes)
                            .await
                            .fs_context("writing extracted file", &target)?;
                    }
                    if node.executable {
                        set_executable(&target).await?;
                    }
                }
            }
        }

        log::debug!("extracted {} to {}", self.path.display(), dest.display());
        Ok(())
    }
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .fs_context("setting permissions", path)
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}
