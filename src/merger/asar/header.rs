//! Archive header: JSON file tree wrapped in Chromium pickle framing.
//!
//! ```text
//! u32 LE  4                    size pickle payload length
//! u32 LE  header_pickle_len
//! u32 LE  payload_len          header pickle
//! u32 LE  json_len
//! [json_len bytes] JSON, zero padded to 4-byte alignment
//! [payload bytes]              file contents, offsets relative to here
//! ```

use crate::merger::error::{Error, ErrorExt, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path};
use tokio::io::AsyncReadExt;

/// Block size used for per-file integrity hashes.
pub const INTEGRITY_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Length of the leading size pickle.
const SIZE_PICKLE_LEN: u64 = 8;

/// Upper bound on header size accepted when reading.
const MAX_HEADER_LEN: u32 = 256 * 1024 * 1024;

/// Per-file SHA256 integrity record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIntegrity {
    /// Always `SHA256`
    pub algorithm: String,
    /// Hash of the whole file
    pub hash: String,
    /// Size of each hashed block
    #[serde(rename = "blockSize")]
    pub block_size: u64,
    /// Hash of each block
    pub blocks: Vec<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One node of the header tree: a directory, file or symlink.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Children, present for directories
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<BTreeMap<String, Node>>,
    /// File size in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Payload offset as a decimal string, absent for unpacked files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
    /// Payload lives in the `.unpacked` side directory
    #[serde(default, skip_serializing_if = "is_false")]
    pub unpacked: bool,
    /// Executable bit
    #[serde(default, skip_serializing_if = "is_false")]
    pub executable: bool,
    /// Symlink target, relative to the archive root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Content hashes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<FileIntegrity>,
}

/// Kind of a header node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Has children
    Directory,
    /// Has content
    File,
    /// Points elsewhere in the archive
    Link,
}

impl Node {
    /// An empty directory node.
    pub fn directory() -> Self {
        Self {
            files: Some(BTreeMap::new()),
            ..Default::default()
        }
    }

    /// Classifies the node.
    pub fn kind(&self) -> NodeKind {
        if self.files.is_some() {
            NodeKind::Directory
        } else if self.link.is_some() {
            NodeKind::Link
        } else {
            NodeKind::File
        }
    }

    /// Whether the node is a directory.
    pub fn is_directory(&self) -> bool {
        self.kind() == NodeKind::Directory
    }

    /// Parsed payload offset, if packed.
    pub fn offset(&self) -> Option<u64> {
        self.offset.as_deref().and_then(|o| o.parse().ok())
    }
}

/// The header exactly as stored, and its parsed tree.
#[derive(Clone, Debug)]
pub struct RawHeader {
    /// JSON text as stored in the archive
    pub header_string: String,
    /// Parsed root directory
    pub header: Node,
    /// Length of the header pickle
    pub header_size: u32,
}

impl RawHeader {
    /// Offset of the first payload byte from the start of the archive.
    pub fn data_offset(&self) -> u64 {
        SIZE_PICKLE_LEN + u64::from(self.header_size)
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let word: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(word))
}

/// Whether `name` is a single normal path component on every platform.
fn is_plain_name(name: &str) -> bool {
    if name.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
}

/// Rejects entry names and link targets that would resolve outside the
/// archive root once extracted.
fn validate_tree(node: &Node, prefix: &str) -> std::result::Result<(), String> {
    if let Some(link) = &node.link {
        if link.split(['/', '\\']).any(|component| component == "..") {
            return Err(format!("link \"{}\" points outside the archive", prefix));
        }
    }
    for (name, child) in node.files.iter().flatten() {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", prefix, name)
        };
        if !is_plain_name(name) {
            return Err(format!("invalid entry name \"{}\"", path));
        }
        validate_tree(child, &path)?;
    }
    Ok(())
}

/// Reads and parses the header of the archive at `path`.
///
/// Entry names must be plain path components and links must stay inside the
/// archive; anything else is [`Error::ArchiveFormat`].
pub async fn read_raw_header(path: &Path) -> Result<RawHeader> {
    let format_error = |reason: &str| Error::ArchiveFormat {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut file = tokio::fs::File::open(path)
        .await
        .fs_context("opening archive", path)?;

    let mut size_pickle = [0u8; SIZE_PICKLE_LEN as usize];
    file.read_exact(&mut size_pickle)
        .await
        .map_err(|_| format_error("truncated size pickle"))?;
    let header_size =
        read_u32(&size_pickle, 4).ok_or_else(|| format_error("truncated size pickle"))?;
    if header_size < 8 || header_size > MAX_HEADER_LEN {
        return Err(format_error("implausible header size"));
    }

    let mut header_pickle = vec![0u8; header_size as usize];
    file.read_exact(&mut header_pickle)
        .await
        .map_err(|_| format_error("truncated header"))?;

    let json_len =
        read_u32(&header_pickle, 4).ok_or_else(|| format_error("truncated header"))? as usize;
    let json = header_pickle
        .get(8..8 + json_len)
        .ok_or_else(|| format_error("header string exceeds header pickle"))?;
    let header_string = String::from_utf8(json.to_vec())
        .map_err(|_| format_error("header is not valid UTF-8"))?;

    let header: Node = serde_json::from_str(&header_string)?;
    if !header.is_directory() {
        return Err(format_error("root node is not a directory"));
    }
    validate_tree(&header, "").map_err(|reason| format_error(&reason))?;

    Ok(RawHeader {
        header_string,
        header,
        header_size,
    })
}

/// Serializes `root` and frames it as size pickle + header pickle.
pub fn encode_header(root: &Node) -> Result<Vec<u8>> {
    let json = serde_json::to_string(root)?;
    let json_len = json.len();
    let padded_len = json_len.div_ceil(4) * 4;
    let header_pickle_len = 8 + padded_len;

    let mut out = Vec::with_capacity(SIZE_PICKLE_LEN as usize + header_pickle_len);
    out.extend_from_slice(&4u32.to_le_bytes());
    out.extend_from_slice(&(header_pickle_len as u32).to_le_bytes());
    out.extend_from_slice(&((4 + padded_len) as u32).to_le_bytes());
    out.extend_from_slice(&(json_len as u32).to_le_bytes());
    out.extend_from_slice(json.as_bytes());
    out.resize(SIZE_PICKLE_LEN as usize + header_pickle_len, 0);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_json_shape() {
        let mut root = Node::directory();
        let file = Node {
            size: Some(3),
            offset: Some("0".into()),
            executable: true,
            ..Default::default()
        };
        root.files.as_mut().unwrap().insert("a.js".into(), file);

        let json = serde_json::to_string(&root).unwrap();
        assert_eq!(
            json,
            r#"{"files":{"a.js":{"size":3,"offset":"0","executable":true}}}"#
        );
    }

    #[tokio::test]
    async fn test_header_framing_is_aligned() {
        let root = Node::directory();
        let encoded = encode_header(&root).unwrap();
        // {"files":{}} is 12 bytes, already aligned
        assert_eq!(encoded.len(), 8 + 8 + 12);
        assert_eq!(read_u32(&encoded, 0), Some(4));
        assert_eq!(read_u32(&encoded, 4), Some(20));
        assert_eq!(read_u32(&encoded, 8), Some(16));
        assert_eq!(read_u32(&encoded, 12), Some(12));

        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("empty.asar");
        std::fs::write(&path, &encoded).unwrap();

        let raw = read_raw_header(&path).await.unwrap();
        assert_eq!(raw.header_string, r#"{"files":{}}"#);
        assert_eq!(raw.data_offset(), encoded.len() as u64);
    }

    #[tokio::test]
    async fn test_truncated_archive_rejected() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("bad.asar");
        std::fs::write(&path, [4, 0, 0, 0, 200, 0, 0, 0, 1]).unwrap();

        let err = read_raw_header(&path).await.unwrap_err();
        assert!(matches!(err, Error::ArchiveFormat { .. }));
    }

    fn file_node() -> Node {
        Node {
            size: Some(0),
            offset: Some("0".into()),
            ..Default::default()
        }
    }

    async fn read_with_child(name: &str, child: Node) -> Result<RawHeader> {
        let mut root = Node::directory();
        root.files.as_mut().unwrap().insert(name.into(), child);
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("crafted.asar");
        std::fs::write(&path, encode_header(&root).unwrap()).unwrap();
        read_raw_header(&path).await
    }

    #[tokio::test]
    async fn test_escaping_entry_names_rejected() {
        for name in ["..", ".", "", "../evil", "a/b", "..\\evil"] {
            let err = read_with_child(name, file_node()).await.unwrap_err();
            assert!(
                matches!(err, Error::ArchiveFormat { .. }),
                "{:?} was accepted",
                name
            );
        }

        let mut lib = Node::directory();
        lib.files.as_mut().unwrap().insert("..".into(), file_node());
        let err = read_with_child("lib", lib).await.unwrap_err();
        assert!(err.to_string().contains("lib/.."));

        assert!(read_with_child("..hidden", file_node()).await.is_ok());
    }

    #[tokio::test]
    async fn test_escaping_link_rejected() {
        let link = Node {
            link: Some("../../outside".into()),
            ..Default::default()
        };
        let err = read_with_child("escape", link).await.unwrap_err();
        assert!(matches!(err, Error::ArchiveFormat { .. }));

        let inside = Node {
            link: Some("lib/index.js".into()),
            ..Default::default()
        };
        assert!(read_with_child("alias", inside).await.is_ok());
    }
}
