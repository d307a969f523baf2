//! Native-binary inspection.
//!
//! The classifier asks an inspector whether a file holds Mach-O or universal
//! machine code. [`FileCommandInspector`] shells out to `file(1)`;
//! [`MagicInspector`] reads the magic number directly.

use super::{HEADER_PREFIX_LEN, is_native_header, tool_detection};
use crate::merger::error::{Error, ErrorExt, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

/// Prefix of `file --brief` output for Mach-O and universal binaries.
const MACHO_PREFIX: &str = "Mach-O ";

/// Decides whether a file is a native binary.
pub trait NativeBinaryInspector: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether this inspector can run on the current host.
    fn host_supported(&self) -> bool {
        true
    }

    /// Whether the file at `path` holds Mach-O or universal machine code.
    fn is_native_binary(&self, path: &Path) -> impl Future<Output = Result<bool>> + Send;
}

/// Reads up to [`HEADER_PREFIX_LEN`] bytes from the start of `path`.
///
/// Shorter files are returned whole.
pub async fn read_header_prefix(path: &Path) -> Result<Vec<u8>> {
    let file = tokio::fs::File::open(path)
        .await
        .fs_context("opening file for type detection", path)?;
    let mut header = Vec::with_capacity(HEADER_PREFIX_LEN);
    file.take(HEADER_PREFIX_LEN as u64)
        .read_to_end(&mut header)
        .await
        .fs_context("reading file header", path)?;
    Ok(header)
}

/// Recognizes native binaries by their magic number and fat header.
#[derive(Clone, Copy, Debug, Default)]
pub struct MagicInspector;

impl NativeBinaryInspector for MagicInspector {
    fn name(&self) -> &'static str {
        "magic"
    }

    async fn is_native_binary(&self, path: &Path) -> Result<bool> {
        Ok(is_native_header(&read_header_prefix(path).await?))
    }
}

/// Recognizes native binaries with `file --brief --no-pad`.
///
/// A non-zero exit from `file` means "no signal", never an error.
#[derive(Clone, Debug)]
pub struct FileCommandInspector {
    program: PathBuf,
}

impl FileCommandInspector {
    /// Runs `program` in place of the detected `file`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FileCommandInspector {
    fn default() -> Self {
        Self::new(
            tool_detection::FILE_PATH
                .clone()
                .unwrap_or_else(|| PathBuf::from("file")),
        )
    }
}

impl NativeBinaryInspector for FileCommandInspector {
    fn name(&self) -> &'static str {
        "file"
    }

    fn host_supported(&self) -> bool {
        tool_detection::has_file()
    }

    async fn is_native_binary(&self, path: &Path) -> Result<bool> {
        let output = tokio::process::Command::new(&self.program)
            .arg("--brief")
            .arg("--no-pad")
            .arg(path)
            .output()
            .await
            .map_err(|e| Error::CommandFailed {
                command: format!("file --brief --no-pad {}", path.display()),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            // Malformed binaries make `file` exit non-zero
            log::debug!(
                "file exited with {:?} for {}, treating as unclassified",
                output.status.code(),
                path.display()
            );
            return Ok(false);
        }

        Ok(String::from_utf8_lossy(&output.stdout).starts_with(MACHO_PREFIX))
    }
}

/// Inspector chosen at runtime.
#[derive(Clone, Debug)]
pub enum AnyInspector {
    /// `file(1)`
    File(FileCommandInspector),
    /// Direct magic-number inspection
    Magic(MagicInspector),
}

impl AnyInspector {
    /// `file` when it is installed, otherwise magic-number inspection.
    pub fn auto() -> Self {
        if tool_detection::has_file() {
            Self::File(FileCommandInspector::default())
        } else {
            Self::Magic(MagicInspector)
        }
    }
}

impl NativeBinaryInspector for AnyInspector {
    fn name(&self) -> &'static str {
        match self {
            Self::File(inner) => inner.name(),
            Self::Magic(inner) => inner.name(),
        }
    }

    fn host_supported(&self) -> bool {
        match self {
            Self::File(inner) => inner.host_supported(),
            Self::Magic(inner) => inner.host_supported(),
        }
    }

    async fn is_native_binary(&self, path: &Path) -> Result<bool> {
        match self {
            Self::File(inner) => inner.is_native_binary(path).await,
            Self::Magic(inner) => inner.is_native_binary(path).await,
        }
    }
}
