//! Binary fusion: combining an x64 and an arm64 thin binary into one
//! universal binary.
//!
//! [`LipoFuser`] delegates to Apple's `lipo`. [`FatBinaryFuser`] writes the fat
//! header itself, so merges also work on hosts without Xcode tools.

use super::{is_universal_header, tool_detection};
use crate::merger::error::{Error, ErrorExt, Result};
use goblin::mach::{
    cputype::{CPU_TYPE_ARM64, get_arch_name_from_types},
    fat::FAT_MAGIC,
    header::{MH_CIGAM, MH_CIGAM_64, MH_MAGIC, MH_MAGIC_64},
};
use std::future::Future;
use std::path::{Path, PathBuf};

/// Combines two thin binaries into a universal binary.
pub trait BinaryFuser: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether this fuser can run on the current host.
    fn host_supported(&self) -> bool;

    /// Fuses `x64` and `arm64` into `output`. `output` may be one of the inputs.
    fn fuse(
        &self,
        x64: &Path,
        arm64: &Path,
        output: &Path,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Fuses with `lipo -create`.
///
/// A non-zero exit is fatal.
#[derive(Clone, Debug)]
pub struct LipoFuser {
    program: PathBuf,
}

impl LipoFuser {
    /// Runs `program` in place of the detected `lipo`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for LipoFuser {
    fn default() -> Self {
        Self::new(
            tool_detection::LIPO_PATH
                .clone()
                .unwrap_or_else(|| PathBuf::from("lipo")),
        )
    }
}

impl BinaryFuser for LipoFuser {
    fn name(&self) -> &'static str {
        "lipo"
    }

    fn host_supported(&self) -> bool {
        cfg!(target_os = "macos") || tool_detection::has_lipo()
    }

    async fn fuse(&self, x64: &Path, arm64: &Path, output: &Path) -> Result<()> {
        let command = format!(
            "lipo {} {} -create -output {}",
            x64.display(),
            arm64.display(),
            output.display()
        );
        log::debug!("{}", command);

        let result = tokio::process::Command::new(&self.program)
            .arg(x64)
            .arg(arm64)
            .arg("-create")
            .arg("-output")
            .arg(output)
            .output()
            .await
            .map_err(|e| Error::CommandFailed {
                command: command.clone(),
                reason: format!(
                    "failed to execute lipo: {}. Ensure Xcode Command Line Tools are installed.",
                    e
                ),
            })?;

        if !result.status.success() {
            return Err(Error::CommandFailed {
                command,
                reason: format!(
                    "exit code {:?}: {}",
                    result.status.code(),
                    String::from_utf8_lossy(&result.stderr).trim()
                ),
            });
        }

        Ok(())
    }
}

/// Alignment (as a power of two) lipo uses for each slice.
fn slice_alignment(cputype: u32) -> u32 {
    if cputype == CPU_TYPE_ARM64 { 14 } else { 12 }
}

fn align_up(value: u64, align_pow: u32) -> u64 {
    let align = 1u64 << align_pow;
    value.div_ceil(align) * align
}

/// CPU identification read from a thin Mach-O header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThinHeader {
    /// `cputype` field
    pub cputype: u32,
    /// `cpusubtype` field
    pub cpusubtype: u32,
}

impl ThinHeader {
    /// Parses the magic, cputype and cpusubtype of a thin Mach-O image.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 12 {
            return None;
        }
        let word = |at: usize| -> [u8; 4] { [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]] };
        let magic = u32::from_le_bytes(word(0));

        let read: fn([u8; 4]) -> u32 = match magic {
            MH_MAGIC | MH_MAGIC_64 => u32::from_le_bytes,
            MH_CIGAM | MH_CIGAM_64 => u32::from_be_bytes,
            _ => return None,
        };

        Some(Self {
            cputype: read(word(4)),
            cpusubtype: read(word(8)),
        })
    }

    /// Architecture name as `lipo -info` would print it.
    pub fn arch_name(&self) -> &'static str {
        get_arch_name_from_types(self.cputype, self.cpusubtype).unwrap_or("unknown")
    }
}

/// Builds a fat binary from thin slices, in the given order.
pub fn build_fat_binary(slices: &[&[u8]]) -> Result<Vec<u8>> {
    let mut headers = Vec::with_capacity(slices.len());
    for (index, slice) in slices.iter().enumerate() {
        if is_universal_header(slice) {
            return Err(Error::GenericError(format!(
                "slice {} is already a universal binary",
                index
            )));
        }
        let header = ThinHeader::parse(slice).ok_or_else(|| {
            Error::GenericError(format!("slice {} is not a thin Mach-O binary", index))
        })?;
        if headers.iter().any(|h: &ThinHeader| h.cputype == header.cputype) {
            return Err(Error::GenericError(format!(
                "both slices have the same architecture ({})",
                header.arch_name()
            )));
        }
        headers.push(header);
    }

    // fat_header + one fat_arch per slice, all big-endian
    let header_len = 8 + 20 * slices.len() as u64;
    let mut layout = Vec::with_capacity(slices.len());
    let mut cursor = header_len;
    for (header, slice) in headers.iter().zip(slices) {
        let align = slice_alignment(header.cputype);
        let offset = align_up(cursor, align);
        let size = slice.len() as u64;
        if offset + size > u64::from(u32::MAX) {
            return Err(Error::GenericError(
                "universal binary exceeds the 4 GiB fat32 limit; use lipo".into(),
            ));
        }
        layout.push((offset as u32, size as u32, align));
        cursor = offset + size;
    }

    let mut out = Vec::with_capacity(cursor as usize);
    out.extend_from_slice(&FAT_MAGIC.to_be_bytes());
    out.extend_from_slice(&(slices.len() as u32).to_be_bytes());
    for (header, (offset, size, align)) in headers.iter().zip(&layout) {
        for field in [header.cputype, header.cpusubtype, *offset, *size, *align] {
            out.extend_from_slice(&field.to_be_bytes());
        }
    }
    for (slice, (offset, _, _)) in slices.iter().zip(&layout) {
        out.resize(*offset as usize, 0);
        out.extend_from_slice(slice);
    }

    Ok(out)
}

/// Writes universal binaries without external tools.
#[derive(Clone, Copy, Debug, Default)]
pub struct FatBinaryFuser;

impl BinaryFuser for FatBinaryFuser {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn host_supported(&self) -> bool {
        true
    }

    async fn fuse(&self, x64: &Path, arm64: &Path, output: &Path) -> Result<()> {
        let x64_bytes = tokio::fs::read(x64)
            .await
            .fs_context("reading x64 binary", x64)?;
        let arm64_bytes = tokio::fs::read(arm64)
            .await
            .fs_context("reading arm64 binary", arm64)?;
        let permissions = tokio::fs::metadata(x64)
            .await
            .fs_context("reading metadata", x64)?
            .permissions();

        let fat = build_fat_binary(&[&x64_bytes, &arm64_bytes]).map_err(|e| {
            Error::CommandFailed {
                command: format!("fuse {} {}", x64.display(), arm64.display()),
                reason: e.to_string(),
            }
        })?;

        tokio::fs::write(output, fat)
            .await
            .fs_context("writing universal binary", output)?;
        tokio::fs::set_permissions(output, permissions)
            .await
            .fs_context("setting permissions", output)?;

        log::debug!(
            "wrote universal binary {} (x86_64 + arm64)",
            output.display()
        );
        Ok(())
    }
}

/// Fuser chosen at runtime.
#[derive(Clone, Debug)]
pub enum AnyFuser {
    /// Apple's `lipo`
    Lipo(LipoFuser),
    /// Built-in fat header writer
    Builtin(FatBinaryFuser),
}

impl AnyFuser {
    /// `lipo` when it is installed, otherwise the built-in writer.
    pub fn auto() -> Self {
        if tool_detection::has_lipo() {
            Self::Lipo(LipoFuser::default())
        } else {
            Self::Builtin(FatBinaryFuser)
        }
    }
}

impl BinaryFuser for AnyFuser {
    fn name(&self) -> &'static str {
        match self {
            Self::Lipo(inner) => inner.name(),
            Self::Builtin(inner) => inner.name(),
        }
    }

    fn host_supported(&self) -> bool {
        match self {
            Self::Lipo(inner) => inner.host_supported(),
            Self::Builtin(inner) => inner.host_supported(),
        }
    }

    async fn fuse(&self, x64: &Path, arm64: &Path, output: &Path) -> Result<()> {
        match self {
            Self::Lipo(inner) => inner.fuse(x64, arm64, output).await,
            Self::Builtin(inner) => inner.fuse(x64, arm64, output).await,
        }
    }
}
