//! Mach-O detection and fusion.
//!
//! Decides, per native binary shared by both builds, whether it is already
//! universal, architecture generic, or needs fusing, and records every path
//! that was settled so later stages can ignore the difference.
//!
//! # Module Organization
//!
//! - [`inspector`] - native-binary detection ([`NativeBinaryInspector`])
//! - [`fuser`] - universal binary creation ([`BinaryFuser`])
//! - [`tool_detection`] - `lipo` / `file` availability

pub mod fuser;
pub mod inspector;
pub mod tool_detection;

pub use fuser::{AnyFuser, BinaryFuser, FatBinaryFuser, LipoFuser};
pub use inspector::{AnyInspector, FileCommandInspector, MagicInspector, NativeBinaryInspector};

use crate::merger::{
    checksum::calculate_sha256,
    error::{Error, ErrorExt, Result},
    utils::glob::{GlobRule, describe_rule},
};
use goblin::mach::{
    cputype::{
        CPU_TYPE_ARM, CPU_TYPE_ARM64, CPU_TYPE_ARM64_32, CPU_TYPE_POWERPC, CPU_TYPE_POWERPC64,
        CPU_TYPE_X86, CPU_TYPE_X86_64,
    },
    fat::{FAT_CIGAM, FAT_MAGIC},
    header::{MH_CIGAM, MH_CIGAM_64, MH_MAGIC, MH_MAGIC_64},
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const THIN_MAGICS: [u32; 4] = [MH_MAGIC, MH_CIGAM, MH_MAGIC_64, MH_CIGAM_64];

/// Largest `nfat_arch` accepted. Java class files share the fat magic and keep
/// their major version (45 or higher) in the same field.
const MAX_FAT_ARCHES: u32 = 20;

/// Size of a `fat_arch` record.
const FAT_ARCH_LEN: usize = 20;

/// Bytes needed to classify any file: the fat header plus every `fat_arch`.
pub const HEADER_PREFIX_LEN: usize = 8 + FAT_ARCH_LEN * MAX_FAT_ARCHES as usize;

const FAT_CPU_TYPES: [u32; 7] = [
    CPU_TYPE_X86,
    CPU_TYPE_X86_64,
    CPU_TYPE_ARM,
    CPU_TYPE_ARM64,
    CPU_TYPE_ARM64_32,
    CPU_TYPE_POWERPC,
    CPU_TYPE_POWERPC64,
];

fn magic_of(bytes: &[u8]) -> Option<u32> {
    let head: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(head))
}

/// Whether `bytes` starts with a thin Mach-O magic number (either byte order).
pub fn is_thin_magic(bytes: &[u8]) -> bool {
    magic_of(bytes).is_some_and(|m| THIN_MAGICS.contains(&m))
}

/// Whether `bytes` starts with a plausible universal (fat) header.
///
/// The magic alone is ambiguous (`CAFEBABE` also opens Java class files), so
/// the architecture count must be small and every `fat_arch` entry must name a
/// known CPU type. `bytes` should hold at least [`HEADER_PREFIX_LEN`] bytes or
/// the whole file.
pub fn is_universal_header(bytes: &[u8]) -> bool {
    let read: fn([u8; 4]) -> u32 = match magic_of(bytes) {
        Some(FAT_CIGAM) => u32::from_be_bytes,
        Some(FAT_MAGIC) => u32::from_le_bytes,
        _ => return false,
    };
    let field = |at: usize| -> Option<u32> {
        let word: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
        Some(read(word))
    };

    let Some(count) = field(4) else {
        return false;
    };
    if count == 0 || count > MAX_FAT_ARCHES {
        return false;
    }
    (0..count as usize).all(|index| {
        field(8 + FAT_ARCH_LEN * index).is_some_and(|cputype| FAT_CPU_TYPES.contains(&cputype))
    })
}

/// Whether `bytes` starts with a thin Mach-O magic or a universal header.
pub fn is_native_header(bytes: &[u8]) -> bool {
    is_thin_magic(bytes) || is_universal_header(bytes)
}

/// Paths whose native-binary pair was fused or already universal.
#[derive(Clone, Debug, Default)]
pub struct FusionRecord {
    paths: BTreeSet<PathBuf>,
}

impl FusionRecord {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a settled bundle-relative path.
    pub fn insert(&mut self, relative_path: impl Into<PathBuf>) {
        self.paths.insert(relative_path.into());
    }

    /// Whether `relative_path` was settled.
    pub fn contains(&self, relative_path: &Path) -> bool {
        self.paths.contains(relative_path)
    }

    /// Settled paths in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }

    /// Number of settled paths.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether nothing was settled.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// What happened to one native binary pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachOOutcome {
    /// Both sides were already universal; left untouched.
    AlreadyUniversal,
    /// Identical on both sides and allow-listed; left untouched.
    ArchitectureGeneric,
    /// Fused into a universal binary at the x64 path.
    Fused,
}

/// Merges the native binary at `relative_path` in place inside `x64_app`.
///
/// `x64_app` is the scratch copy being mutated; `arm64_app` is read only.
///
/// # Errors
///
/// - [`Error::UncoveredSingleArch`] if both sides are identical and the path is
///   not covered by `x64_arch_files`
/// - [`Error::UnreconcilableBinary`] if the x64 side is not a thin Mach-O
/// - [`Error::CommandFailed`] if fusion fails
pub async fn merge_macho_file<F: BinaryFuser>(
    relative_path: &Path,
    x64_app: &Path,
    arm64_app: &Path,
    x64_arch_files: Option<&GlobRule>,
    fuser: &F,
) -> Result<MachOOutcome> {
    let first = tokio::fs::canonicalize(x64_app.join(relative_path))
        .await
        .fs_context("resolving x64 binary", x64_app.join(relative_path))?;
    let second = tokio::fs::canonicalize(arm64_app.join(relative_path))
        .await
        .fs_context("resolving arm64 binary", arm64_app.join(relative_path))?;

    let x64_header = inspector::read_header_prefix(&first).await?;
    let arm64_header = inspector::read_header_prefix(&second).await?;

    if is_universal_header(&x64_header) && is_universal_header(&arm64_header) {
        log::debug!(
            "{} is already universal in both builds",
            relative_path.display()
        );
        return Ok(MachOOutcome::AlreadyUniversal);
    }

    let x64_sha = calculate_sha256(&first).await?;
    let arm64_sha = calculate_sha256(&second).await?;

    if x64_sha == arm64_sha {
        let covered = x64_arch_files.is_some_and(|rule| rule.matches(relative_path));
        if !covered {
            return Err(Error::UncoveredSingleArch {
                path: relative_path.display().to_string(),
                origin: "that's the same in both x64 and arm64 builds and".to_string(),
                option: "x64ArchFiles",
                rule: describe_rule(x64_arch_files),
            });
        }
        log::debug!(
            "SHA for Mach-O file {} matches across builds {}, skipping fusion",
            relative_path.display(),
            x64_sha
        );
        return Ok(MachOOutcome::ArchitectureGeneric);
    }

    if !is_thin_magic(&x64_header) {
        return Err(Error::UnreconcilableBinary {
            path: relative_path.to_path_buf(),
        });
    }

    log::debug!(
        "joining two Mach-O files with {}: {} + {}",
        fuser.name(),
        first.display(),
        second.display()
    );
    fuser.fuse(&first, &second, &first).await?;

    Ok(MachOOutcome::Fused)
}


#[cfg(test)]
mod tests {
    use super::test_support::{fat_macho, java_class, thin_macho};
    use super::*;
    use goblin::mach::cputype::{CPU_TYPE_ARM64, CPU_TYPE_X86_64};
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, bytes: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_magic_detection() {
        let thin = thin_macho(CPU_TYPE_ARM64, b"");
        assert!(is_thin_magic(&thin));
        assert!(!is_universal_header(&thin));
        assert!(is_universal_header(&fat_macho(b"code")));
        assert!(is_native_header(&[0xce, 0xfa, 0xed, 0xfe]));
        assert!(!is_native_header(b"PK"));
    }

    #[test]
    fn test_java_class_is_not_universal() {
        assert!(!is_universal_header(&java_class(b"\x00\x10rest of class")));
        // bare magic with no architecture table
        assert!(!is_universal_header(&[0xca, 0xfe, 0xba, 0xbe]));

        // plausible count but an unknown cputype in the first entry
        let mut bogus = vec![0xca, 0xfe, 0xba, 0xbe, 0x00, 0x00, 0x00, 0x01];
        bogus.extend_from_slice(&[0x00, 0x00, 0x00, 0x2d]);
        bogus.extend_from_slice(&[0u8; 16]);
        assert!(!is_universal_header(&bogus));

        // truncated architecture table
        let fat = fat_macho(b"code");
        assert!(!is_universal_header(&fat[..20]));
    }

    #[tokio::test]
    async fn test_fuses_differing_binaries() {
        let temp = TempDir::new().unwrap();
        let (x64, arm64) = (temp.path().join("x64"), temp.path().join("arm64"));
        write(&x64, "Contents/MacOS/App", &thin_macho(CPU_TYPE_X86_64, b"x"));
        write(&arm64, "Contents/MacOS/App", &thin_macho(CPU_TYPE_ARM64, b"a"));

        let outcome = merge_macho_file(
            Path::new("Contents/MacOS/App"),
            &x64,
            &arm64,
            None,
            &FatBinaryFuser,
        )
        .await
        .unwrap();

        assert_eq!(outcome, MachOOutcome::Fused);
        let fused = std::fs::read(x64.join("Contents/MacOS/App")).unwrap();
        assert!(is_universal_header(&fused));
    }

    #[tokio::test]
    async fn test_identical_binary_needs_allow_list() {
        let temp = TempDir::new().unwrap();
        let (x64, arm64) = (temp.path().join("x64"), temp.path().join("arm64"));
        let same = thin_macho(CPU_TYPE_X86_64, b"same");
        write(&x64, "Contents/Resources/helper", &same);
        write(&arm64, "Contents/Resources/helper", &same);
        let rel = Path::new("Contents/Resources/helper");

        let err = merge_macho_file(rel, &x64, &arm64, None, &FatBinaryFuser)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UncoveredSingleArch { .. }));
        assert!(err.to_string().contains("Contents/Resources/helper"));

        let rule = GlobRule::new("helper").unwrap();
        let outcome = merge_macho_file(rel, &x64, &arm64, Some(&rule), &FatBinaryFuser)
            .await
            .unwrap();
        assert_eq!(outcome, MachOOutcome::ArchitectureGeneric);
    }

    #[tokio::test]
    async fn test_both_universal_skips_fusion() {
        let temp = TempDir::new().unwrap();
        let (x64, arm64) = (temp.path().join("x64"), temp.path().join("arm64"));
        write(&x64, "lib.dylib", &fat_macho(b"intel build"));
        write(&arm64, "lib.dylib", &fat_macho(b"apple build"));

        let outcome =
            merge_macho_file(Path::new("lib.dylib"), &x64, &arm64, None, &FatBinaryFuser)
                .await
                .unwrap();
        assert_eq!(outcome, MachOOutcome::AlreadyUniversal);
    }

    #[tokio::test]
    async fn test_non_thin_x64_is_unreconcilable() {
        let temp = TempDir::new().unwrap();
        let (x64, arm64) = (temp.path().join("x64"), temp.path().join("arm64"));
        write(&x64, "weird", &fat_macho(b"x"));
        write(&arm64, "weird", &thin_macho(CPU_TYPE_ARM64, b"a"));

        let err = merge_macho_file(Path::new("weird"), &x64, &arm64, None, &FatBinaryFuser)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnreconcilableBinary { .. }));
    }

    #[tokio::test]
    async fn test_differing_java_classes_are_not_treated_as_universal() {
        let temp = TempDir::new().unwrap();
        let (x64, arm64) = (temp.path().join("x64"), temp.path().join("arm64"));
        write(&x64, "Main.class", &java_class(b"intel"));
        write(&arm64, "Main.class", &java_class(b"apple"));

        let err = merge_macho_file(Path::new("Main.class"), &x64, &arm64, None, &FatBinaryFuser)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnreconcilableBinary { .. }));
    }
}
