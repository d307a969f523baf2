//! External tool detection and availability checking.
//!
//! `lipo` fuses thin binaries and `file` sniffs file types. Both are optional:
//! built-in implementations take over when they are missing.

use std::path::PathBuf;
use std::sync::LazyLock;

/// Path to `lipo`, if installed.
///
/// Cached result to avoid repeated lookups while merging.
pub static LIPO_PATH: LazyLock<Option<PathBuf>> = LazyLock::new(|| detect("lipo"));

/// Path to `file`, if installed.
pub static FILE_PATH: LazyLock<Option<PathBuf>> = LazyLock::new(|| detect("file"));

/// Check if lipo is available for binary fusion.
pub fn has_lipo() -> bool {
    LIPO_PATH.is_some()
}

/// Check if the `file` command is available for type sniffing.
pub fn has_file() -> bool {
    FILE_PATH.is_some()
}

fn detect(tool: &str) -> Option<PathBuf> {
    match which::which(tool) {
        Ok(path) => {
            log::debug!("Found {} at: {}", tool, path.display());
            Some(path)
        }
        Err(e) => {
            log::debug!(
                "{} not found in PATH: {}. Falling back to the built-in implementation.",
                tool,
                e
            );
            None
        }
    }
}
