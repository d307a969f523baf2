//! Error types for universal app merging.
//!
//! Every merge failure is fatal and surfaces as one [`Error`]. The first group of
//! variants describes why two builds cannot be reconciled; the rest carry
//! filesystem, codec and external tool failures with enough context to act on.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for merge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for all merge operations
#[derive(Error, Debug)]
pub enum Error {
    /// Bad host platform, relative paths, or pre-existing output without force
    #[error("Validation error: {0}")]
    Validation(String),

    /// Archive presence disagrees between the two inputs
    #[error(
        "Both the x64 and arm64 versions of your application need to have been built with \
         the same asar settings (x64 has app.asar: {x64_has_asar}, arm64 has app.asar: {arm64_has_asar})"
    )]
    ModeMismatch {
        /// Whether the x64 bundle ships `app.asar`
        x64_has_asar: bool,
        /// Whether the arm64 bundle ships `app.asar`
        arm64_has_asar: bool,
    },

    /// Required files exist on only one side
    #[error(
        "Files were not present in both builds.\n  Unique to x64: {}\n  Unique to arm64: {}",
        display_paths(unique_to_x64),
        display_paths(unique_to_arm64)
    )]
    StructuralParity {
        /// Relative paths only present in the x64 build
        unique_to_x64: Vec<PathBuf>,
        /// Relative paths only present in the arm64 build
        unique_to_arm64: Vec<PathBuf>,
    },

    /// A plain file differs without a named exception
    #[error(
        "Expected all non-binary files to have identical SHAs when creating a universal build \
         but \"{}\" did not ({x64_sha} != {arm64_sha})",
        path.display()
    )]
    ContentMismatch {
        /// Relative path of the offending file
        path: PathBuf,
        /// SHA-256 of the x64 copy
        x64_sha: String,
        /// SHA-256 of the arm64 copy
        arm64_sha: String,
    },

    /// Two differing files at a shared path are not fusable native binaries
    #[error("Can't reconcile two non-macho files \"{}\"", path.display())]
    UnreconcilableBinary {
        /// Path of the file (bundle-relative or archive entry)
        path: PathBuf,
    },

    /// A uniquely-present or architecture-generic file is not allow-listed
    #[error("Detected file \"{path}\" {origin} not covered by the {option} rule: {rule}")]
    UncoveredSingleArch {
        /// Offending path
        path: String,
        /// Where the file was found
        origin: String,
        /// Name of the option that would cover it
        option: &'static str,
        /// The rule as configured, or `<unset>`
        rule: String,
    },

    /// Non-integrity property-list content differs across inputs
    #[error(
        "Expected all Info.plist files to be identical when ignoring integrity when creating \
         a universal build but \"{}\" was not",
        path.display()
    )]
    PlistFieldMismatch {
        /// Relative path of the plist
        path: PathBuf,
    },

    /// Filesystem operation failed on a specific path
    #[error("{context} ({}): {source}", path.display())]
    Fs {
        /// What was being attempted
        context: String,
        /// Path involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// IO errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Property list errors
    #[error("Property list error: {0}")]
    Plist(#[from] plist::Error),

    /// Invalid glob rule
    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] glob::PatternError),

    /// Malformed packed-resource archive
    #[error("Invalid archive {}: {reason}", path.display())]
    ArchiveFormat {
        /// Archive path
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },

    /// External tool exited unsuccessfully
    #[error("Command failed: {command} - {reason}")]
    CommandFailed {
        /// Command line that failed
        command: String,
        /// Exit status and stderr
        reason: String,
    },

    /// Error with an added description of what was being attempted
    #[error("{context}: {source}")]
    Context {
        /// Description of the failed step
        context: String,
        /// Underlying error
        source: Box<Error>,
    },

    /// Anything else
    #[error("{0}")]
    GenericError(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "(none)".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Strips [`Error::Context`] layers and returns the underlying error.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Attaches the failing path to filesystem errors.
pub trait ErrorExt<T> {
    /// Wraps an I/O error as [`Error::Fs`] naming `context` and `path`.
    fn fs_context(self, context: &str, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> ErrorExt<T> for std::result::Result<T, std::io::Error> {
    fn fs_context(self, context: &str, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|source| Error::Fs {
            context: context.to_string(),
            path: path.as_ref().to_path_buf(),
            source,
        })
    }
}

/// anyhow-style context for options and merge results.
pub trait Context<T> {
    /// Converts a missing value or error into one described by `context`.
    fn context<C: Display>(self, context: C) -> Result<T>;

    /// Like [`Context::context`], building the description lazily.
    fn with_context<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T>;
}

impl<T> Context<T> for Option<T> {
    fn context<C: Display>(self, context: C) -> Result<T> {
        self.ok_or_else(|| Error::GenericError(context.to_string()))
    }

    fn with_context<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.ok_or_else(|| Error::GenericError(f().to_string()))
    }
}

impl<T> Context<T> for Result<T> {
    fn context<C: Display>(self, context: C) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: context.to_string(),
            source: Box::new(e),
        })
    }

    fn with_context<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: f().to_string(),
            source: Box::new(e),
        })
    }
}

/// Returns early with an [`Error::GenericError`] built from a format string.
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::merger::Error::GenericError(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_preserves_root() {
        let result: Result<()> = Err(Error::UnreconcilableBinary {
            path: PathBuf::from("a.node"),
        });
        let err = result.context("merging archive").unwrap_err();

        assert!(err.to_string().starts_with("merging archive: "));
        assert!(matches!(err.root(), Error::UnreconcilableBinary { .. }));
    }

    #[test]
    fn test_fs_context_names_path() {
        let io: std::io::Result<()> = Err(std::io::Error::other("boom"));
        let err = io.fs_context("reading plist", "/tmp/Info.plist").unwrap_err();

        assert_eq!(err.to_string(), "reading plist (/tmp/Info.plist): boom");
    }

    #[test]
    fn test_parity_lists_both_sides() {
        let err = Error::StructuralParity {
            unique_to_x64: vec![PathBuf::from("Contents/x.dylib")],
            unique_to_arm64: vec![],
        };
        let msg = err.to_string();

        assert!(msg.contains("Contents/x.dylib"));
        assert!(msg.contains("Unique to arm64: (none)"));
    }
}
