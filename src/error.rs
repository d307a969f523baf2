//! Top-level error types for the command line tool.
//!
//! Wraps merge failures and CLI misuse, with recovery hints printed next to
//! the error.

use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, UniversalError>;

/// Main error type for the command line tool
#[derive(Error, Debug)]
pub enum UniversalError {
    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Merge errors
    #[error("Merge error: {0}")]
    Merge(#[from] crate::merger::Error),
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },
}

impl UniversalError {
    /// Get actionable recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        use crate::merger::Error as MergeError;

        let UniversalError::Merge(merge) = self else {
            return vec!["Run with --help to see the expected arguments".to_string()];
        };

        match merge.root() {
            MergeError::Validation(_) => vec![
                "Pass absolute paths to existing .app bundles".to_string(),
                "Use --force to replace an existing output bundle".to_string(),
            ],
            MergeError::ModeMismatch { .. } => {
                vec!["Build both architectures with the same asar setting".to_string()]
            }
            MergeError::UncoveredSingleArch { option, .. } => vec![format!(
                "Cover the file with the {} rule if it is meant to differ",
                option
            )],
            MergeError::StructuralParity { .. } | MergeError::ContentMismatch { .. } => vec![
                "Make sure both builds come from the same source revision".to_string(),
            ],
            MergeError::CommandFailed { .. } => vec![
                "Install the Xcode Command Line Tools or pass --fuser builtin".to_string(),
            ],
            _ => vec!["Run with --verbose for per-file details".to_string()],
        }
    }
}
