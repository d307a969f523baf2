//! Universal macOS app merger library
//!
//! This library merges an x64 and an arm64 build of the same macOS
//! application bundle into one universal bundle:
//! - native binaries are fused into fat Mach-O files
//! - `app.asar` archives are merged, or shimmed per architecture
//! - archive header integrity is written into `Info.plist`
//!
//! It can be used both as a CLI tool and as a library dependency.

pub mod cli;
pub mod error;
pub mod merger;

// Re-export commonly used types
pub use error::{CliError, Result, UniversalError};
pub use merger::{MergeOptions, MergeOptionsBuilder, MergeReport, Merger, make_universal_app};
