//! Universal macOS app merging.
//!
//! Takes an x64 and an arm64 build of the same application bundle and
//! produces one bundle that runs natively on both.
//!
//! # Example
//!
//! ```no_run
//! use kodegen_bundler_universal::merger::{MergeOptionsBuilder, make_universal_app};
//!
//! # async fn example() -> kodegen_bundler_universal::merger::Result<()> {
//! let options = MergeOptionsBuilder::new()
//!     .x64_app_path("/builds/x64/Demo.app")
//!     .arm64_app_path("/builds/arm64/Demo.app")
//!     .out_app_path("/builds/universal/Demo.app")
//!     .merge_asars(true)
//!     .single_arch_files("node_modules/some-mac-only/**")?
//!     .build()?;
//!
//! let report = make_universal_app(options).await?;
//! println!("fused {} binaries", report.fused.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`builder`] - [`Merger`] orchestration and the scratch workspace
//! - [`files`] - file classification
//! - [`macho`] - native binary detection and fusion
//! - [`diff`] - loose folder comparison
//! - [`asar`] - packed-resource archive codec and archive merging
//! - [`shim`] - arch-dispatch entry points
//! - [`integrity`] / [`info_plist`] - header fingerprints and plist injection
//! - [`settings`] - [`MergeOptions`] and [`MergeOptionsBuilder`]

pub mod asar;
pub mod builder;
pub mod checksum;
pub mod diff;
pub mod error;
pub mod files;
pub mod info_plist;
pub mod integrity;
pub mod layout;
pub mod macho;
pub mod settings;
pub mod shim;
pub mod utils;

pub use builder::{MergeReport, MergeStage, Merger, make_universal_app};
pub use error::{Context, Error, ErrorExt, Result};
pub use files::{AppFile, AppFileType};
pub use integrity::{AsarIntegrity, IntegrityMap};
pub use layout::AsarMode;
pub use macho::{
    AnyFuser, AnyInspector, BinaryFuser, FatBinaryFuser, FileCommandInspector, FusionRecord,
    LipoFuser, MagicInspector, NativeBinaryInspector,
};
pub use settings::{Arch, MergeOptions, MergeOptionsBuilder};
pub use shim::ShimKind;
pub use utils::glob::GlobRule;
