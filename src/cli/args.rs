//! Command line argument parsing and validation.
//!
//! This module provides CLI argument parsing using clap, with every flag
//! also readable from a `UNIVERSAL_*` environment variable.

use crate::merger::{
    AnyFuser, AnyInspector, FatBinaryFuser, FileCommandInspector, LipoFuser, MagicInspector,
    MergeOptions, MergeOptionsBuilder,
};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

/// Binary fusion backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum FuserChoice {
    /// `lipo` when installed, otherwise builtin
    #[default]
    Auto,
    /// Apple's `lipo`
    Lipo,
    /// Built-in fat binary writer
    Builtin,
}

impl FuserChoice {
    /// Resolves the choice to a fuser.
    pub fn resolve(self) -> AnyFuser {
        match self {
            FuserChoice::Auto => AnyFuser::auto(),
            FuserChoice::Lipo => AnyFuser::Lipo(LipoFuser::default()),
            FuserChoice::Builtin => AnyFuser::Builtin(FatBinaryFuser),
        }
    }
}

/// Native binary detection backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum InspectorChoice {
    /// `file` when installed, otherwise magic
    #[default]
    Auto,
    /// `file --brief --no-pad`
    File,
    /// File header against Mach-O magic numbers and the fat layout
    Magic,
}

impl InspectorChoice {
    /// Resolves the choice to an inspector.
    pub fn resolve(self) -> AnyInspector {
        match self {
            InspectorChoice::Auto => AnyInspector::auto(),
            InspectorChoice::File => AnyInspector::File(FileCommandInspector::default()),
            InspectorChoice::Magic => AnyInspector::Magic(MagicInspector),
        }
    }
}

/// Merge x64 and arm64 macOS app bundles into one universal app
#[derive(Parser, Debug)]
#[command(
    name = "kodegen_bundler_universal",
    version,
    about = "Merge x64 and arm64 macOS app bundles into one universal app",
    long_about = "Merges two architecture-specific builds of the same macOS application into a single
universal bundle. Native binaries are fused, app.asar archives are merged or shimmed, and
archive integrity is recorded in Info.plist.

Usage:
  kodegen_bundler_universal --x64-app out/x64/Demo.app --arm64-app out/arm64/Demo.app --out-app out/Demo.app
  kodegen_bundler_universal --x64-app A.app --arm64-app B.app --out-app U.app --merge-asars --single-arch-files '*.node'

Exit code 0 = universal app guaranteed to exist at the output path."
)]
pub struct Args {
    /// Path to the x64 build of the app
    #[arg(long, value_name = "PATH", env = "UNIVERSAL_X64_APP")]
    pub x64_app: PathBuf,

    /// Path to the arm64 build of the app
    #[arg(long, value_name = "PATH", env = "UNIVERSAL_ARM64_APP")]
    pub arm64_app: PathBuf,

    /// Where to write the universal app
    #[arg(long, value_name = "PATH", env = "UNIVERSAL_OUT_APP")]
    pub out_app: PathBuf,

    /// Replace an existing app at the output path
    #[arg(long, env = "UNIVERSAL_FORCE")]
    pub force: bool,

    /// Merge app.asar archives instead of shimming between them
    #[arg(long, env = "UNIVERSAL_MERGE_ASARS")]
    pub merge_asars: bool,

    /// Glob of files allowed to exist in only one build
    #[arg(long, value_name = "GLOB", env = "UNIVERSAL_SINGLE_ARCH_FILES")]
    pub single_arch_files: Option<String>,

    /// Glob of Mach-O files that are identical in both builds
    #[arg(long, value_name = "GLOB", env = "UNIVERSAL_X64_ARCH_FILES")]
    pub x64_arch_files: Option<String>,

    /// Glob of Info.plist files that get no integrity data
    #[arg(long, value_name = "GLOB", env = "UNIVERSAL_INFO_PLISTS_TO_IGNORE")]
    pub info_plists_to_ignore: Option<String>,

    /// Binary fusion backend
    #[arg(long, value_enum, default_value_t, env = "UNIVERSAL_FUSER")]
    pub fuser: FuserChoice,

    /// Native binary detection backend
    #[arg(long, value_enum, default_value_t, env = "UNIVERSAL_INSPECTOR")]
    pub inspector: InspectorChoice,

    /// Print the merge report as JSON on stdout
    #[arg(long, env = "UNIVERSAL_JSON")]
    pub json: bool,

    /// Enable debug logging
    #[arg(short, long, env = "UNIVERSAL_VERBOSE")]
    pub verbose: bool,
}

fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.x64_app == self.arm64_app {
            log::warn!("x64 and arm64 inputs are the same bundle");
        }
        if self.out_app == self.x64_app || self.out_app == self.arm64_app {
            return Err("The output path must differ from both input paths".to_string());
        }
        for (flag, pattern) in [
            ("--single-arch-files", &self.single_arch_files),
            ("--x64-arch-files", &self.x64_arch_files),
            ("--info-plists-to-ignore", &self.info_plists_to_ignore),
        ] {
            if pattern.as_deref().is_some_and(str::is_empty) {
                return Err(format!("{} cannot be empty", flag));
            }
        }
        Ok(())
    }

    /// Builds merge options, resolving relative paths against the current
    /// directory.
    pub fn to_options(&self) -> crate::error::Result<MergeOptions> {
        let mut builder = MergeOptionsBuilder::new()
            .x64_app_path(absolutize(&self.x64_app)?)
            .arm64_app_path(absolutize(&self.arm64_app)?)
            .out_app_path(absolutize(&self.out_app)?)
            .force(self.force)
            .merge_asars(self.merge_asars);

        if let Some(pattern) = &self.single_arch_files {
            builder = builder.single_arch_files(pattern)?;
        }
        if let Some(pattern) = &self.x64_arch_files {
            builder = builder.x64_arch_files(pattern)?;
        }
        if let Some(pattern) = &self.info_plists_to_ignore {
            builder = builder.info_plists_to_ignore(pattern)?;
        }

        Ok(builder.build()?)
    }
}
