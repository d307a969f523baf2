//! Merge orchestration.
//!
//! This module provides the [`Merger`] orchestrator that turns two
//! architecture-specific bundles into one universal bundle.
//!
//! # Overview
//!
//! The merger:
//! 1. Validates the host, paths and output location
//! 2. Stages a scratch copy of the x64 bundle
//! 3. Classifies, checks and reconciles files across both builds
//! 4. Fuses native binaries and merges or shims the app payload
//! 5. Fingerprints archives into `Info.plist`
//! 6. Promotes the scratch copy and returns a [`MergeReport`]
//!
//! # Module Organization
//!
//! - [`orchestrator`] - [`Merger`] and the stage sequence
//! - [`workspace`] - scratch directory lifetime

pub mod orchestrator;
pub mod workspace;

pub use orchestrator::{MergeReport, MergeStage, Merger, make_universal_app};
pub use workspace::MergeWorkspace;
