//! Scratch directory owned by a single merge.

use crate::merger::error::{ErrorExt, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Scratch directory holding the working copy of the bundle and the shim
/// entry folder.
///
/// Dropping the workspace removes everything in it, so every early return
/// out of the pipeline cleans up.
#[derive(Debug)]
pub struct MergeWorkspace {
    dir: TempDir,
}

impl MergeWorkspace {
    /// Creates a fresh workspace inside `parent`.
    ///
    /// Keeping the scratch copy on the output's filesystem lets promotion be
    /// a rename.
    pub async fn create_in(parent: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(parent)
            .await
            .fs_context("creating output directory", parent)?;
        let dir = tempfile::Builder::new()
            .prefix(".kodegen-universal-")
            .tempdir_in(parent)
            .fs_context("creating scratch directory", parent)?;
        log::debug!("scratch workspace at {}", dir.path().display());
        Ok(Self { dir })
    }

    /// Root of the workspace.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Working copy of the x64 bundle.
    pub fn tmp_app(&self) -> PathBuf {
        self.dir.path().join("Tmp.app")
    }

    /// Folder the shim entry is assembled in before packing.
    pub fn entry_dir(&self) -> PathBuf {
        self.dir.path().join("entry-asar")
    }

    /// Removes the workspace, reporting failures.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().fs_context("removing scratch directory", path)
    }
}
