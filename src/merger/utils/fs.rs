//! File system utilities for merging.
//!
//! Provides safe file operations with automatic directory creation,
//! symlink preservation, and comprehensive error handling.

use crate::merger::error::{Error, ErrorExt, Result};
use std::{
    io::{self, Read},
    path::Path,
};
use tokio::fs;

/// Removes the directory and its contents if it exists.
pub async fn remove_dir_all(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()), // Idempotent
        Err(e) => Err(e).fs_context("removing directory", path),
    }
}

/// Removes whatever lives at `path`: directory tree, file or symlink.
pub async fn remove_path(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).fs_context("reading metadata", path),
    };

    if metadata.is_dir() {
        remove_dir_all(path).await
    } else {
        fs::remove_file(path)
            .await
            .fs_context("removing file", path)
    }
}

/// Returns whether anything (including a dangling symlink) exists at `path`.
pub async fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).await.is_ok()
}

/// Makes a symbolic link.
#[cfg(unix)]
fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

/// Makes a symbolic link.
#[cfg(windows)]
fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    if dst.parent().map(|p| p.join(src).is_dir()).unwrap_or(false) {
        std::os::windows::fs::symlink_dir(src, dst)
    } else {
        std::os::windows::fs::symlink_file(src, dst)
    }
}

/// Creates a symlink at `link` pointing to `target`, creating parent
/// directories and replacing anything already at `link`.
pub async fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)
            .await
            .fs_context("creating parent directory", parent)?;
    }
    remove_path(link).await?;
    symlink(target, link).fs_context("creating symlink", link)
}

/// Copies a regular file from one path to another, creating any parent
/// directories of the destination path as necessary. An existing
/// destination file is overwritten.
///
/// Fails if the source path is a directory or doesn't exist.
pub async fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if !from.exists() {
        return Err(Error::GenericError(format!("{from:?} does not exist")));
    }
    if !from.is_file() {
        return Err(Error::GenericError(format!("{from:?} is not a file")));
    }
    if let Some(dest_dir) = to.parent() {
        fs::create_dir_all(dest_dir)
            .await
            .fs_context("creating parent directory", dest_dir)?;
    }
    fs::copy(from, to).await.fs_context("copying file", from)?;
    Ok(())
}

/// Recursively copies a directory from one path to another, creating any
/// parent directories of the destination path as necessary.
///
/// Preserves symlinks and permission bits.
/// Fails if the source path is not a directory or doesn't exist.
pub async fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    if !from.exists() {
        crate::bail!("{from:?} does not exist");
    }
    if !from.is_dir() {
        crate::bail!("{from:?} is not a Directory");
    }

    let from = from.to_path_buf();
    let to = to.to_path_buf();

    tokio::task::spawn_blocking(move || copy_dir_blocking(&from, &to))
        .await
        .map_err(|e| Error::GenericError(format!("Directory copy task panicked: {}", e)))?
}

fn copy_dir_blocking(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).fs_context("creating parent directory", parent)?;
    }

    for entry in walkdir::WalkDir::new(from) {
        let entry = entry.map_err(|e| Error::GenericError(format!("walking {from:?}: {e}")))?;
        debug_assert!(entry.path().starts_with(from));
        let rel_path = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| Error::GenericError(e.to_string()))?;
        let dest_path = to.join(rel_path);

        if entry.file_type().is_symlink() {
            let target = std::fs::read_link(entry.path()).fs_context("reading link", entry.path())?;
            symlink(&target, &dest_path).fs_context("creating symlink", &dest_path)?;
        } else if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest_path).fs_context("creating directory", &dest_path)?;
        } else {
            std::fs::copy(entry.path(), &dest_path).fs_context("copying file", entry.path())?;
        }
    }

    Ok(())
}

/// Moves `from` to `to`, falling back to copy-then-delete when a rename is
/// not possible (e.g. across filesystems).
pub async fn move_path(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .await
            .fs_context("creating parent directory", parent)?;
    }

    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) => {
            log::debug!(
                "rename {} -> {} failed ({}), copying instead",
                from.display(),
                to.display(),
                e
            );
            let copied = if fs::symlink_metadata(from)
                .await
                .fs_context("reading metadata", from)?
                .is_dir()
            {
                copy_dir(from, to).await
            } else {
                copy_file(from, to).await
            };
            if let Err(e) = copied {
                // Never leave a half-copied destination behind.
                let _ = remove_path(to).await;
                return Err(e);
            }
            remove_path(from).await
        }
    }
}

/// Compares two files byte by byte, short-circuiting on size.
pub fn files_equal(a: &Path, b: &Path) -> Result<bool> {
    let a_len = std::fs::metadata(a).fs_context("reading metadata", a)?.len();
    let b_len = std::fs::metadata(b).fs_context("reading metadata", b)?.len();
    if a_len != b_len {
        return Ok(false);
    }

    let mut a_file = io::BufReader::new(std::fs::File::open(a).fs_context("opening file", a)?);
    let mut b_file = io::BufReader::new(std::fs::File::open(b).fs_context("opening file", b)?);
    let mut a_buf = vec![0u8; 8192];
    let mut b_buf = vec![0u8; 8192];

    loop {
        let n = a_file.read(&mut a_buf).fs_context("reading file", a)?;
        if n == 0 {
            return Ok(true);
        }
        b_file
            .read_exact(&mut b_buf[..n])
            .fs_context("reading file", b)?;
        if a_buf[..n] != b_buf[..n] {
            return Ok(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copy_dir_preserves_symlinks() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("Versions/A")).unwrap();
        std::fs::write(src.join("Versions/A/lib"), b"lib").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("A", src.join("Versions/Current")).unwrap();

        let dst = temp.path().join("out/dst");
        copy_dir(&src, &dst).await.unwrap();

        assert_eq!(std::fs::read(dst.join("Versions/A/lib")).unwrap(), b"lib");
        #[cfg(unix)]
        assert_eq!(
            std::fs::read_link(dst.join("Versions/Current")).unwrap(),
            Path::new("A")
        );
    }

    #[tokio::test]
    async fn test_move_path_creates_parent() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("Tmp.app");
        std::fs::create_dir_all(src.join("Contents")).unwrap();

        let dst = temp.path().join("nested/out/Universal.app");
        move_path(&src, &dst).await.unwrap();

        assert!(dst.join("Contents").is_dir());
        assert!(!src.exists());
    }

    #[test]
    fn test_files_equal() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        let c = temp.path().join("c");
        std::fs::write(&a, b"same").unwrap();
        std::fs::write(&b, b"same").unwrap();
        std::fs::write(&c, b"diff").unwrap();

        assert!(files_equal(&a, &b).unwrap());
        assert!(!files_equal(&a, &c).unwrap());
    }
}
