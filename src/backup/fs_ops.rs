//! Blocking file-tree helpers used by the archive codec and the restore engine.

use super::{BackupError, Result, KEEP_FILE};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Remove every entry directly under `root` except the keep-file marker.
/// A missing root is created empty.
pub fn clear_directory(root: &Path) -> Result<usize> {
    if !root.exists() {
        fs::create_dir_all(root)?;
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_name() == KEEP_FILE {
            continue;
        }
        let path = entry.path();
        let result = if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(BackupError::io_failure(&path, e)),
        }
    }

    debug!("Cleared {} entries from {}", removed, root.display());
    Ok(removed)
}

/// Recursively copy `source` into `destination`, creating directories as needed.
/// Symlinks are not followed. Returns the number of files copied.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<usize> {
    fs::create_dir_all(destination)?;

    let mut copied = 0;
    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| BackupError::io_failure(source, e))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| BackupError::io_failure(entry.path(), e))?;
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)
                .map_err(|e| BackupError::io_failure(entry.path(), e))?;
            copied += 1;
        }
    }

    debug!(
        "Copied {} files from {} to {}",
        copied,
        source.display(),
        destination.display()
    );
    Ok(copied)
}

/// Wipe `live_root` and refill it from `source`, if one is given
pub async fn replace_tree(live_root: PathBuf, source: Option<PathBuf>) -> Result<usize> {
    tokio::task::spawn_blocking(move || {
        clear_directory(&live_root)?;
        match source {
            Some(source) => copy_tree(&source, &live_root),
            None => Ok(0),
        }
    })
    .await
    .map_err(|e| BackupError::IoFailure {
        message: format!("file sync task failed: {e}"),
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_clear_directory_preserves_keep_file() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join(KEEP_FILE), b"").unwrap();
        fs::write(root.path().join("old.pdf"), b"old").unwrap();
        fs::create_dir_all(root.path().join("Knitting/nested")).unwrap();

        let removed = clear_directory(root.path()).unwrap();

        assert_eq!(removed, 2);
        assert!(root.path().join(KEEP_FILE).exists());
        assert!(!root.path().join("old.pdf").exists());
        assert!(!root.path().join("Knitting").exists());
    }

    #[test]
    fn test_copy_tree_mirrors_nested_layout() {
        let source = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();
        fs::create_dir_all(source.path().join("Knitting")).unwrap();
        fs::create_dir_all(source.path().join("empty")).unwrap();
        fs::write(source.path().join("Knitting/socks.pdf"), b"socks").unwrap();

        let copied = copy_tree(source.path(), destination.path()).unwrap();

        assert_eq!(copied, 1);
        assert_eq!(
            fs::read(destination.path().join("Knitting/socks.pdf")).unwrap(),
            b"socks"
        );
        assert!(destination.path().join("empty").is_dir());
    }

    #[tokio::test]
    async fn test_replace_tree_without_source_leaves_root_empty() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("stale.pdf"), b"stale").unwrap();

        let copied = replace_tree(root.path().to_path_buf(), None).await.unwrap();

        assert_eq!(copied, 0);
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
