//! Category directories under the patterns root are a projection of the
//! `categories` table: rows cause directories, never the other way round.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

/// Subdirectories of the patterns root that are not categories
const RESERVED_DIRS: &[&str] = &["thumbnails", "images"];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProjectionReport {
    pub created: Vec<String>,
    pub removed: Vec<String>,
    /// Stale directories left in place because they still hold files
    pub kept_non_empty: Vec<String>,
}

/// Recompute `{patterns_root}/{category}` for every category name
pub async fn sync_category_directories(
    category_names: &[String],
    patterns_root: &Path,
) -> std::io::Result<ProjectionReport> {
    let mut report = ProjectionReport::default();
    fs::create_dir_all(patterns_root).await?;

    let wanted: HashSet<&str> = category_names.iter().map(String::as_str).collect();

    for name in &wanted {
        if !is_safe_directory_name(name) {
            debug!("Skipping category with unsafe directory name: {:?}", name);
            continue;
        }
        let dir = patterns_root.join(name);
        if !fs::try_exists(&dir).await? {
            fs::create_dir_all(&dir).await?;
            report.created.push((*name).to_string());
        }
    }

    let mut entries = fs::read_dir(patterns_root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || RESERVED_DIRS.contains(&name.as_str()) {
            continue;
        }
        if wanted.contains(name.as_str()) {
            continue;
        }
        if remove_dir_if_empty(&entry.path()).await? {
            report.removed.push(name);
        } else {
            report.kept_non_empty.push(name);
        }
    }

    if !report.created.is_empty() || !report.removed.is_empty() {
        info!(
            "Category directories synced: {} created, {} removed",
            report.created.len(),
            report.removed.len()
        );
    }

    Ok(report)
}

/// Remove `dir` if it is empty. Returns `false` when it still holds entries
/// or is already gone; any other failure propagates.
pub async fn remove_dir_if_empty(dir: &Path) -> std::io::Result<bool> {
    match fs::remove_dir(dir).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => Ok(false),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn is_safe_directory_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_creates_missing_and_removes_stale_empty_directories() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("Old")).unwrap();
        std::fs::create_dir_all(root.path().join("thumbnails")).unwrap();

        let names = vec!["Knitting".to_string(), "Crochet".to_string()];
        let report = sync_category_directories(&names, root.path()).await.unwrap();

        assert!(root.path().join("Knitting").is_dir());
        assert!(root.path().join("Crochet").is_dir());
        assert!(!root.path().join("Old").exists());
        assert!(root.path().join("thumbnails").is_dir());
        assert_eq!(report.removed, vec!["Old".to_string()]);
        assert_eq!(report.created.len(), 2);
    }

    #[tokio::test]
    async fn test_keeps_stale_directory_with_files() {
        let root = TempDir::new().unwrap();
        let stale = root.path().join("Retired");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("shawl.pdf"), b"%PDF").unwrap();

        let report = sync_category_directories(&[], root.path()).await.unwrap();

        assert!(stale.join("shawl.pdf").exists());
        assert_eq!(report.kept_non_empty, vec!["Retired".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_dir_if_empty_tolerates_missing_directory() {
        let root = TempDir::new().unwrap();
        let removed = remove_dir_if_empty(&root.path().join("nope")).await.unwrap();
        assert!(!removed);
    }

    #[tokio::test]
    async fn test_unsafe_category_names_are_not_projected() {
        let root = TempDir::new().unwrap();
        let names = vec!["../escape".to_string(), "Socks".to_string()];
        sync_category_directories(&names, root.path()).await.unwrap();

        assert!(root.path().join("Socks").is_dir());
        assert!(!root.path().parent().unwrap().join("escape").exists());
    }
}
