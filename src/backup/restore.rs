use super::{
    fs_ops, BackupError, LibraryRepository, RestoreOutcome, Result, Snapshot, StorageRoots,
    ARCHIVE_TREE, DATABASE_ENTRY, IMAGES_TREE, PATTERNS_TREE, SETTINGS_ENTRY,
};
use crate::library::sync_category_directories;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Applies an extracted archive to the live database and storage roots.
///
/// The database phase is atomic. The file phase runs only after commit and
/// is best-effort: its failure is reported as a warning on the outcome.
#[derive(Debug, Clone)]
pub struct RestoreEngine {
    repository: Arc<dyn LibraryRepository>,
    roots: StorageRoots,
}

impl RestoreEngine {
    pub fn new(repository: Arc<dyn LibraryRepository>, roots: StorageRoots) -> Self {
        Self { repository, roots }
    }

    #[instrument(skip(self), fields(staging = %staging.display()))]
    pub async fn restore(&self, staging: &Path) -> Result<RestoreOutcome> {
        let snapshot_bytes = tokio::fs::read(staging.join(DATABASE_ENTRY))
            .await
            .map_err(|e| {
                BackupError::invalid_archive(format!("{DATABASE_ENTRY} could not be read: {e}"))
            })?;
        let snapshot = Snapshot::from_json_bytes(&snapshot_bytes)?;
        let client_settings = read_client_settings(staging).await;

        info!(
            "Restoring snapshot exported {} ({} rows)",
            snapshot.export_date,
            snapshot.tables.total_rows()
        );

        self.repository.replace_all(&snapshot.tables).await?;

        let file_sync_warning = match self.sync_files(staging).await {
            Ok(()) => None,
            Err(e) => {
                let failure = BackupError::FileSyncFailure {
                    message: e.to_string(),
                };
                warn!("{}", failure);
                Some(failure.to_string())
            }
        };

        info!("Restore completed");
        Ok(RestoreOutcome {
            client_settings,
            file_sync_warning,
        })
    }

    async fn sync_files(&self, staging: &Path) -> Result<()> {
        let staged_patterns = existing_dir(staging.join(PATTERNS_TREE)).await;
        let copied =
            fs_ops::replace_tree(self.roots.patterns_dir.clone(), staged_patterns).await?;
        info!("Replaced pattern files ({} files)", copied);

        for (tree, live_root) in [
            (IMAGES_TREE, &self.roots.images_dir),
            (ARCHIVE_TREE, &self.roots.archive_dir),
        ] {
            if let Some(source) = existing_dir(staging.join(tree)).await {
                let copied = fs_ops::replace_tree(live_root.clone(), Some(source)).await?;
                info!("Replaced {} files ({} files)", tree, copied);
            }
        }

        let names = self.repository.category_names().await?;
        sync_category_directories(&names, &self.roots.patterns_dir).await?;
        tokio::fs::create_dir_all(self.roots.thumbnails_dir()).await?;
        Ok(())
    }
}

async fn existing_dir(path: PathBuf) -> Option<PathBuf> {
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_dir() => Some(path),
        _ => None,
    }
}

/// `settings.json` is passthrough data; an unreadable one is dropped, not fatal
async fn read_client_settings(staging: &Path) -> Option<serde_json::Value> {
    let path = staging.join(SETTINGS_ENTRY);
    let bytes = tokio::fs::read(&path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring unparseable {}: {}", SETTINGS_ENTRY, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::repository::sample_tables;
    use crate::backup::{LibraryTable, MockLibraryRepository, SnapshotTables, KEEP_FILE};
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        roots: StorageRoots,
        staging: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let roots = StorageRoots {
            patterns_dir: dir.path().join("live/patterns"),
            images_dir: dir.path().join("live/images"),
            archive_dir: dir.path().join("live/archive"),
            backups_dir: dir.path().join("backups"),
        };
        let staging = dir.path().join("staging");
        fs::create_dir_all(&staging).unwrap();
        Fixture {
            _dir: dir,
            roots,
            staging,
        }
    }

    fn stage_snapshot(staging: &Path, tables: SnapshotTables) {
        let snapshot = Snapshot {
            export_date: Utc::now(),
            version: "1.0".to_string(),
            account: None,
            include_patterns: true,
            include_images: false,
            include_archive: false,
            tables,
        };
        fs::write(
            staging.join(DATABASE_ENTRY),
            snapshot.to_json_bytes().unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_restore_replaces_rows_and_pattern_files() {
        let fx = fixture();
        fs::create_dir_all(fx.roots.patterns_dir.join("Old")).unwrap();
        fs::write(fx.roots.patterns_dir.join(KEEP_FILE), b"").unwrap();
        fs::write(fx.roots.patterns_dir.join("Old/stale.pdf"), b"stale").unwrap();

        stage_snapshot(&fx.staging, sample_tables());
        fs::create_dir_all(fx.staging.join("patterns/Knitting")).unwrap();
        fs::write(fx.staging.join("patterns/Knitting/socks.pdf"), b"socks").unwrap();
        fs::write(fx.staging.join(SETTINGS_ENTRY), br#"{"theme":"dark"}"#).unwrap();

        let repository = Arc::new(MockLibraryRepository::default());
        let engine = RestoreEngine::new(repository.clone(), fx.roots.clone());
        let outcome = engine.restore(&fx.staging).await.unwrap();

        assert_eq!(repository.tables(), sample_tables());
        assert_eq!(outcome.client_settings.unwrap()["theme"], "dark");
        assert!(outcome.file_sync_warning.is_none());
        assert!(fx.roots.patterns_dir.join(KEEP_FILE).exists());
        assert!(!fx.roots.patterns_dir.join("Old").exists());
        assert!(fx.roots.patterns_dir.join("Knitting/socks.pdf").is_file());
        // Crochet has no files in the archive but is still projected
        assert!(fx.roots.patterns_dir.join("Crochet").is_dir());
        assert!(fx.roots.thumbnails_dir().is_dir());
    }

    #[tokio::test]
    async fn test_pattern_only_category_gets_row_and_directory() {
        let fx = fixture();
        let mut tables = sample_tables();
        tables.patterns[0].category = "Tunisian".to_string();
        stage_snapshot(&fx.staging, tables);

        let repository = Arc::new(MockLibraryRepository::default());
        let engine = RestoreEngine::new(repository.clone(), fx.roots.clone());
        engine.restore(&fx.staging).await.unwrap();

        let restored = repository.tables();
        assert!(restored.categories.iter().any(|c| c.name == "Tunisian"));
        assert!(fx.roots.patterns_dir.join("Tunisian").is_dir());
    }

    #[tokio::test]
    async fn test_absent_image_tree_leaves_live_images_alone() {
        let fx = fixture();
        fs::create_dir_all(&fx.roots.images_dir).unwrap();
        fs::write(fx.roots.images_dir.join("keep-me.png"), b"png").unwrap();
        stage_snapshot(&fx.staging, SnapshotTables::default());

        let engine = RestoreEngine::new(Arc::new(MockLibraryRepository::default()), fx.roots.clone());
        let outcome = engine.restore(&fx.staging).await.unwrap();

        assert!(outcome.client_settings.is_none());
        assert!(fx.roots.images_dir.join("keep-me.png").exists());
    }

    #[tokio::test]
    async fn test_failed_transaction_leaves_files_untouched() {
        let fx = fixture();
        fs::create_dir_all(&fx.roots.patterns_dir).unwrap();
        fs::write(fx.roots.patterns_dir.join("live.pdf"), b"live").unwrap();
        stage_snapshot(&fx.staging, sample_tables());
        fs::create_dir_all(fx.staging.join("patterns")).unwrap();

        let original = sample_tables();
        let repository = Arc::new(MockLibraryRepository::with_tables(original.clone()));
        repository.fail_on_insert(LibraryTable::Counters);

        let engine = RestoreEngine::new(repository.clone(), fx.roots.clone());
        let err = engine.restore(&fx.staging).await.unwrap_err();

        assert!(matches!(err, BackupError::TransactionFailure { .. }));
        assert_eq!(repository.tables(), original);
        assert!(fx.roots.patterns_dir.join("live.pdf").exists());
    }

    #[tokio::test]
    async fn test_invalid_settings_json_is_ignored() {
        let fx = fixture();
        stage_snapshot(&fx.staging, SnapshotTables::default());
        fs::write(fx.staging.join(SETTINGS_ENTRY), b"{not json").unwrap();

        let engine = RestoreEngine::new(Arc::new(MockLibraryRepository::default()), fx.roots.clone());
        let outcome = engine.restore(&fx.staging).await.unwrap();

        assert!(outcome.client_settings.is_none());
    }

    #[tokio::test]
    async fn test_file_sync_failure_is_reported_as_warning() {
        let fx = fixture();
        stage_snapshot(&fx.staging, sample_tables());
        // A regular file where the images root should be makes the wipe fail
        fs::create_dir_all(fx.roots.images_dir.parent().unwrap()).unwrap();
        fs::write(&fx.roots.images_dir, b"not a directory").unwrap();
        fs::create_dir_all(fx.staging.join("images")).unwrap();
        fs::write(fx.staging.join("images/a.png"), b"png").unwrap();

        let repository = Arc::new(MockLibraryRepository::default());
        let engine = RestoreEngine::new(repository.clone(), fx.roots.clone());
        let outcome = engine.restore(&fx.staging).await.unwrap();

        assert_eq!(repository.tables(), sample_tables());
        assert!(outcome.file_sync_warning.is_some());
    }
}
