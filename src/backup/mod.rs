pub mod archive;
pub mod backup_manager;
pub mod fs_ops;
pub mod repository;
pub mod restore;
pub mod retention;
pub mod scheduler;
pub mod snapshot;

pub use archive::*;
pub use backup_manager::*;
pub use repository::*;
pub use restore::*;
pub use retention::*;
pub use scheduler::*;
pub use snapshot::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix every backup archive filename starts with
pub const BACKUP_FILE_PREFIX: &str = "yarnl-backup-";

/// Extension every backup archive filename ends with
pub const BACKUP_FILE_EXTENSION: &str = ".zip";

/// Marker file that survives a wipe of a live storage root
pub const KEEP_FILE: &str = ".gitkeep";

/// Live on-disk roots the backup subsystem reads from and restores into
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageRoots {
    /// Pattern documents, one directory per category, plus `thumbnails/`
    pub patterns_dir: PathBuf,

    /// Images referenced by markdown patterns
    pub images_dir: PathBuf,

    /// Archived patterns, one directory per category
    pub archive_dir: PathBuf,

    /// Directory holding the backup archives themselves
    pub backups_dir: PathBuf,
}

impl StorageRoots {
    pub fn thumbnails_dir(&self) -> PathBuf {
        self.patterns_dir.join("thumbnails")
    }

    /// Ensure every live root exists
    pub async fn ensure_exist(&self) -> Result<()> {
        for dir in [
            &self.patterns_dir,
            &self.images_dir,
            &self.archive_dir,
            &self.backups_dir,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::create_dir_all(self.thumbnails_dir()).await?;
        Ok(())
    }
}

impl Default for StorageRoots {
    fn default() -> Self {
        Self {
            patterns_dir: PathBuf::from("/app/patterns"),
            images_dir: PathBuf::from("/app/images"),
            archive_dir: PathBuf::from("/app/archive"),
            backups_dir: PathBuf::from("/backups"),
        }
    }
}

/// A backup archive as it exists on disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupArchive {
    pub filename: String,
    pub size: u64,
    pub created: DateTime<Utc>,
}

/// What a backup run should bundle besides the database snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOptions {
    #[serde(default = "default_true")]
    pub include_patterns: bool,
    #[serde(default = "default_true")]
    pub include_images: bool,
    #[serde(default)]
    pub include_archive: bool,
    /// Opaque client blob copied into `settings.json`
    #[serde(default)]
    pub client_settings: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            include_patterns: true,
            include_images: true,
            include_archive: false,
            client_settings: None,
        }
    }
}

impl BackupOptions {
    pub fn everything() -> Self {
        Self {
            include_patterns: true,
            include_images: true,
            include_archive: true,
            client_settings: None,
        }
    }
}

/// Result of a restore that committed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    /// Passthrough `settings.json` content, if the archive carried one
    pub client_settings: Option<serde_json::Value>,

    /// Set when the database committed but the file trees were not fully replaced
    pub file_sync_warning: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Backup not found: {filename}")]
    NotFound { filename: String },

    #[error("Invalid backup archive: {message}")]
    InvalidArchive { message: String },

    #[error("Restore transaction failed and was rolled back: {message}")]
    TransactionFailure { message: String },

    #[error("Database restored but file sync failed: {message}")]
    FileSyncFailure { message: String },

    #[error("Archive I/O failed: {message}")]
    IoFailure { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
}

impl BackupError {
    pub fn invalid_archive(message: impl Into<String>) -> Self {
        Self::InvalidArchive {
            message: message.into(),
        }
    }

    pub fn io_failure(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::IoFailure {
            message: format!("{}: {err}", path.display()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_roots_default() {
        let roots = StorageRoots::default();
        assert_eq!(roots.patterns_dir, PathBuf::from("/app/patterns"));
        assert_eq!(roots.thumbnails_dir(), PathBuf::from("/app/patterns/thumbnails"));
        assert_eq!(roots.backups_dir, PathBuf::from("/backups"));
    }

    #[test]
    fn test_backup_options_deserialize_defaults() {
        let options: BackupOptions = serde_json::from_str("{}").unwrap();
        assert!(options.include_patterns);
        assert!(options.include_images);
        assert!(!options.include_archive);
        assert!(options.client_settings.is_none());
    }
}
