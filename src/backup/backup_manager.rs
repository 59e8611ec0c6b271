use super::{
    extract_archive_async, prune_archives, write_archive_async, ArchiveContents, BackupArchive,
    BackupError, BackupOptions, InclusionFlags, LibraryRepository, PrunePolicy, PruneReport,
    RestoreEngine, RestoreOutcome, Result, SnapshotExporter, StorageRoots, TreeSelection,
    ARCHIVE_TREE, BACKUP_FILE_EXTENSION, BACKUP_FILE_PREFIX, IMAGES_TREE, PATTERNS_TREE,
};
use chrono::{DateTime, Local, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Orchestrates backup creation, listing, deletion, restore and pruning
/// over the archive directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    roots: StorageRoots,
    exporter: SnapshotExporter,
    restore_engine: RestoreEngine,
}

impl BackupManager {
    pub fn new(repository: Arc<dyn LibraryRepository>, roots: StorageRoots) -> Self {
        Self {
            exporter: SnapshotExporter::new(repository.clone()),
            restore_engine: RestoreEngine::new(repository, roots.clone()),
            roots,
        }
    }

    /// Create the storage roots if they do not exist yet
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing backup manager");
        self.roots.ensure_exist().await?;
        info!(
            "Backup manager initialized, archives in {}",
            self.roots.backups_dir.display()
        );
        Ok(())
    }

    pub fn roots(&self) -> &StorageRoots {
        &self.roots
    }

    /// Export the database, bundle the selected trees and write a new archive
    #[instrument(skip(self, options), fields(
        patterns = options.include_patterns,
        images = options.include_images,
        archive = options.include_archive
    ))]
    pub async fn create_backup(&self, options: BackupOptions) -> Result<BackupArchive> {
        info!("Starting backup");
        fs::create_dir_all(&self.roots.backups_dir).await?;

        let snapshot = self
            .exporter
            .export(InclusionFlags {
                include_patterns: options.include_patterns,
                include_images: options.include_images,
                include_archive: options.include_archive,
            })
            .await?;

        let settings_json = options
            .client_settings
            .as_ref()
            .map(serde_json::to_vec_pretty)
            .transpose()?;

        let mut trees = Vec::new();
        if options.include_patterns {
            trees.push(TreeSelection::new(PATTERNS_TREE, &self.roots.patterns_dir));
        }
        if options.include_images {
            trees.push(TreeSelection::new(IMAGES_TREE, &self.roots.images_dir));
        }
        if options.include_archive {
            trees.push(TreeSelection::new(ARCHIVE_TREE, &self.roots.archive_dir));
        }

        let contents = ArchiveContents {
            database_json: snapshot.to_json_bytes()?,
            settings_json,
            trees,
        };

        let filename = unique_backup_filename(&self.roots.backups_dir, Local::now()).await?;
        let final_path = self.roots.backups_dir.join(&filename);
        let partial_path = self.roots.backups_dir.join(format!("{filename}.partial"));

        if let Err(e) = write_archive_async(contents, partial_path.clone()).await {
            error!("Backup failed while writing {}: {}", filename, e);
            remove_partial(&partial_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&partial_path, &final_path).await {
            remove_partial(&partial_path).await;
            return Err(BackupError::io_failure(&final_path, e));
        }

        let metadata = fs::metadata(&final_path)
            .await
            .map_err(|e| BackupError::io_failure(&final_path, e))?;
        if metadata.len() == 0 {
            remove_partial(&final_path).await;
            return Err(BackupError::IoFailure {
                message: format!("{filename} was written empty"),
            });
        }

        info!("Backup created: {} ({} bytes)", filename, metadata.len());
        Ok(BackupArchive {
            filename,
            size: metadata.len(),
            created: metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    /// Every archive in the backup directory, newest first
    pub async fn list_backups(&self) -> Result<Vec<BackupArchive>> {
        let mut entries = match fs::read_dir(&self.roots.backups_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut archives = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name().to_string_lossy().into_owned();
            if !is_backup_archive_name(&filename) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let created = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            archives.push(BackupArchive {
                filename,
                size: metadata.len(),
                created,
            });
        }

        archives.sort_by(|a, b| {
            b.created
                .cmp(&a.created)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        debug!("Found {} backup archives", archives.len());
        Ok(archives)
    }

    /// Resolve a client-supplied filename to an existing archive path
    pub async fn backup_path(&self, filename: &str) -> Result<PathBuf> {
        validate_backup_filename(filename)?;
        let path = self.roots.backups_dir.join(filename);
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(path),
            Ok(_) => Err(not_found(filename)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(filename)),
            Err(e) => Err(BackupError::io_failure(&path, e)),
        }
    }

    pub async fn delete_backup(&self, filename: &str) -> Result<()> {
        validate_backup_filename(filename)?;
        let path = self.roots.backups_dir.join(filename);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted backup: {}", filename);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(filename)),
            Err(e) => Err(BackupError::io_failure(&path, e)),
        }
    }

    /// Extract `filename` into a fresh staging directory and apply it.
    /// The staging directory is removed whatever the outcome.
    #[instrument(skip(self))]
    pub async fn restore_backup(&self, filename: &str) -> Result<RestoreOutcome> {
        let archive_path = self.backup_path(filename).await?;
        let staging = self
            .roots
            .backups_dir
            .join(format!(".restore-{}", Uuid::new_v4()));

        info!("Restoring backup {}", filename);
        let result = async {
            extract_archive_async(archive_path, staging.clone()).await?;
            self.restore_engine.restore(&staging).await
        }
        .await;

        match fs::remove_dir_all(&staging).await {
            Ok(()) => debug!("Removed staging directory {}", staging.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove staging directory {}: {}",
                staging.display(),
                e
            ),
        }

        match &result {
            Ok(outcome) if outcome.file_sync_warning.is_some() => {
                warn!("Backup {} restored with file sync warnings", filename)
            }
            Ok(_) => info!("Backup {} restored", filename),
            Err(e) => error!("Restore of {} failed: {}", filename, e),
        }
        result
    }

    pub async fn prune_backups(&self, policy: PrunePolicy) -> Result<PruneReport> {
        policy.validate()?;
        let archives = self.list_backups().await?;
        Ok(prune_archives(&self.roots.backups_dir, &archives, policy, Utc::now()).await)
    }
}

fn not_found(filename: &str) -> BackupError {
    BackupError::NotFound {
        filename: filename.to_string(),
    }
}

async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed incomplete archive {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove incomplete archive {}: {}", path.display(), e),
    }
}

fn is_backup_archive_name(filename: &str) -> bool {
    filename.starts_with(BACKUP_FILE_PREFIX) && filename.ends_with(BACKUP_FILE_EXTENSION)
}

/// Reject names that could leave the backup directory or are not archives.
/// Runs before any filesystem access.
pub fn validate_backup_filename(filename: &str) -> Result<()> {
    let reason = if filename.is_empty() {
        Some("filename is empty")
    } else if filename.contains("..") {
        Some("filename contains a parent directory reference")
    } else if filename.contains(['/', '\\', '\0']) {
        Some("filename contains a path separator")
    } else if !filename.ends_with(BACKUP_FILE_EXTENSION) {
        Some("filename is not a .zip archive")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(BackupError::invalid_archive(format!(
            "{reason}: {filename:?}"
        ))),
        None => Ok(()),
    }
}

/// `yarnl-backup-<local timestamp>.zip`
pub fn backup_filename(now: DateTime<Local>) -> String {
    format!(
        "{BACKUP_FILE_PREFIX}{}{BACKUP_FILE_EXTENSION}",
        now.format("%Y-%m-%dT%H-%M-%S")
    )
}

/// [`backup_filename`], with a `-N` suffix if that name is already taken
pub async fn unique_backup_filename(backups_dir: &Path, now: DateTime<Local>) -> Result<String> {
    let base = backup_filename(now);
    if !fs::try_exists(backups_dir.join(&base)).await? {
        return Ok(base);
    }

    let stem = base.trim_end_matches(BACKUP_FILE_EXTENSION);
    let mut suffix = 1u32;
    loop {
        let candidate = format!("{stem}-{suffix}{BACKUP_FILE_EXTENSION}");
        if !fs::try_exists(backups_dir.join(&candidate)).await? {
            return Ok(candidate);
        }
        suffix += 1;
    }
}
