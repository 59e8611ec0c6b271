//! Zip codec for backup archives.
//!
//! Layout:
//!
//! ```text
//! database.json   required, the serialized Snapshot
//! settings.json   optional, opaque client settings copied through verbatim
//! patterns/       optional, mirror of the pattern root (thumbnails/ included)
//! images/         optional, mirror of the markdown image root
//! archive/        optional, mirror of the archived-pattern root
//! ```

use super::{BackupError, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const DATABASE_ENTRY: &str = "database.json";
pub const SETTINGS_ENTRY: &str = "settings.json";
pub const PATTERNS_TREE: &str = "patterns";
pub const IMAGES_TREE: &str = "images";
pub const ARCHIVE_TREE: &str = "archive";

/// Backups are infrequent, so size wins over speed
const DEFLATE_LEVEL: i64 = 9;

/// A live directory bundled under `prefix/` in the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeSelection {
    pub prefix: &'static str,
    pub source: PathBuf,
}

impl TreeSelection {
    pub fn new(prefix: &'static str, source: impl Into<PathBuf>) -> Self {
        Self {
            prefix,
            source: source.into(),
        }
    }
}

/// Everything that goes into one archive
#[derive(Debug, Clone)]
pub struct ArchiveContents {
    pub database_json: Vec<u8>,
    pub settings_json: Option<Vec<u8>>,
    pub trees: Vec<TreeSelection>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub files: usize,
    pub directories: usize,
    pub skipped_trees: usize,
}

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(DEFLATE_LEVEL))
        .unix_permissions(0o644)
}

/// Write `contents` to a new archive at `output`. Absent trees are skipped;
/// any stream error aborts the write.
pub fn write_archive(contents: &ArchiveContents, output: &Path) -> Result<ArchiveStats> {
    let file = File::create(output).map_err(|e| BackupError::io_failure(output, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = file_options();
    let mut stats = ArchiveStats::default();

    zip.start_file(DATABASE_ENTRY, options)
        .map_err(|e| BackupError::io_failure(output, e))?;
    zip.write_all(&contents.database_json)
        .map_err(|e| BackupError::io_failure(output, e))?;
    stats.files += 1;

    if let Some(settings_json) = &contents.settings_json {
        zip.start_file(SETTINGS_ENTRY, options)
            .map_err(|e| BackupError::io_failure(output, e))?;
        zip.write_all(settings_json)
            .map_err(|e| BackupError::io_failure(output, e))?;
        stats.files += 1;
    }

    for tree in &contents.trees {
        if !tree.source.is_dir() {
            debug!(
                "Skipping {}/: {} does not exist",
                tree.prefix,
                tree.source.display()
            );
            stats.skipped_trees += 1;
            continue;
        }
        add_tree(&mut zip, tree, options, &mut stats)?;
    }

    let mut writer = zip
        .finish()
        .map_err(|e| BackupError::io_failure(output, e))?;
    writer
        .flush()
        .map_err(|e| BackupError::io_failure(output, e))?;

    info!(
        "Wrote archive {} ({} files, {} directories)",
        output.display(),
        stats.files,
        stats.directories
    );
    Ok(stats)
}

fn add_tree<W: Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    tree: &TreeSelection,
    options: SimpleFileOptions,
    stats: &mut ArchiveStats,
) -> Result<()> {
    zip.add_directory(format!("{}/", tree.prefix), options)
        .map_err(|e| BackupError::io_failure(&tree.source, e))?;
    stats.directories += 1;

    let walker = WalkDir::new(&tree.source)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| BackupError::io_failure(&tree.source, e))?;
        let relative = entry
            .path()
            .strip_prefix(&tree.source)
            .map_err(|e| BackupError::io_failure(entry.path(), e))?;
        let name = archive_entry_name(tree.prefix, relative);

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), options)
                .map_err(|e| BackupError::io_failure(entry.path(), e))?;
            stats.directories += 1;
        } else if entry.file_type().is_file() {
            let mut source =
                File::open(entry.path()).map_err(|e| BackupError::io_failure(entry.path(), e))?;
            zip.start_file(name, options)
                .map_err(|e| BackupError::io_failure(entry.path(), e))?;
            io::copy(&mut source, zip).map_err(|e| BackupError::io_failure(entry.path(), e))?;
            stats.files += 1;
        }
    }

    Ok(())
}

/// Zip entry names always use forward slashes
fn archive_entry_name(prefix: &str, relative: &Path) -> String {
    let mut name = String::from(prefix);
    for component in relative.components() {
        name.push('/');
        name.push_str(&component.as_os_str().to_string_lossy());
    }
    name
}

/// Fully decompress `archive_path` into `staging`, then require `database.json`
pub fn extract_archive(archive_path: &Path, staging: &Path) -> Result<ArchiveStats> {
    let file = File::open(archive_path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => BackupError::NotFound {
            filename: archive_path.display().to_string(),
        },
        _ => BackupError::io_failure(archive_path, e),
    })?;

    let corrupt = |e: &dyn std::fmt::Display| {
        BackupError::invalid_archive(format!("corrupt or unreadable archive: {e}"))
    };

    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| corrupt(&e))?;
    fs::create_dir_all(staging).map_err(|e| BackupError::io_failure(staging, e))?;
    let mut stats = ArchiveStats::default();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| corrupt(&e))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(BackupError::invalid_archive(format!(
                "entry {:?} escapes the extraction directory",
                entry.name()
            )));
        };
        let target = staging.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| BackupError::io_failure(&target, e))?;
            stats.directories += 1;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| BackupError::io_failure(parent, e))?;
        }
        let mut output = File::create(&target).map_err(|e| BackupError::io_failure(&target, e))?;
        // Decompression and checksum failures surface as InvalidData
        io::copy(&mut entry, &mut output).map_err(|e| match e.kind() {
            ErrorKind::InvalidData | ErrorKind::UnexpectedEof => corrupt(&e),
            _ => BackupError::io_failure(&target, e),
        })?;
        stats.files += 1;
    }

    if !staging.join(DATABASE_ENTRY).is_file() {
        return Err(BackupError::invalid_archive(format!(
            "not a valid backup: {DATABASE_ENTRY} is missing"
        )));
    }

    debug!(
        "Extracted {} files into {}",
        stats.files,
        staging.display()
    );
    Ok(stats)
}

/// [`write_archive`] on the blocking pool
pub async fn write_archive_async(contents: ArchiveContents, output: PathBuf) -> Result<ArchiveStats> {
    tokio::task::spawn_blocking(move || write_archive(&contents, &output))
        .await
        .map_err(|e| BackupError::IoFailure {
            message: format!("archive writer task failed: {e}"),
        })?
}

/// [`extract_archive`] on the blocking pool
pub async fn extract_archive_async(archive_path: PathBuf, staging: PathBuf) -> Result<ArchiveStats> {
    tokio::task::spawn_blocking(move || extract_archive(&archive_path, &staging))
        .await
        .map_err(|e| BackupError::IoFailure {
            message: format!("archive extraction task failed: {e}"),
        })?
}
