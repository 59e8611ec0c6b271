use super::{BackupError, LibraryRepository, Result};
use crate::library::{Category, Counter, Hashtag, Pattern, PatternHashtag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Format written into every `database.json`
pub const SNAPSHOT_FORMAT_VERSION: &str = "1.0";

/// The five library tables covered by a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibraryTable {
    Categories,
    Hashtags,
    Patterns,
    Counters,
    PatternHashtags,
}

impl LibraryTable {
    /// Parents before children: the order rows are exported and re-inserted
    pub const INSERT_ORDER: [LibraryTable; 5] = [
        LibraryTable::Categories,
        LibraryTable::Hashtags,
        LibraryTable::Patterns,
        LibraryTable::Counters,
        LibraryTable::PatternHashtags,
    ];

    /// Children before parents: the order rows are wiped in
    pub const WIPE_ORDER: [LibraryTable; 5] = [
        LibraryTable::PatternHashtags,
        LibraryTable::Counters,
        LibraryTable::Patterns,
        LibraryTable::Hashtags,
        LibraryTable::Categories,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LibraryTable::Categories => "categories",
            LibraryTable::Hashtags => "hashtags",
            LibraryTable::Patterns => "patterns",
            LibraryTable::Counters => "counters",
            LibraryTable::PatternHashtags => "pattern_hashtags",
        }
    }

    /// Whether the table owns an auto-increment `id` sequence
    pub fn has_id_sequence(&self) -> bool {
        !matches!(self, LibraryTable::PatternHashtags)
    }
}

/// Full-column rows of every library table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotTables {
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub hashtags: Vec<Hashtag>,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    #[serde(default)]
    pub counters: Vec<Counter>,
    #[serde(default)]
    pub pattern_hashtags: Vec<PatternHashtag>,
}

impl SnapshotTables {
    pub fn row_count(&self, table: LibraryTable) -> usize {
        match table {
            LibraryTable::Categories => self.categories.len(),
            LibraryTable::Hashtags => self.hashtags.len(),
            LibraryTable::Patterns => self.patterns.len(),
            LibraryTable::Counters => self.counters.len(),
            LibraryTable::PatternHashtags => self.pattern_hashtags.len(),
        }
    }

    /// Largest id present in an id-bearing table
    pub fn max_id(&self, table: LibraryTable) -> Option<i32> {
        match table {
            LibraryTable::Categories => self.categories.iter().map(|r| r.id).max(),
            LibraryTable::Hashtags => self.hashtags.iter().map(|r| r.id).max(),
            LibraryTable::Patterns => self.patterns.iter().map(|r| r.id).max(),
            LibraryTable::Counters => self.counters.iter().map(|r| r.id).max(),
            LibraryTable::PatternHashtags => None,
        }
    }

    /// Categories named by a pattern but absent from `categories`, in order of
    /// first use. Ids and positions continue after the snapshot's own rows.
    pub fn missing_categories(&self, created_at: DateTime<Utc>) -> Vec<Category> {
        let mut known: HashSet<&str> = self.categories.iter().map(|c| c.name.as_str()).collect();
        let mut next_id = self.max_id(LibraryTable::Categories).unwrap_or(0).max(0) + 1;
        let mut next_position = self
            .categories
            .iter()
            .map(|c| c.position + 1)
            .max()
            .unwrap_or(0);

        let mut missing = Vec::new();
        for pattern in &self.patterns {
            let name = pattern.category.as_str();
            if name.is_empty() || !known.insert(name) {
                continue;
            }
            missing.push(Category {
                id: next_id,
                name: name.to_string(),
                position: next_position,
                created_at,
            });
            next_id += 1;
            next_position += 1;
        }
        missing
    }

    pub fn total_rows(&self) -> usize {
        LibraryTable::INSERT_ORDER
            .iter()
            .map(|t| self.row_count(*t))
            .sum()
    }
}

/// Versioned JSON representation of every library row at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub export_date: DateTime<Utc>,
    pub version: String,
    #[serde(default)]
    pub account: Option<serde_json::Value>,
    #[serde(default)]
    pub include_patterns: bool,
    #[serde(default)]
    pub include_images: bool,
    #[serde(default)]
    pub include_archive: bool,
    #[serde(default)]
    pub tables: SnapshotTables,
}

impl Snapshot {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse `database.json`, accepting any 1.x format version
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_slice(bytes).map_err(|e| {
            BackupError::invalid_archive(format!("database.json could not be parsed: {e}"))
        })?;

        let major = snapshot.version.split('.').next().unwrap_or_default();
        if major != "1" {
            return Err(BackupError::invalid_archive(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        if snapshot.version != SNAPSHOT_FORMAT_VERSION {
            warn!(
                "Snapshot version {} differs from {}, restoring anyway",
                snapshot.version, SNAPSHOT_FORMAT_VERSION
            );
        }

        Ok(snapshot)
    }
}

/// Which file trees get bundled next to the snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InclusionFlags {
    pub include_patterns: bool,
    pub include_images: bool,
    pub include_archive: bool,
}

/// Reads every library table into a [`Snapshot`]
#[derive(Debug, Clone)]
pub struct SnapshotExporter {
    repository: Arc<dyn LibraryRepository>,
}

impl SnapshotExporter {
    pub fn new(repository: Arc<dyn LibraryRepository>) -> Self {
        Self { repository }
    }

    /// Export every row of every table. Flags only describe bundled file trees.
    #[instrument(skip(self))]
    pub async fn export(&self, flags: InclusionFlags) -> Result<Snapshot> {
        let tables = self.repository.export_tables().await?;

        info!(
            "Exported snapshot: {} categories, {} hashtags, {} patterns, {} counters, {} pattern hashtags",
            tables.categories.len(),
            tables.hashtags.len(),
            tables.patterns.len(),
            tables.counters.len(),
            tables.pattern_hashtags.len()
        );

        Ok(Snapshot {
            export_date: Utc::now(),
            version: SNAPSHOT_FORMAT_VERSION.to_string(),
            account: None,
            include_patterns: flags.include_patterns,
            include_images: flags.include_images,
            include_archive: flags.include_archive,
            tables,
        })
    }
}
