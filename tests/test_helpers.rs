//! Shared setup for tests that need a live PostgreSQL database.
//!
//! Point `TEST_DATABASE_URL` (or `DATABASE_URL`) at a disposable database.
//! When neither is reachable the tests log a notice and return early.

#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tempfile::TempDir;
use yarnl_backup::{
    backup::{BackupManager, PostgresLibraryRepository, SnapshotTables, StorageRoots},
    library::{create_pool, ensure_schema, Category, Counter, Hashtag, Pattern, PatternHashtag},
    settings::PostgresSettingsStore,
};

pub struct TestEnvironment {
    pub pool: Arc<PgPool>,
    pub repository: Arc<PostgresLibraryRepository>,
    pub settings_store: Arc<PostgresSettingsStore>,
    pub manager: BackupManager,
    pub roots: StorageRoots,
    _storage: TempDir,
}

impl TestEnvironment {
    /// Connect, create the schema and empty every library table.
    /// Returns `None` when no test database is available.
    pub async fn try_new() -> Result<Option<Self>> {
        let database_url = match std::env::var("TEST_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
        {
            Ok(url) => url,
            Err(_) => {
                eprintln!("⏭️  TEST_DATABASE_URL not set, skipping database test");
                return Ok(None);
            }
        };

        let pool = match create_pool(&database_url, 4).await {
            Ok(pool) => Arc::new(pool),
            Err(e) => {
                eprintln!("⏭️  Test database unreachable ({e}), skipping");
                return Ok(None);
            }
        };

        ensure_schema(pool.as_ref()).await?;
        wipe_library(pool.as_ref()).await?;

        let storage = TempDir::new()?;
        let roots = StorageRoots {
            patterns_dir: storage.path().join("patterns"),
            images_dir: storage.path().join("images"),
            archive_dir: storage.path().join("archive"),
            backups_dir: storage.path().join("backups"),
        };
        let repository = Arc::new(PostgresLibraryRepository::new(pool.clone()));
        let manager = BackupManager::new(repository.clone(), roots.clone());
        manager.initialize().await?;

        Ok(Some(Self {
            settings_store: Arc::new(PostgresSettingsStore::new(pool.clone())),
            pool,
            repository,
            manager,
            roots,
            _storage: storage,
        }))
    }

    pub async fn next_id(&self, table: &str) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(&format!(
            "SELECT nextval(pg_get_serial_sequence('{table}', 'id'))"
        ))
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(id)
    }
}

pub async fn wipe_library(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "TRUNCATE pattern_hashtags, counters, patterns, hashtags, categories, settings RESTART IDENTITY",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Whole-second timestamp so values survive the microsecond column precision
pub fn fixed_time(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn category(id: i32, name: &str) -> Category {
    Category {
        id,
        name: name.to_string(),
        position: id,
        created_at: fixed_time(1),
    }
}

pub fn hashtag(id: i32, name: &str) -> Hashtag {
    Hashtag {
        id,
        name: name.to_string(),
        position: 0,
        created_at: fixed_time(2),
    }
}

pub fn pattern(id: i32, name: &str, category: &str) -> Pattern {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "name": name,
        "filename": format!("{}.pdf", name.to_lowercase()),
        "original_name": format!("{name}.pdf"),
        "category": category,
        "notes": "cast on loosely",
        "created_at": fixed_time(3),
        "updated_at": fixed_time(4),
    }))
    .unwrap_or_else(|e| panic!("fixture pattern: {e}"))
}

pub fn counter(id: i32, pattern_id: i32) -> Counter {
    Counter {
        id,
        pattern_id,
        name: "Rows".to_string(),
        value: 17,
        position: 0,
        created_at: fixed_time(5),
        updated_at: fixed_time(5),
    }
}

/// Library with gaps in every id column
pub fn library_fixture() -> SnapshotTables {
    SnapshotTables {
        categories: vec![category(2, "Knitting"), category(5, "Crochet")],
        hashtags: vec![hashtag(3, "socks"), hashtag(8, "lace")],
        patterns: vec![
            pattern(4, "Socks", "Knitting"),
            pattern(9, "Doily", "Crochet"),
        ],
        counters: vec![counter(6, 4), counter(12, 9)],
        pattern_hashtags: vec![
            PatternHashtag {
                pattern_id: 4,
                hashtag_id: 3,
            },
            PatternHashtag {
                pattern_id: 9,
                hashtag_id: 8,
            },
        ],
    }
}
