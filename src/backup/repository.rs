use super::{BackupError, LibraryTable, Result, SnapshotTables};
use crate::library::{Category, Counter, Hashtag, Pattern, PatternHashtag};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Rows per bulk INSERT statement; keeps the widest table well under the bind limit
const INSERT_BATCH_ROWS: usize = 500;

/// Repository abstraction over the five library tables
#[async_trait]
pub trait LibraryRepository: Send + Sync + std::fmt::Debug {
    /// Read every row of every table from one consistent view
    async fn export_tables(&self) -> Result<SnapshotTables>;

    /// Replace every row of every table in a single transaction.
    /// On failure nothing is changed and `TransactionFailure` is returned.
    async fn replace_all(&self, tables: &SnapshotTables) -> Result<()>;

    async fn category_names(&self) -> Result<Vec<String>>;
}

/// Value the id sequence should hand out next, given the largest restored id
pub fn sequence_restart_value(max_id: Option<i64>) -> i64 {
    match max_id {
        Some(id) if id > 0 => id + 1,
        _ => 1,
    }
}

/// PostgreSQL implementation of the library repository
#[derive(Debug, Clone)]
pub struct PostgresLibraryRepository {
    db_pool: Arc<PgPool>,
}

impl PostgresLibraryRepository {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }

    pub fn pool(&self) -> &PgPool {
        self.db_pool.as_ref()
    }

    /// Point every id sequence just past the rows currently stored
    async fn realign_live_sequences(&self) -> std::result::Result<(), sqlx::Error> {
        for table in LibraryTable::INSERT_ORDER {
            if !table.has_id_sequence() {
                continue;
            }
            sqlx::query(&format!(
                "SELECT setval(pg_get_serial_sequence($1, 'id'), COALESCE(MAX(id), 0) + 1, false) FROM {}",
                table.name()
            ))
            .bind(table.name())
            .execute(self.db_pool.as_ref())
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl LibraryRepository for PostgresLibraryRepository {
    async fn export_tables(&self) -> Result<SnapshotTables> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let categories = sqlx::query_as::<_, Category>(
            "SELECT id, name, position, created_at FROM categories ORDER BY id",
        )
        .fetch_all(&mut *tx)
        .await?;

        let hashtags = sqlx::query_as::<_, Hashtag>(
            "SELECT id, name, position, created_at FROM hashtags ORDER BY id",
        )
        .fetch_all(&mut *tx)
        .await?;

        let patterns = sqlx::query_as::<_, Pattern>(
            r#"
            SELECT id, name, filename, original_name, category, description,
                   is_current, stitch_count, row_count, thumbnail, current_page,
                   completed, completed_date, notes, pattern_type, content,
                   timer_seconds, is_archived, archived_at, is_favorite,
                   created_at, updated_at
            FROM patterns
            ORDER BY id
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let counters = sqlx::query_as::<_, Counter>(
            r#"
            SELECT id, pattern_id, name, value, position, created_at, updated_at
            FROM counters
            ORDER BY id
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let pattern_hashtags = sqlx::query_as::<_, PatternHashtag>(
            "SELECT pattern_id, hashtag_id FROM pattern_hashtags ORDER BY pattern_id, hashtag_id",
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SnapshotTables {
            categories,
            hashtags,
            patterns,
            counters,
            pattern_hashtags,
        })
    }

    async fn replace_all(&self, tables: &SnapshotTables) -> Result<()> {
        let mut tx = self
            .db_pool
            .begin()
            .await
            .map_err(|e| transaction_failure("begin", e))?;

        if let Err(e) = replace_in_transaction(&mut tx, tables).await {
            error!("Restore transaction failed, rolling back: {}", e);
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Rollback reported an error: {}", rollback_err);
            }
            // setval is not transactional, so the rollback left sequences reset
            if let Err(realign_err) = self.realign_live_sequences().await {
                warn!("Could not realign id sequences after rollback: {}", realign_err);
            }
            return Err(transaction_failure("replace", e));
        }

        tx.commit()
            .await
            .map_err(|e| transaction_failure("commit", e))?;

        info!(
            "Restore transaction committed: {} rows across {} tables",
            tables.total_rows(),
            LibraryTable::INSERT_ORDER.len()
        );
        Ok(())
    }

    async fn category_names(&self) -> Result<Vec<String>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT name FROM categories ORDER BY position, name")
                .fetch_all(self.db_pool.as_ref())
                .await?;
        Ok(names)
    }
}

fn transaction_failure(stage: &str, e: sqlx::Error) -> BackupError {
    BackupError::TransactionFailure {
        message: format!("{stage}: {e}"),
    }
}

async fn replace_in_transaction(
    tx: &mut Transaction<'_, Postgres>,
    tables: &SnapshotTables,
) -> std::result::Result<(), sqlx::Error> {
    for table in LibraryTable::WIPE_ORDER {
        let deleted = sqlx::query(&format!("DELETE FROM {}", table.name()))
            .execute(&mut **tx)
            .await?
            .rows_affected();
        debug!("Cleared {} rows from {}", deleted, table.name());
    }

    for table in LibraryTable::INSERT_ORDER {
        if table.has_id_sequence() {
            set_sequence(tx, table, 1).await?;
        }
    }

    insert_categories(tx, &tables.categories).await?;
    let implied = tables.missing_categories(Utc::now());
    if !implied.is_empty() {
        info!(
            "Creating {} categories referenced only by patterns",
            implied.len()
        );
        insert_categories(tx, &implied).await?;
    }
    realign_sequence(tx, LibraryTable::Categories).await?;

    insert_hashtags(tx, &tables.hashtags).await?;
    realign_sequence(tx, LibraryTable::Hashtags).await?;

    insert_patterns(tx, &tables.patterns).await?;
    realign_sequence(tx, LibraryTable::Patterns).await?;

    insert_counters(tx, &tables.counters).await?;
    realign_sequence(tx, LibraryTable::Counters).await?;

    insert_pattern_hashtags(tx, &tables.pattern_hashtags).await?;

    for table in LibraryTable::INSERT_ORDER {
        debug!("Restored {} rows into {}", tables.row_count(table), table.name());
    }
    Ok(())
}

async fn set_sequence(
    tx: &mut Transaction<'_, Postgres>,
    table: LibraryTable,
    next_value: i64,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query("SELECT setval(pg_get_serial_sequence($1, 'id'), $2, false)")
        .bind(table.name())
        .bind(next_value)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn realign_sequence(
    tx: &mut Transaction<'_, Postgres>,
    table: LibraryTable,
) -> std::result::Result<(), sqlx::Error> {
    let max_id: Option<i32> = sqlx::query_scalar(&format!("SELECT MAX(id) FROM {}", table.name()))
        .fetch_one(&mut **tx)
        .await?;
    let next_value = sequence_restart_value(max_id.map(i64::from));
    debug!("Realigning {} id sequence to {}", table.name(), next_value);
    set_sequence(tx, table, next_value).await
}

async fn insert_categories(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[Category],
) -> std::result::Result<(), sqlx::Error> {
    for chunk in rows.chunks(INSERT_BATCH_ROWS) {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO categories (id, name, position, created_at) ");
        builder.push_values(chunk, |mut b, row| {
            b.push_bind(row.id)
                .push_bind(&row.name)
                .push_bind(row.position)
                .push_bind(row.created_at);
        });
        builder.build().execute(&mut **tx).await?;
    }
    Ok(())
}

async fn insert_hashtags(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[Hashtag],
) -> std::result::Result<(), sqlx::Error> {
    for chunk in rows.chunks(INSERT_BATCH_ROWS) {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO hashtags (id, name, position, created_at) ");
        builder.push_values(chunk, |mut b, row| {
            b.push_bind(row.id)
                .push_bind(&row.name)
                .push_bind(row.position)
                .push_bind(row.created_at);
        });
        builder.build().execute(&mut **tx).await?;
    }
    Ok(())
}

async fn insert_patterns(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[Pattern],
) -> std::result::Result<(), sqlx::Error> {
    for chunk in rows.chunks(INSERT_BATCH_ROWS) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"INSERT INTO patterns (
                id, name, filename, original_name, category, description,
                is_current, stitch_count, row_count, thumbnail, current_page,
                completed, completed_date, notes, pattern_type, content,
                timer_seconds, is_archived, archived_at, is_favorite,
                created_at, updated_at
            ) "#,
        );
        builder.push_values(chunk, |mut b, row| {
            b.push_bind(row.id)
                .push_bind(&row.name)
                .push_bind(&row.filename)
                .push_bind(&row.original_name)
                .push_bind(&row.category)
                .push_bind(&row.description)
                .push_bind(row.is_current)
                .push_bind(row.stitch_count)
                .push_bind(row.row_count)
                .push_bind(&row.thumbnail)
                .push_bind(row.current_page)
                .push_bind(row.completed)
                .push_bind(row.completed_date)
                .push_bind(&row.notes)
                .push_bind(row.pattern_type.as_str())
                .push_bind(&row.content)
                .push_bind(row.timer_seconds)
                .push_bind(row.is_archived)
                .push_bind(row.archived_at)
                .push_bind(row.is_favorite)
                .push_bind(row.created_at)
                .push_bind(row.updated_at);
        });
        builder.build().execute(&mut **tx).await?;
    }
    Ok(())
}

async fn insert_counters(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[Counter],
) -> std::result::Result<(), sqlx::Error> {
    for chunk in rows.chunks(INSERT_BATCH_ROWS) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO counters (id, pattern_id, name, value, position, created_at, updated_at) ",
        );
        builder.push_values(chunk, |mut b, row| {
            b.push_bind(row.id)
                .push_bind(row.pattern_id)
                .push_bind(&row.name)
                .push_bind(row.value)
                .push_bind(row.position)
                .push_bind(row.created_at)
                .push_bind(row.updated_at);
        });
        builder.build().execute(&mut **tx).await?;
    }
    Ok(())
}

async fn insert_pattern_hashtags(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[PatternHashtag],
) -> std::result::Result<(), sqlx::Error> {
    for chunk in rows.chunks(INSERT_BATCH_ROWS) {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO pattern_hashtags (pattern_id, hashtag_id) ");
        builder.push_values(chunk, |mut b, row| {
            b.push_bind(row.pattern_id).push_bind(row.hashtag_id);
        });
        builder.build().execute(&mut **tx).await?;
    }
    Ok(())
}

/// In-memory repository for testing. Enforces the same foreign keys and
/// all-or-nothing replacement as the PostgreSQL implementation.
#[derive(Debug, Default)]
pub struct MockLibraryRepository {
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    tables: SnapshotTables,
    next_ids: HashMap<LibraryTable, i64>,
    fail_on_insert: Option<LibraryTable>,
}

impl MockLibraryRepository {
    pub fn with_tables(tables: SnapshotTables) -> Self {
        let repository = Self::default();
        {
            let mut state = repository.lock();
            state.next_ids = next_ids_for(&tables);
            state.tables = tables;
        }
        repository
    }

    /// Make the next `replace_all` fail while inserting into `table`
    pub fn fail_on_insert(&self, table: LibraryTable) {
        self.lock().fail_on_insert = Some(table);
    }

    pub fn tables(&self) -> SnapshotTables {
        self.lock().tables.clone()
    }

    /// Id the table's sequence would hand out next
    pub fn next_id(&self, table: LibraryTable) -> i64 {
        self.lock().next_ids.get(&table).copied().unwrap_or(1)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn next_ids_for(tables: &SnapshotTables) -> HashMap<LibraryTable, i64> {
    LibraryTable::INSERT_ORDER
        .iter()
        .filter(|t| t.has_id_sequence())
        .map(|t| (*t, sequence_restart_value(tables.max_id(*t).map(i64::from))))
        .collect()
}

/// Insert one table's rows into `staged`, enforcing the same keys Postgres does
fn stage_table(
    staged: &mut SnapshotTables,
    incoming: &SnapshotTables,
    table: LibraryTable,
) -> std::result::Result<(), String> {
    let duplicate = |ids: Vec<i32>| {
        let mut seen = HashSet::new();
        ids.into_iter().find(|id| !seen.insert(*id))
    };

    match table {
        LibraryTable::Categories => {
            staged.categories = incoming.categories.clone();
            staged
                .categories
                .extend(incoming.missing_categories(Utc::now()));
        }
        LibraryTable::Hashtags => staged.hashtags = incoming.hashtags.clone(),
        LibraryTable::Patterns => staged.patterns = incoming.patterns.clone(),
        LibraryTable::Counters => {
            let pattern_ids: HashSet<i32> = staged.patterns.iter().map(|p| p.id).collect();
            if let Some(counter) = incoming
                .counters
                .iter()
                .find(|c| !pattern_ids.contains(&c.pattern_id))
            {
                return Err(format!(
                    "counter {} references missing pattern {}",
                    counter.id, counter.pattern_id
                ));
            }
            staged.counters = incoming.counters.clone();
        }
        LibraryTable::PatternHashtags => {
            let pattern_ids: HashSet<i32> = staged.patterns.iter().map(|p| p.id).collect();
            let hashtag_ids: HashSet<i32> = staged.hashtags.iter().map(|h| h.id).collect();
            if let Some(link) = incoming.pattern_hashtags.iter().find(|l| {
                !pattern_ids.contains(&l.pattern_id) || !hashtag_ids.contains(&l.hashtag_id)
            }) {
                return Err(format!(
                    "pattern_hashtags ({}, {}) references a missing row",
                    link.pattern_id, link.hashtag_id
                ));
            }
            staged.pattern_hashtags = incoming.pattern_hashtags.clone();
        }
    }

    let ids: Vec<i32> = match table {
        LibraryTable::Categories => staged.categories.iter().map(|r| r.id).collect(),
        LibraryTable::Hashtags => staged.hashtags.iter().map(|r| r.id).collect(),
        LibraryTable::Patterns => staged.patterns.iter().map(|r| r.id).collect(),
        LibraryTable::Counters => staged.counters.iter().map(|r| r.id).collect(),
        LibraryTable::PatternHashtags => Vec::new(),
    };
    if let Some(id) = duplicate(ids) {
        return Err(format!("duplicate id {id} in {}", table.name()));
    }
    Ok(())
}

#[async_trait]
impl LibraryRepository for MockLibraryRepository {
    async fn export_tables(&self) -> Result<SnapshotTables> {
        Ok(self.tables())
    }

    async fn replace_all(&self, tables: &SnapshotTables) -> Result<()> {
        let mut state = self.lock();
        let fail_on = state.fail_on_insert.take();

        // Wipe then insert table by table into a copy; only a full pass is kept
        let mut staged = SnapshotTables::default();
        for table in LibraryTable::INSERT_ORDER {
            if fail_on == Some(table) {
                return Err(BackupError::TransactionFailure {
                    message: format!(
                        "injected failure inserting into {} after staging {} rows",
                        table.name(),
                        staged.total_rows()
                    ),
                });
            }
            stage_table(&mut staged, tables, table)
                .map_err(|message| BackupError::TransactionFailure { message })?;
        }

        state.next_ids = next_ids_for(&staged);
        state.tables = staged;
        Ok(())
    }

    async fn category_names(&self) -> Result<Vec<String>> {
        let mut categories = self.lock().tables.categories.clone();
        categories.sort_by(|a, b| a.position.cmp(&b.position).then(a.name.cmp(&b.name)));
        Ok(categories.into_iter().map(|c| c.name).collect())
    }
}

/// Small but fully linked dataset used across unit tests
#[cfg(test)]
pub(crate) fn sample_tables() -> SnapshotTables {
    use crate::library::PatternType;
    use chrono::{TimeZone, Utc};

    let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
    let pattern = |id: i32, name: &str, category: &str| Pattern {
        id,
        name: name.to_string(),
        filename: format!("{}.pdf", name.to_lowercase()),
        original_name: format!("{name}.pdf"),
        category: category.to_string(),
        description: Some(format!("{name} description")),
        is_current: id == 3,
        stitch_count: 12,
        row_count: 40,
        thumbnail: Some(format!("thumb-{}.jpg", name.to_lowercase())),
        current_page: 2,
        completed: false,
        completed_date: None,
        notes: String::new(),
        pattern_type: PatternType::Pdf,
        content: None,
        timer_seconds: 600,
        is_archived: false,
        archived_at: None,
        is_favorite: id == 7,
        created_at: at,
        updated_at: at,
    };

    SnapshotTables {
        categories: vec![
            Category { id: 1, name: "Knitting".into(), position: 0, created_at: at },
            Category { id: 4, name: "Crochet".into(), position: 1, created_at: at },
        ],
        hashtags: vec![
            Hashtag { id: 2, name: "socks".into(), position: 0, created_at: at },
            Hashtag { id: 9, name: "lace".into(), position: 1, created_at: at },
        ],
        patterns: vec![pattern(3, "Socks", "Knitting"), pattern(7, "Doily", "Crochet")],
        counters: vec![Counter {
            id: 11,
            pattern_id: 3,
            name: "Rows".into(),
            value: 18,
            position: 0,
            created_at: at,
            updated_at: at,
        }],
        pattern_hashtags: vec![
            PatternHashtag { pattern_id: 3, hashtag_id: 2 },
            PatternHashtag { pattern_id: 7, hashtag_id: 9 },
        ],
    }
}
