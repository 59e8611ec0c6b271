use sqlx::PgPool;
use tracing::{debug, info};

/// Tables, in creation order. Children come after the tables they reference.
const SCHEMA_STATEMENTS: &[(&str, &str)] = &[
    (
        "categories",
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id SERIAL PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE,
            position INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "hashtags",
        r#"
        CREATE TABLE IF NOT EXISTS hashtags (
            id SERIAL PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE,
            position INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "patterns",
        r#"
        CREATE TABLE IF NOT EXISTS patterns (
            id SERIAL PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            filename VARCHAR(255) NOT NULL,
            original_name VARCHAR(255) NOT NULL,
            category VARCHAR(255) NOT NULL,
            description TEXT,
            is_current BOOLEAN NOT NULL DEFAULT false,
            stitch_count INTEGER NOT NULL DEFAULT 0 CHECK (stitch_count >= 0),
            row_count INTEGER NOT NULL DEFAULT 0 CHECK (row_count >= 0),
            thumbnail VARCHAR(255),
            current_page INTEGER NOT NULL DEFAULT 1,
            completed BOOLEAN NOT NULL DEFAULT false,
            completed_date TIMESTAMPTZ,
            notes TEXT NOT NULL DEFAULT '',
            pattern_type VARCHAR(20) NOT NULL DEFAULT 'pdf',
            content TEXT,
            timer_seconds INTEGER NOT NULL DEFAULT 0 CHECK (timer_seconds >= 0),
            is_archived BOOLEAN NOT NULL DEFAULT false,
            archived_at TIMESTAMPTZ,
            is_favorite BOOLEAN NOT NULL DEFAULT false,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "counters",
        r#"
        CREATE TABLE IF NOT EXISTS counters (
            id SERIAL PRIMARY KEY,
            pattern_id INTEGER NOT NULL REFERENCES patterns(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            value INTEGER NOT NULL DEFAULT 0 CHECK (value >= 0),
            position INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "pattern_hashtags",
        r#"
        CREATE TABLE IF NOT EXISTS pattern_hashtags (
            pattern_id INTEGER NOT NULL REFERENCES patterns(id) ON DELETE CASCADE,
            hashtag_id INTEGER NOT NULL REFERENCES hashtags(id) ON DELETE CASCADE,
            PRIMARY KEY (pattern_id, hashtag_id)
        )
        "#,
    ),
    (
        "settings",
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key VARCHAR(255) PRIMARY KEY,
            value JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
];

/// Create the library tables if they do not exist yet
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    info!("📋 Ensuring library schema");

    for (table, statement) in SCHEMA_STATEMENTS {
        debug!("Ensuring table {}", table);
        sqlx::query(statement).execute(pool).await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_counters_pattern_id ON counters(pattern_id)")
        .execute(pool)
        .await?;

    Ok(())
}
