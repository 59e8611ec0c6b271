use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Pool sized for a single-user library: a handful of request handlers,
/// the scheduler tick, and one long-lived restore transaction.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let max_connections = max_connections.max(2);

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Some(Duration::from_secs(300)))
        .max_lifetime(Some(Duration::from_secs(3600)))
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    sqlx::query("SELECT 1")
        .fetch_one(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Database connectivity test failed: {}", e))?;

    info!(
        "Connected to PostgreSQL with {} max connections",
        max_connections
    );
    Ok(pool)
}
