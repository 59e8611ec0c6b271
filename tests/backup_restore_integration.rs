//! Backup and restore against a live PostgreSQL database

mod test_helpers;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use serial_test::serial;
use test_helpers::{category, counter, library_fixture, TestEnvironment};
use tracing_test::traced_test;
use yarnl_backup::{
    backup::{BackupError, BackupOptions, LibraryRepository},
    settings::{self, BackupScheduleSettings, ScheduleFrequency, SettingsStore},
};

#[traced_test]
#[tokio::test]
#[serial]
async fn test_backup_then_restore_round_trip() -> Result<()> {
    let Some(env) = TestEnvironment::try_new().await? else {
        return Ok(());
    };
    let fixture = library_fixture();
    env.repository.replace_all(&fixture).await?;

    let archive = env.manager.create_backup(BackupOptions::default()).await?;
    assert!(archive.size > 0);

    // Diverge from the snapshot before restoring
    sqlx::query("INSERT INTO categories (name) VALUES ('Weaving')")
        .execute(env.pool.as_ref())
        .await?;
    sqlx::query("DELETE FROM counters").execute(env.pool.as_ref()).await?;

    let outcome = env.manager.restore_backup(&archive.filename).await?;
    assert!(outcome.file_sync_warning.is_none());

    let restored = env.repository.export_tables().await?;
    assert_eq!(restored, fixture);

    assert!(env.roots.patterns_dir.join("Knitting").is_dir());
    assert!(env.roots.patterns_dir.join("Crochet").is_dir());
    assert!(!env.roots.patterns_dir.join("Weaving").exists());
    Ok(())
}

#[traced_test]
#[tokio::test]
#[serial]
async fn test_sequences_realigned_after_restore() -> Result<()> {
    let Some(env) = TestEnvironment::try_new().await? else {
        return Ok(());
    };
    let mut fixture = library_fixture();
    fixture.counters.clear();
    env.repository.replace_all(&fixture).await?;

    assert_eq!(env.next_id("categories").await?, 6);
    assert_eq!(env.next_id("hashtags").await?, 9);
    assert_eq!(env.next_id("patterns").await?, 10);
    // Empty table starts over
    assert_eq!(env.next_id("counters").await?, 1);
    Ok(())
}

#[traced_test]
#[tokio::test]
#[serial]
async fn test_restore_creates_categories_named_by_patterns() -> Result<()> {
    let Some(env) = TestEnvironment::try_new().await? else {
        return Ok(());
    };
    let mut fixture = library_fixture();
    fixture.patterns[1].category = "Tunisian".to_string();
    env.repository.replace_all(&fixture).await?;

    let restored = env.repository.export_tables().await?;
    let tunisian = restored
        .categories
        .iter()
        .find(|c| c.name == "Tunisian")
        .expect("implied category row");
    assert_eq!(tunisian.id, 6);
    assert_eq!(env.next_id("categories").await?, 7);
    Ok(())
}

#[traced_test]
#[tokio::test]
#[serial]
async fn test_failed_restore_leaves_database_untouched() -> Result<()> {
    let Some(env) = TestEnvironment::try_new().await? else {
        return Ok(());
    };
    let fixture = library_fixture();
    env.repository.replace_all(&fixture).await?;

    let mut broken = library_fixture();
    broken.categories = vec![category(1, "Spinning")];
    broken.counters.push(counter(40, 999));

    let err = env.repository.replace_all(&broken).await.unwrap_err();
    assert!(matches!(err, BackupError::TransactionFailure { .. }));

    let current = env.repository.export_tables().await?;
    assert_eq!(current, fixture);
    assert_eq!(env.next_id("counters").await?, 13);
    Ok(())
}

#[traced_test]
#[tokio::test]
#[serial]
async fn test_restore_of_missing_archive_is_not_found() -> Result<()> {
    let Some(env) = TestEnvironment::try_new().await? else {
        return Ok(());
    };

    let err = env
        .manager
        .restore_backup("yarnl-backup-2020-01-01T00-00-00.zip")
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::NotFound { .. }));
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_settings_store_upsert() -> Result<()> {
    let Some(env) = TestEnvironment::try_new().await? else {
        return Ok(());
    };
    let store = env.settings_store.as_ref();

    assert!(store.get("backup_schedule").await?.is_none());
    let defaults: BackupScheduleSettings = settings::load(store).await?;
    assert!(!defaults.enabled);

    let mut schedule = defaults.clone();
    schedule.enabled = true;
    schedule.schedule = ScheduleFrequency::Weekly;
    schedule.time = "22:30".to_string();
    settings::save(store, &schedule).await?;

    let last = Utc.with_ymd_and_hms(2025, 6, 1, 22, 30, 0).unwrap();
    settings::record_last_backup(store, last).await?;

    let saved: BackupScheduleSettings = settings::load(store).await?;
    assert!(saved.enabled);
    assert_eq!(saved.schedule, ScheduleFrequency::Weekly);
    assert_eq!(saved.time, "22:30");
    assert_eq!(saved.last_backup, Some(last));
    Ok(())
}
