//! Typed application settings persisted as JSON documents in the `settings` table.
//!
//! Every document is read through [`merge_with_defaults`], so a stored value
//! that is missing fields, carries stale fields, or holds a field of the wrong
//! type still loads into a complete, valid struct.

use crate::backup::{PruneMode, PrunePolicy, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// A settings document stored under a fixed key
pub trait StoredSettings: Default + Serialize + DeserializeOwned + Send {
    const KEY: &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleFrequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl ScheduleFrequency {
    /// Minimum days since the last backup before another one is due.
    /// Slightly under the nominal period so a once-per-minute check still fires.
    pub fn min_elapsed_days(&self) -> f64 {
        match self {
            ScheduleFrequency::Daily => 0.9,
            ScheduleFrequency::Weekly => 6.9,
            ScheduleFrequency::Monthly => 29.0,
        }
    }
}

impl fmt::Display for ScheduleFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleFrequency::Daily => write!(f, "daily"),
            ScheduleFrequency::Weekly => write!(f, "weekly"),
            ScheduleFrequency::Monthly => write!(f, "monthly"),
        }
    }
}

/// Wall-clock `HH:MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub const DEFAULT: TimeOfDay = TimeOfDay { hour: 3, minute: 0 };

    pub fn parse(value: &str) -> Option<Self> {
        let (hour, minute) = value.trim().split_once(':')?;
        let hour: u32 = hour.parse().ok()?;
        let minute: u32 = minute.parse().ok()?;
        (hour <= 23 && minute <= 59).then_some(TimeOfDay { hour, minute })
    }

    pub fn parse_or_default(value: &str) -> Self {
        Self::parse(value).unwrap_or_else(|| {
            warn!(
                "Invalid backup time '{}', falling back to {}",
                value,
                Self::DEFAULT
            );
            Self::DEFAULT
        })
    }

    pub fn minutes_since_midnight(&self) -> u32 {
        self.hour * 60 + self.minute
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupScheduleSettings {
    pub enabled: bool,
    pub schedule: ScheduleFrequency,
    pub time: String,
    pub include_patterns: bool,
    pub include_images: bool,
    pub include_archive: bool,
    pub prune_enabled: bool,
    pub prune_mode: PruneMode,
    pub prune_value: u32,
    pub last_backup: Option<DateTime<Utc>>,
}

impl Default for BackupScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: ScheduleFrequency::Daily,
            time: TimeOfDay::DEFAULT.to_string(),
            include_patterns: true,
            include_images: true,
            include_archive: false,
            prune_enabled: false,
            prune_mode: PruneMode::Keep,
            prune_value: 5,
            last_backup: None,
        }
    }
}

impl BackupScheduleSettings {
    pub fn time_of_day(&self) -> TimeOfDay {
        TimeOfDay::parse_or_default(&self.time)
    }

    pub fn prune_policy(&self) -> PrunePolicy {
        PrunePolicy::new(self.prune_mode, self.prune_value)
    }
}

impl StoredSettings for BackupScheduleSettings {
    const KEY: &'static str = "backup_schedule";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub url: Option<String>,
    pub notify_backup_success: bool,
    pub notify_backup_failure: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            notify_backup_success: true,
            notify_backup_failure: true,
        }
    }
}

impl StoredSettings for NotificationSettings {
    const KEY: &'static str = "notifications";
}

/// Overlay `stored` onto `T::default()` one field at a time, keeping the
/// default for any field whose stored value does not deserialize.
pub fn merge_with_defaults<T>(stored: &Value) -> T
where
    T: Default + Serialize + DeserializeOwned,
{
    let defaults = T::default();
    let Value::Object(stored) = stored else {
        return defaults;
    };
    let Ok(Value::Object(mut merged)) = serde_json::to_value(&defaults) else {
        return defaults;
    };

    for (key, value) in stored {
        if !merged.contains_key(key) {
            continue;
        }
        let previous = merged.insert(key.clone(), value.clone());
        if serde_json::from_value::<T>(Value::Object(merged.clone())).is_err() {
            debug!("Ignoring invalid stored value for setting '{}'", key);
            if let Some(previous) = previous {
                merged.insert(key.clone(), previous);
            }
        }
    }

    serde_json::from_value(Value::Object(merged)).unwrap_or(defaults)
}

/// Raw key/value persistence for settings documents
#[async_trait]
pub trait SettingsStore: Send + Sync + fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn put(&self, key: &str, value: Value) -> Result<()>;
}

/// Load a typed settings document, falling back to defaults for anything missing
pub async fn load<T: StoredSettings>(store: &dyn SettingsStore) -> Result<T> {
    Ok(store
        .get(T::KEY)
        .await?
        .map(|value| merge_with_defaults(&value))
        .unwrap_or_default())
}

pub async fn save<T: StoredSettings + Sync>(store: &dyn SettingsStore, settings: &T) -> Result<()> {
    store.put(T::KEY, serde_json::to_value(settings)?).await
}

/// Advance `lastBackup`; only called after a backup has succeeded
pub async fn record_last_backup(store: &dyn SettingsStore, at: DateTime<Utc>) -> Result<()> {
    let mut schedule: BackupScheduleSettings = load(store).await?;
    schedule.last_backup = Some(at);
    save(store, &schedule).await
}

/// PostgreSQL-backed settings store
#[derive(Debug, Clone)]
pub struct PostgresSettingsStore {
    db_pool: Arc<PgPool>,
}

impl PostgresSettingsStore {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SettingsStore for PostgresSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let value: Option<Value> = sqlx::query_scalar("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(self.db_pool.as_ref())
            .await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(self.db_pool.as_ref())
        .await?;
        Ok(())
    }
}

/// In-memory settings store for testing
#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    values: RwLock<HashMap<String, Value>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.read().unwrap_or_else(|p| p.into_inner());
        Ok(values.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(|p| p.into_inner());
        values.insert(key.to_string(), value);
        Ok(())
    }
}
