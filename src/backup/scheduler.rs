//! Once-per-minute due-check for scheduled backups.
//!
//! The only state carried between ticks is the persisted `lastBackup`, which
//! is advanced only after a backup succeeded. A failed run therefore retries
//! on the next tick.

use super::{BackupArchive, BackupManager, BackupOptions, PruneReport, Result};
use crate::notifications::{Notifier, BACKUP_COMPLETE_TITLE, BACKUP_FAILED_TITLE};
use crate::settings::{self, BackupScheduleSettings, NotificationSettings, SettingsStore};
use chrono::{DateTime, Local, TimeZone, Timelike, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, instrument, warn};

/// Every minute, on the minute
pub const TICK_SCHEDULE: &str = "0 * * * * *";

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Whether a scheduled backup should run at `now`
pub fn is_backup_due<Tz: TimeZone>(settings: &BackupScheduleSettings, now: &DateTime<Tz>) -> bool {
    if !settings.enabled {
        return false;
    }

    let scheduled = settings.time_of_day();
    let current_minutes = now.hour() * 60 + now.minute();
    if current_minutes < scheduled.minutes_since_midnight() {
        return false;
    }

    match settings.last_backup {
        None => true,
        Some(last_backup) => {
            let elapsed = now.with_timezone(&Utc) - last_backup;
            let elapsed_days = elapsed.num_seconds() as f64 / SECONDS_PER_DAY;
            elapsed_days >= settings.schedule.min_elapsed_days()
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    NotDue,
    /// A previous scheduled run was still in progress
    Skipped,
    Completed {
        archive: BackupArchive,
        pruned: Option<PruneReport>,
    },
    Failed(String),
}

#[derive(Clone)]
pub struct BackupScheduler {
    manager: Arc<BackupManager>,
    settings_store: Arc<dyn SettingsStore>,
    notifier: Arc<dyn Notifier>,
    /// Held for the duration of a scheduled run
    run_guard: Arc<Mutex<()>>,
    job_scheduler: Arc<Mutex<Option<JobScheduler>>>,
}

impl std::fmt::Debug for BackupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupScheduler")
            .field("manager", &self.manager)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

impl BackupScheduler {
    pub fn new(
        manager: Arc<BackupManager>,
        settings_store: Arc<dyn SettingsStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            manager,
            settings_store,
            notifier,
            run_guard: Arc::new(Mutex::new(())),
            job_scheduler: Arc::new(Mutex::new(None)),
        }
    }

    /// Register the every-minute job and start the underlying cron scheduler
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.job_scheduler.lock().await;
        if slot.is_some() {
            warn!("Backup scheduler is already running");
            return Ok(());
        }

        let job_scheduler = JobScheduler::new().await?;
        let runner = self.clone();
        let job = Job::new_async(TICK_SCHEDULE, move |_uuid, _lock| {
            let runner = runner.clone();
            Box::pin(async move {
                let outcome = runner.tick(Local::now()).await;
                debug!("Backup schedule tick: {:?}", outcome);
            })
        })?;

        let job_id = job_scheduler.add(job).await?;
        job_scheduler.start().await?;
        *slot = Some(job_scheduler);

        info!(job_id = %job_id, cron = TICK_SCHEDULE, "Backup scheduler started");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(mut job_scheduler) = self.job_scheduler.lock().await.take() {
            job_scheduler.shutdown().await?;
            info!("Backup scheduler stopped");
        }
        Ok(())
    }

    /// Run one due-check, and the backup if it is due
    #[instrument(skip(self, now), fields(now = %now.format("%Y-%m-%d %H:%M")))]
    pub async fn tick(&self, now: DateTime<Local>) -> TickOutcome {
        let Ok(_running) = self.run_guard.try_lock() else {
            warn!("Previous scheduled backup is still running, skipping this tick");
            return TickOutcome::Skipped;
        };

        let schedule: BackupScheduleSettings =
            match settings::load(self.settings_store.as_ref()).await {
                Ok(schedule) => schedule,
                Err(e) => {
                    error!("Failed to load backup schedule: {}", e);
                    return TickOutcome::Failed(e.to_string());
                }
            };

        if !is_backup_due(&schedule, &now) {
            return TickOutcome::NotDue;
        }

        info!(
            "Scheduled {} backup is due (time {}, last {:?})",
            schedule.schedule,
            schedule.time_of_day(),
            schedule.last_backup
        );

        let options = BackupOptions {
            include_patterns: schedule.include_patterns,
            include_images: schedule.include_images,
            include_archive: schedule.include_archive,
            client_settings: None,
        };

        let archive = match self.manager.create_backup(options).await {
            Ok(archive) => archive,
            Err(e) => {
                error!("Scheduled backup failed: {}", e);
                self.notify_failure(&e.to_string()).await;
                return TickOutcome::Failed(e.to_string());
            }
        };

        if let Err(e) =
            settings::record_last_backup(self.settings_store.as_ref(), now.with_timezone(&Utc))
                .await
        {
            error!("Backup succeeded but lastBackup could not be saved: {}", e);
        }

        let pruned = if schedule.prune_enabled {
            match self.manager.prune_backups(schedule.prune_policy()).await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!("Pruning after scheduled backup failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        self.notify_success(&archive).await;
        info!("Scheduled backup completed: {}", archive.filename);
        TickOutcome::Completed { archive, pruned }
    }

    async fn notification_settings(&self) -> NotificationSettings {
        settings::load(self.settings_store.as_ref())
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to load notification settings: {}", e);
                NotificationSettings::default()
            })
    }

    async fn notify_success(&self, archive: &BackupArchive) {
        if !self.notification_settings().await.notify_backup_success {
            return;
        }
        let message = format!(
            "Scheduled backup {} created ({:.1} MB)",
            archive.filename,
            archive.size as f64 / (1024.0 * 1024.0)
        );
        self.notifier.send(BACKUP_COMPLETE_TITLE, &message).await;
    }

    async fn notify_failure(&self, reason: &str) {
        if !self.notification_settings().await.notify_backup_failure {
            return;
        }
        let message = format!("Scheduled backup failed: {reason}");
        self.notifier.send(BACKUP_FAILED_TITLE, &message).await;
    }
}
