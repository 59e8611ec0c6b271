use crate::api::{create_api_router, AppState};
use crate::application::{ApplicationLifecycle, DependencyContainer};
use crate::backup::{BackupOptions, PruneMode, PrunePolicy, TickOutcome};
use crate::library::ensure_schema;
use crate::settings::{self, BackupScheduleSettings};
use anyhow::Result;
use chrono::Local;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct BackupCommandHandler {
    container: Arc<DependencyContainer>,
}

impl BackupCommandHandler {
    pub fn new(container: Arc<DependencyContainer>) -> Self {
        Self { container }
    }

    pub async fn create_backup(&self, options: BackupOptions) -> Result<()> {
        let archive = self.container.backup_manager.create_backup(options).await?;
        info!(
            "✅ Backup created: {} ({} bytes)",
            archive.filename, archive.size
        );
        Ok(())
    }

    pub async fn list_backups(&self) -> Result<()> {
        let archives = self.container.backup_manager.list_backups().await?;
        if archives.is_empty() {
            info!("📭 No backups found");
            return Ok(());
        }

        info!("📊 {} backups:", archives.len());
        for archive in archives {
            info!(
                "   - {}  {}  {} bytes",
                archive.filename,
                archive.created.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                archive.size
            );
        }
        Ok(())
    }

    pub async fn delete_backup(&self, filename: &str) -> Result<()> {
        self.container.backup_manager.delete_backup(filename).await?;
        info!("🗑️  Deleted {}", filename);
        Ok(())
    }

    pub async fn restore_backup(&self, filename: &str) -> Result<()> {
        let outcome = self.container.backup_manager.restore_backup(filename).await?;
        match outcome.file_sync_warning {
            Some(warning) => warn!("⚠️  Database restored, but files were not fully restored: {}", warning),
            None => info!("✅ Restored {}", filename),
        }
        if outcome.client_settings.is_some() {
            info!("💡 Archive carried client settings; apply them from the web UI restore");
        }
        Ok(())
    }

    pub async fn prune_backups(&self, mode: PruneMode, value: u32) -> Result<()> {
        let report = self
            .container
            .backup_manager
            .prune_backups(PrunePolicy::new(mode, value))
            .await?;
        info!("✅ Pruned {} backups", report.deleted_count());
        for failed in &report.failed {
            error!("❌ Could not delete {}", failed);
        }
        Ok(())
    }
}

pub struct ScheduleCommandHandler {
    container: Arc<DependencyContainer>,
}

impl ScheduleCommandHandler {
    pub fn new(container: Arc<DependencyContainer>) -> Self {
        Self { container }
    }

    pub async fn show(&self) -> Result<()> {
        let schedule: BackupScheduleSettings =
            settings::load(self.container.settings_store.as_ref()).await?;
        info!("📅 Scheduled backups: {}", if schedule.enabled { "enabled" } else { "disabled" });
        info!("   - Frequency: {} at {}", schedule.schedule, schedule.time_of_day());
        info!(
            "   - Includes: patterns={} images={} archive={}",
            schedule.include_patterns, schedule.include_images, schedule.include_archive
        );
        if schedule.prune_enabled {
            info!("   - Prune: {} {}", schedule.prune_mode, schedule.prune_value);
        }
        match schedule.last_backup {
            Some(last) => info!("   - Last backup: {}", last.with_timezone(&Local)),
            None => info!("   - Last backup: never"),
        }
        Ok(())
    }

    /// Run a single due-check now
    pub async fn tick(&self) -> Result<()> {
        match self.container.backup_scheduler.tick(Local::now()).await {
            TickOutcome::NotDue => info!("⏳ No scheduled backup due"),
            TickOutcome::Skipped => warn!("⚠️  A scheduled backup is already running"),
            TickOutcome::Completed { archive, pruned } => {
                info!("✅ Scheduled backup created: {}", archive.filename);
                if let Some(report) = pruned {
                    info!("   - Pruned {} old backups", report.deleted_count());
                }
            }
            TickOutcome::Failed(reason) => {
                return Err(anyhow::anyhow!("Scheduled backup failed: {reason}"));
            }
        }
        Ok(())
    }
}

pub struct DatabaseCommandHandler {
    container: Arc<DependencyContainer>,
}

impl DatabaseCommandHandler {
    pub fn new(container: Arc<DependencyContainer>) -> Self {
        Self { container }
    }

    pub async fn setup(&self) -> Result<()> {
        info!("🔧 Creating library schema...");
        ensure_schema(self.container.db_pool.as_ref()).await?;
        info!("✅ Database schema ready");
        Ok(())
    }
}

pub struct ServerCommandHandler {
    container: Arc<DependencyContainer>,
    lifecycle: Arc<ApplicationLifecycle>,
}

impl ServerCommandHandler {
    pub fn new(container: Arc<DependencyContainer>, lifecycle: Arc<ApplicationLifecycle>) -> Self {
        Self {
            container,
            lifecycle,
        }
    }

    /// Serve the HTTP API and run the backup scheduler until a shutdown signal
    pub async fn start_http(&self) -> Result<()> {
        info!("🚀 Starting HTTP server...");

        self.container.backup_scheduler.start().await?;

        let router = create_api_router(AppState {
            backup_manager: self.container.backup_manager.clone(),
            settings_store: self.container.settings_store.clone(),
        });

        let addr = SocketAddr::from(([0, 0, 0, 0], self.container.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("🌐 Listening on http://{}", addr);

        let lifecycle = self.lifecycle.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { lifecycle.wait_for_shutdown().await })
            .await?;

        self.lifecycle.shutdown().await
    }
}
