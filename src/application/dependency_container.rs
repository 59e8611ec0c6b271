use crate::{
    backup::{BackupManager, BackupScheduler, LibraryRepository, PostgresLibraryRepository},
    library::create_pool,
    notifications::{Notifier, WebhookNotifier},
    settings::{PostgresSettingsStore, SettingsStore},
    Config,
};
use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

/// Dependency injection container for the application
pub struct DependencyContainer {
    // Core configuration
    pub config: Config,

    // Database layer
    pub db_pool: Arc<PgPool>,

    // Repository layer
    pub library_repository: Arc<dyn LibraryRepository>,
    pub settings_store: Arc<dyn SettingsStore>,

    // Service layer
    pub backup_manager: Arc<BackupManager>,
    pub notifier: Arc<dyn Notifier>,
    pub backup_scheduler: Arc<BackupScheduler>,
}

impl DependencyContainer {
    pub async fn new() -> Result<Self> {
        info!("🔧 Initializing dependency container...");

        // Load configuration
        let config = Config::from_env().unwrap_or_else(|e| {
            warn!("⚠️  Configuration incomplete ({}), using defaults", e);
            Config::default()
        });

        Self::with_config(config).await
    }

    pub async fn with_config(config: Config) -> Result<Self> {
        info!("🗄️  Connecting to {}", config.safe_database_url());

        // Create database connection pool
        let db_pool = Arc::new(
            create_pool(&config.database_url, config.operational.max_db_connections).await?,
        );

        // Repository layer
        let library_repository: Arc<dyn LibraryRepository> =
            Arc::new(PostgresLibraryRepository::new(db_pool.clone()));
        let settings_store: Arc<dyn SettingsStore> =
            Arc::new(PostgresSettingsStore::new(db_pool.clone()));

        // Service layer
        let backup_manager = Arc::new(BackupManager::new(
            library_repository.clone(),
            config.storage.clone(),
        ));
        let notifier: Arc<dyn Notifier> = Arc::new(WebhookNotifier::new(settings_store.clone())?);
        let backup_scheduler = Arc::new(BackupScheduler::new(
            backup_manager.clone(),
            settings_store.clone(),
            notifier.clone(),
        ));

        info!("✅ Dependency container initialized successfully");

        Ok(Self {
            config,
            db_pool,
            library_repository,
            settings_store,
            backup_manager,
            notifier,
            backup_scheduler,
        })
    }

    /// Perform health check on all components
    pub async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(self.db_pool.as_ref()).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Database health check failed: {}", e);
                Ok(false)
            }
        }
    }
}
