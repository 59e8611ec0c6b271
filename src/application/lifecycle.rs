use crate::application::DependencyContainer;
use crate::library::{ensure_schema, sync_category_directories};
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Manages application lifecycle events and graceful shutdown
pub struct ApplicationLifecycle {
    container: Arc<DependencyContainer>,
}

impl ApplicationLifecycle {
    pub fn new(container: Arc<DependencyContainer>) -> Self {
        Self { container }
    }

    /// Initialize the application
    pub async fn initialize(&self) -> Result<()> {
        info!("🚀 Initializing application...");

        // Validate configuration
        self.container.config.validate()?;

        // Run health checks
        if !self.container.health_check().await? {
            return Err(anyhow::anyhow!("Initial health check failed"));
        }

        ensure_schema(self.container.db_pool.as_ref()).await?;
        self.container.backup_manager.initialize().await?;
        self.sync_category_directories().await?;

        info!("✅ Application initialized successfully");
        Ok(())
    }

    /// Recreate the category directory projection from the database
    pub async fn sync_category_directories(&self) -> Result<()> {
        let names = self.container.library_repository.category_names().await?;
        let report =
            sync_category_directories(&names, &self.container.config.storage.patterns_dir).await?;
        info!(
            "📁 Category directories in sync ({} categories, {} created, {} removed)",
            names.len(),
            report.created.len(),
            report.removed.len()
        );
        Ok(())
    }

    /// Graceful shutdown
    pub async fn shutdown(&self) -> Result<()> {
        info!("🛑 Initiating graceful shutdown...");

        if let Err(e) = self.container.backup_scheduler.shutdown().await {
            error!("Error stopping backup scheduler: {}", e);
        }

        self.container.db_pool.close().await;

        info!("🎉 Graceful shutdown completed");
        Ok(())
    }

    /// Wait for shutdown signals
    pub async fn wait_for_shutdown(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!("Failed to install terminate signal handler: {}", e);
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        info!("Shutdown signal received");
    }
}
