use anyhow::Result;
use std::sync::Arc;

pub mod command_handlers;
pub mod dependency_container;
pub mod lifecycle;

pub use command_handlers::{
    BackupCommandHandler, DatabaseCommandHandler, ScheduleCommandHandler, ServerCommandHandler,
};
pub use dependency_container::DependencyContainer;
pub use lifecycle::ApplicationLifecycle;

/// Application layer - coordinates business operations without containing business logic
pub struct Application {
    pub container: Arc<DependencyContainer>,
    pub lifecycle: Arc<ApplicationLifecycle>,
}

impl Application {
    pub async fn new() -> Result<Self> {
        let container = Arc::new(DependencyContainer::new().await?);
        let lifecycle = Arc::new(ApplicationLifecycle::new(container.clone()));

        Ok(Self {
            container,
            lifecycle,
        })
    }

    pub async fn initialize(&self) -> Result<()> {
        self.lifecycle.initialize().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.lifecycle.shutdown().await
    }

    pub fn backup_handler(&self) -> BackupCommandHandler {
        BackupCommandHandler::new(self.container.clone())
    }

    pub fn schedule_handler(&self) -> ScheduleCommandHandler {
        ScheduleCommandHandler::new(self.container.clone())
    }

    pub fn database_handler(&self) -> DatabaseCommandHandler {
        DatabaseCommandHandler::new(self.container.clone())
    }

    pub fn server_handler(&self) -> ServerCommandHandler {
        ServerCommandHandler::new(self.container.clone(), self.lifecycle.clone())
    }
}
