use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use yarnl_backup::application::*;
use yarnl_backup::backup::{BackupOptions, PruneMode};

#[derive(Parser)]
#[command(name = "yarnl-backup")]
#[command(about = "Backup, restore and scheduled retention for the yarnl pattern library")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the backup API and run the scheduler
    Serve,
    /// Backup management commands
    Backup {
        #[command(subcommand)]
        action: BackupCommands,
    },
    /// Scheduled backup commands
    Schedule {
        #[command(subcommand)]
        action: ScheduleCommands,
    },
    /// Database commands
    Database {
        #[command(subcommand)]
        action: DatabaseCommands,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Create a backup archive
    Create {
        /// Leave pattern files out of the archive
        #[arg(long)]
        no_patterns: bool,
        /// Leave image files out of the archive
        #[arg(long)]
        no_images: bool,
        /// Include archived patterns
        #[arg(long)]
        include_archive: bool,
    },
    /// List all backups
    List,
    /// Delete a backup archive
    Delete { filename: String },
    /// Restore the library from a backup archive
    Restore { filename: String },
    /// Delete old backups
    Prune {
        /// `keep` the newest N archives, or delete those older than N `days`
        #[arg(long, default_value = "keep")]
        mode: PruneMode,
        #[arg(long)]
        value: u32,
    },
}

#[derive(Subcommand)]
enum ScheduleCommands {
    /// Show the stored backup schedule
    Show,
    /// Run one due-check now
    Tick,
}

#[derive(Subcommand)]
enum DatabaseCommands {
    /// Create the library schema
    Setup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                std::env::var("LOG_LEVEL")
                    .unwrap_or_else(|_| "info".to_string())
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app = Application::new().await?;

    // Schema setup runs before initialize, which expects the schema to exist
    if let Some(Commands::Database {
        action: DatabaseCommands::Setup,
    }) = cli.command
    {
        return app.database_handler().setup().await;
    }

    app.initialize().await?;

    match cli.command {
        Some(Commands::Serve) | None => app.server_handler().start_http().await,
        Some(Commands::Backup { action }) => {
            let handler = app.backup_handler();
            match action {
                BackupCommands::Create {
                    no_patterns,
                    no_images,
                    include_archive,
                } => {
                    handler
                        .create_backup(BackupOptions {
                            include_patterns: !no_patterns,
                            include_images: !no_images,
                            include_archive,
                            ..BackupOptions::default()
                        })
                        .await
                }
                BackupCommands::List => handler.list_backups().await,
                BackupCommands::Delete { filename } => handler.delete_backup(&filename).await,
                BackupCommands::Restore { filename } => handler.restore_backup(&filename).await,
                BackupCommands::Prune { mode, value } => handler.prune_backups(mode, value).await,
            }
        }
        Some(Commands::Schedule { action }) => {
            let handler = app.schedule_handler();
            match action {
                ScheduleCommands::Show => handler.show().await,
                ScheduleCommands::Tick => handler.tick().await,
            }
        }
        Some(Commands::Database { .. }) => Ok(()),
    }
}
