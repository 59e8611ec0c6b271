pub mod api;
pub mod application;
pub mod backup;
pub mod config;
pub mod library;
pub mod notifications;
pub mod settings;

pub use config::Config;

// Re-export library types for convenience
pub use library::{create_pool, ensure_schema, Category, Counter, Hashtag, Pattern};

// Re-export backup types
pub use backup::{
    BackupArchive, BackupError, BackupManager, BackupOptions, BackupScheduler, LibraryRepository,
    PostgresLibraryRepository, PruneMode, PrunePolicy, PruneReport, RestoreEngine, RestoreOutcome,
    Snapshot, SnapshotExporter, StorageRoots, TickOutcome,
};

// Re-export settings and notification types
pub use notifications::{Notifier, WebhookNotifier};
pub use settings::{
    BackupScheduleSettings, NotificationSettings, PostgresSettingsStore, ScheduleFrequency,
    SettingsStore,
};
