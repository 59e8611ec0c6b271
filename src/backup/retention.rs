use super::{BackupArchive, BackupError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PruneMode {
    /// Keep the N most recent archives
    #[default]
    Keep,
    /// Delete archives older than N days
    Days,
}

impl fmt::Display for PruneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PruneMode::Keep => write!(f, "keep"),
            PruneMode::Days => write!(f, "days"),
        }
    }
}

impl std::str::FromStr for PruneMode {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "keep" => Ok(PruneMode::Keep),
            "days" => Ok(PruneMode::Days),
            other => Err(BackupError::Configuration {
                message: format!("unknown prune mode '{other}', expected 'keep' or 'days'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrunePolicy {
    pub mode: PruneMode,
    pub value: u32,
}

impl PrunePolicy {
    pub fn new(mode: PruneMode, value: u32) -> Self {
        Self { mode, value }
    }

    /// `keep 0` would delete every archive, including the one just written
    pub fn validate(&self) -> Result<()> {
        if self.mode == PruneMode::Keep && self.value == 0 {
            return Err(BackupError::Configuration {
                message: "prune value for keep mode must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Outcome of a prune run. `deleted` only lists files actually removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

impl PruneReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

/// Pick the archives a policy would delete. Pure; does not touch the disk.
pub fn select_for_deletion<'a>(
    archives: &'a [BackupArchive],
    policy: PrunePolicy,
    now: DateTime<Utc>,
) -> Vec<&'a BackupArchive> {
    match policy.mode {
        PruneMode::Keep => {
            let mut newest_first: Vec<&BackupArchive> = archives.iter().collect();
            newest_first.sort_by(|a, b| {
                b.created
                    .cmp(&a.created)
                    .then_with(|| b.filename.cmp(&a.filename))
            });
            newest_first
                .into_iter()
                .skip(policy.value as usize)
                .collect()
        }
        PruneMode::Days => {
            // A cutoff before the earliest representable time matches nothing
            let Some(cutoff) = Duration::try_days(i64::from(policy.value))
                .and_then(|age| now.checked_sub_signed(age))
            else {
                return Vec::new();
            };
            archives.iter().filter(|a| a.created < cutoff).collect()
        }
    }
}

/// Delete what `policy` selects from `backups_dir`. A failed delete is logged
/// and recorded; the remaining candidates are still processed.
pub async fn prune_archives(
    backups_dir: &Path,
    archives: &[BackupArchive],
    policy: PrunePolicy,
    now: DateTime<Utc>,
) -> PruneReport {
    let candidates = select_for_deletion(archives, policy, now);
    let mut report = PruneReport::default();

    for archive in candidates {
        let path = backups_dir.join(&archive.filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Pruned backup: {}", archive.filename);
                report.deleted.push(archive.filename.clone());
            }
            Err(e) => {
                error!("Failed to prune backup {}: {}", archive.filename, e);
                report.failed.push(archive.filename.clone());
            }
        }
    }

    info!(
        "Prune completed ({} {}): {} deleted, {} failed",
        policy.mode,
        policy.value,
        report.deleted.len(),
        report.failed.len()
    );
    report
}
