//! Periodic copies of the local snapshot file.
//!
//! Every `interval` the current snapshot is copied to
//! `<dir>/data-backup-<timestamp>.json`; then backups are sorted by name
//! (newest first, the timestamp sorts lexically) and everything past the
//! newest `keep` is deleted. A file that cannot be deleted is logged and
//! skipped.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

/// File name prefix shared by all backups.
pub const BACKUP_PREFIX: &str = "data-backup-";

/// Backup rotation configuration.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Snapshot file to copy
    pub source: PathBuf,
    /// Directory holding the backups
    pub dir: PathBuf,
    /// Time between runs
    pub interval: Duration,
    /// Number of newest backups to retain
    pub keep: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("data.json"),
            dir: PathBuf::from("backups"),
            interval: Duration::from_secs(30 * 60),
            keep: 5,
        }
    }
}

impl BackupConfig {
    /// Rotation rooted in `root`: `root/data.json` into `root/backups`.
    pub fn for_testing(root: &std::path::Path) -> Self {
        Self {
            source: root.join("data.json"),
            dir: root.join("backups"),
            interval: Duration::from_secs(60),
            ..Self::default()
        }
    }
}

/// What a single rotation did.
#[derive(Debug, Clone, Default)]
pub struct BackupReport {
    pub created: Option<PathBuf>,
    pub pruned: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

pub struct BackupRotation {
    config: BackupConfig,
}

impl BackupRotation {
    /// Create the rotation, making sure the backup directory exists.
    ///
    /// `keep` is raised to 1, so a run never deletes the copy it just made.
    pub fn new(mut config: BackupConfig) -> io::Result<Self> {
        config.keep = config.keep.max(1);
        std::fs::create_dir_all(&config.dir)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Backup file name for `at`: ISO-8601 UTC with `:` and `.` as `-`.
    pub fn backup_name(at: DateTime<Utc>) -> String {
        format!("{BACKUP_PREFIX}{}.json", at.format("%Y-%m-%dT%H-%M-%S-%3fZ"))
    }

    /// Copy the snapshot once and prune old copies.
    pub fn run_once(&self) -> io::Result<BackupReport> {
        self.run_at(Utc::now())
    }

    fn run_at(&self, at: DateTime<Utc>) -> io::Result<BackupReport> {
        let mut report = BackupReport::default();

        if self.config.source.exists() {
            let target = self.config.dir.join(Self::backup_name(at));
            std::fs::copy(&self.config.source, &target)?;
            log::info!("Backup created at {}", target.display());
            report.created = Some(target);
        } else {
            log::debug!(
                "No snapshot at {} yet, skipping backup",
                self.config.source.display()
            );
        }

        let mut backups: Vec<String> = std::fs::read_dir(&self.config.dir)?
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(BACKUP_PREFIX))
            .collect();
        backups.sort_unstable_by(|a, b| b.cmp(a));

        for name in backups.into_iter().skip(self.config.keep) {
            let path = self.config.dir.join(name);
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    log::info!("Deleted old backup: {}", path.display());
                    report.pruned.push(path);
                }
                Err(e) => {
                    log::error!("Failed to delete {}: {e}", path.display());
                    report.failed.push(path);
                }
            }
        }

        Ok(report)
    }

    /// Run forever on the configured interval. The first run happens one
    /// interval after start. Each run goes to the blocking pool.
    pub fn spawn(self) -> JoinHandle<()> {
        let rotation = Arc::new(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(rotation.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let run = Arc::clone(&rotation);
                match tokio::task::spawn_blocking(move || run.run_once()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => log::error!("Failed to create or manage backups: {e}"),
                    Err(e) => log::error!("Backup task failed: {e}"),
                }
            }
        })
    }
}
