//! Command line / environment configuration.
//!
//! Every flag falls back to an environment variable, so a plain `.env`
//! style deployment (`PORT`, `API_KEY`, `SUPABASE_URL`, ...) works without
//! arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use roster_core::SchemaConfig;

use crate::backup::BackupConfig;
use crate::persist::RemoteConfig;
use crate::server::ServerConfig;

/// Where committed snapshots are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PersistenceKind {
    /// JSON file on local disk, with periodic backups
    Local,
    /// Object in a Supabase Storage bucket
    Remote,
}

/// roster-sync: shared collection with live snapshot streaming
#[derive(Parser, Debug, Clone)]
#[command(name = "roster-sync")]
#[command(about = "Shared record collection with live snapshot streaming")]
#[command(version)]
pub struct Cli {
    /// HTTP port
    #[arg(short, long, env = "PORT", default_value = "3001")]
    pub port: u16,

    /// Bind address
    #[arg(short, long, env = "BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Shared secret clients must present
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Declared groups, comma separated
    #[arg(long, env = "GROUPS", value_delimiter = ',', default_value = "men,women")]
    pub groups: Vec<String>,

    /// Keep ranks contiguous from 1 after deletes
    #[arg(long, env = "AUTO_COMPACT", default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_compact: bool,

    /// Persistence backend
    #[arg(long, env = "PERSISTENCE", value_enum, default_value = "local")]
    pub persistence: PersistenceKind,

    /// Snapshot file (local backend)
    #[arg(long, env = "DATA_FILE", default_value = "data.json")]
    pub data_file: PathBuf,

    /// Backup directory (local backend)
    #[arg(long, env = "BACKUP_DIR", default_value = "backups")]
    pub backup_dir: PathBuf,

    /// Seconds between backups (local backend)
    #[arg(long, env = "BACKUP_INTERVAL_SECS", default_value = "1800")]
    pub backup_interval_secs: u64,

    /// Backups to retain (at least 1)
    #[arg(long, env = "BACKUP_KEEP", default_value = "5")]
    pub backup_keep: usize,

    /// Supabase project URL (remote backend)
    #[arg(long, env = "SUPABASE_URL", default_value = "")]
    pub supabase_url: String,

    /// Supabase key (remote backend)
    #[arg(long, env = "SUPABASE_ANON_KEY", default_value = "", hide_env_values = true)]
    pub supabase_key: String,

    /// Storage bucket (remote backend)
    #[arg(long, env = "SUPABASE_BUCKET", default_value = "roster")]
    pub supabase_bucket: String,

    /// Object key of the mirrored snapshot (remote backend)
    #[arg(long, env = "MIRROR_KEY", default_value = "data-mirror.json")]
    pub mirror_key: String,

    /// Timeout for one remote call, in seconds
    #[arg(long, env = "REMOTE_TIMEOUT_SECS", default_value = "10")]
    pub remote_timeout_secs: u64,

    /// Snapshots buffered per subscriber
    #[arg(long, env = "BROADCAST_CAPACITY", default_value = "64")]
    pub broadcast_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Problems found while turning flags into component configs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("API key must not be empty")]
    MissingApiKey,
    #[error("at least one group must be declared")]
    NoGroups,
    #[error("group {0:?} is declared twice")]
    DuplicateGroup(String),
    #[error("remote persistence requires {0}")]
    MissingRemote(&'static str),
}

impl Cli {
    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(ServerConfig {
            bind_addr: format!("{}:{}", self.bind, self.port),
            api_key: self.api_key.clone(),
            broadcast_capacity: self.broadcast_capacity,
        })
    }

    pub fn schema(&self) -> Result<SchemaConfig, ConfigError> {
        let mut groups: Vec<String> = Vec::new();
        for group in self.groups.iter().map(|g| g.trim()).filter(|g| !g.is_empty()) {
            if groups.iter().any(|g| g == group) {
                return Err(ConfigError::DuplicateGroup(group.to_string()));
            }
            groups.push(group.to_string());
        }
        if groups.is_empty() {
            return Err(ConfigError::NoGroups);
        }
        Ok(SchemaConfig::new(groups, self.auto_compact))
    }

    pub fn backup_config(&self) -> BackupConfig {
        BackupConfig {
            source: self.data_file.clone(),
            dir: self.backup_dir.clone(),
            interval: Duration::from_secs(self.backup_interval_secs.max(1)),
            keep: self.backup_keep.max(1),
        }
    }

    pub fn remote_config(&self) -> Result<RemoteConfig, ConfigError> {
        if self.supabase_url.is_empty() {
            return Err(ConfigError::MissingRemote("SUPABASE_URL"));
        }
        if self.supabase_key.is_empty() {
            return Err(ConfigError::MissingRemote("SUPABASE_ANON_KEY"));
        }
        Ok(RemoteConfig {
            base_url: self.supabase_url.clone(),
            api_key: self.supabase_key.clone(),
            bucket: self.supabase_bucket.clone(),
            object_key: self.mirror_key.clone(),
            timeout: Duration::from_secs(self.remote_timeout_secs.max(1)),
        })
    }
}
