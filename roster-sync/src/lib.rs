//! # roster-sync — Persistence, commit ordering and live streaming
//!
//! Wraps a [`roster_core::CollectionStore`] in a single-writer commit
//! pipeline and serves it over HTTP.
//!
//! ## Architecture
//!
//! ```text
//!  HTTP request ──► Coordinator ──► stage copy ──► SnapshotStore::save
//!                    (one lock)                          │ ok
//!                                                        ▼
//!                                     swap in ──► BroadcastHub ──► /events
//!                                                        │
//!                                                        └──► /data reads
//! ```
//!
//! ## Modules
//!
//! - [`persist`] — Snapshot backends: local file, remote mirror, in-memory
//! - [`hub`] — Snapshot fan-out with lag skipping
//! - [`coordinator`] — Strict apply / persist / publish commits
//! - [`backup`] — Periodic rotating copies of the local snapshot
//! - [`server`] — axum router, API key check, SSE endpoint
//! - [`config`] — clap flags with environment fallbacks

pub mod backup;
pub mod config;
pub mod coordinator;
pub mod hub;
pub mod persist;
pub mod server;

pub use backup::{BackupConfig, BackupRotation};
pub use config::{Cli, ConfigError, PersistenceKind};
pub use coordinator::{Applied, Coordinator, Mutation, SyncError};
pub use hub::{BroadcastHub, Subscription};
pub use persist::{LocalFile, MemoryStore, PersistError, RemoteConfig, RemoteMirror, SnapshotStore};
pub use server::{router, AppState, ServerConfig, SyncServer};
