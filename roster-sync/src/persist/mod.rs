//! Whole-collection persistence.
//!
//! ```text
//! ┌──────────────┐  save(&Collection)   ┌─────────────────────────────┐
//! │ Coordinator  │ ───────────────────► │ dyn SnapshotStore           │
//! │ (commit pt.) │ ◄─────────────────── │  ├── LocalFile  (data.json) │
//! └──────────────┘   load() on start    │  ├── RemoteMirror (bucket)  │
//!                                       │  └── MemoryStore (tests)    │
//!                                       └─────────────────────────────┘
//! ```
//!
//! Every save overwrites the previous snapshot wholesale. Adapters know
//! nothing about record semantics.

pub mod local;
pub mod memory;
pub mod remote;

use std::time::Duration;

use async_trait::async_trait;
use roster_core::Collection;

pub use local::LocalFile;
pub use memory::MemoryStore;
pub use remote::{RemoteConfig, RemoteMirror};

/// Capability interface over a snapshot backing store.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Read the stored snapshot; `Ok(None)` when nothing was saved yet.
    async fn load(&self) -> Result<Option<Collection>, PersistError>;

    /// Overwrite the stored snapshot. Returning `Ok` is the commit point.
    async fn save(&self, snapshot: &Collection) -> Result<(), PersistError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Remote store unreachable or transport failure
    #[error("remote store error: {0}")]
    Http(#[from] reqwest::Error),
    /// Remote store answered with a non-success status
    #[error("remote store rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    /// Remote call exceeded its bound
    #[error("remote store timed out after {0:?}")]
    Timeout(Duration),
    /// Test double switched to unavailable
    #[error("backing store unavailable")]
    Unavailable,
    /// Snapshot could not be encoded
    #[error("snapshot serialization failed: {0}")]
    Serialize(serde_json::Error),
    /// Stored snapshot is corrupt
    #[error("snapshot is corrupt: {0}")]
    Parse(serde_json::Error),
}

impl PersistError {
    /// Stable kind surfaced to API callers.
    pub fn kind(&self) -> &'static str {
        match self {
            PersistError::Parse(_) => "ParseError",
            _ => "PersistError",
        }
    }
}

/// Decode a stored snapshot document.
pub(crate) fn decode(text: &str) -> Result<Collection, PersistError> {
    Collection::from_json(text).map_err(PersistError::Parse)
}

/// Encode a snapshot the way it is stored: pretty JSON, two-space indent.
pub(crate) fn encode(snapshot: &Collection) -> Result<String, PersistError> {
    snapshot.to_json_pretty().map_err(PersistError::Serialize)
}
