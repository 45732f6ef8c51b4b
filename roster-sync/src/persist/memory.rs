//! In-process snapshot store.
//!
//! Keeps the last saved document as text, exactly as a file would, and can
//! be switched to "unavailable" to exercise the failed-commit path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use roster_core::Collection;

use super::{decode, encode, PersistError, SnapshotStore};

#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<Option<String>>,
    unavailable: AtomicBool,
    saves: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already-stored document (may be corrupt on purpose).
    pub fn with_document(document: impl Into<String>) -> Self {
        Self {
            document: Mutex::new(Some(document.into())),
            ..Self::default()
        }
    }

    /// Make every subsequent load/save fail with [`PersistError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Raw stored document, if any.
    pub fn document(&self) -> Option<String> {
        self.document.lock().clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), PersistError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(PersistError::Unavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self) -> Result<Option<Collection>, PersistError> {
        self.check()?;
        match self.document.lock().as_deref() {
            Some(text) => decode(text).map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, snapshot: &Collection) -> Result<(), PersistError> {
        self.check()?;
        let text = encode(snapshot)?;
        *self.document.lock() = Some(text);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}
