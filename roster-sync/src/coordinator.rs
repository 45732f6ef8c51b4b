//! Mutation pipeline: apply → persist → publish, one mutation at a time.
//!
//! ```text
//!  submit(mutation)
//!    │ spawned: caller disconnect does not cancel the commit
//!    ▼
//!  ┌──────────────── working lock (held across .await) ───────────────┐
//!  │ staged = working.clone()                                          │
//!  │ mutation.apply(&mut staged)      ── validation error ──► Err     │
//!  │ encoded = snapshot.to_json()     ── PersistError ─────► Err     │
//!  │ persistence.save(snapshot).await ── PersistError ─────► Err     │
//!  │ *working = staged                (commit point passed)           │
//!  │ hub.publish(snapshot, encoded)   (read view + subscribers)       │
//!  └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Failure policy is strict: a mutation whose save fails is discarded, the
//! working store keeps its pre-mutation state and nothing is broadcast.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use roster_core::{
    Collection, CollectionStore, Record, RecordFields, RecordId, SchemaConfig, StoreError, Upsert,
};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::hub::{BroadcastHub, Subscription};
use crate::persist::{PersistError, SnapshotStore};

/// A request to change the collection.
#[derive(Debug, Clone)]
pub enum Mutation {
    Add { group: String, fields: RecordFields },
    Update(RecordFields),
    ReplaceGroup { group: String, items: Vec<Value> },
    Delete(RecordId),
}

impl Mutation {
    fn apply(self, store: &mut CollectionStore) -> Result<Applied, StoreError> {
        match self {
            Mutation::Add { group, fields } => store.add(&group, &fields).map(Applied::Added),
            Mutation::Update(fields) => store.update(&fields).map(Applied::Updated),
            Mutation::ReplaceGroup { group, items } => {
                let records = store.replace_group(&group, &items)?;
                Ok(Applied::Replaced { group, records })
            }
            Mutation::Delete(id) => store.delete(id).map(Applied::Deleted),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Mutation::Add { .. } => "add",
            Mutation::Update(_) => "update",
            Mutation::ReplaceGroup { .. } => "replace",
            Mutation::Delete(_) => "delete",
        }
    }
}

/// Result of a committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Added(Record),
    Updated(Upsert),
    Replaced { group: String, records: Vec<Record> },
    Deleted(Record),
}

/// Coordinator errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("persistence failed: {0}")]
    Persist(#[from] PersistError),
    #[error("mutation task aborted")]
    Aborted,
}

impl SyncError {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Store(e) => e.kind(),
            SyncError::Persist(e) => e.kind(),
            SyncError::Aborted => "Internal",
        }
    }
}

/// Commit counters.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStats {
    pub committed: u64,
    pub rejected: u64,
    pub persist_failures: u64,
}

#[derive(Default)]
struct AtomicCoordinatorStats {
    committed: AtomicU64,
    rejected: AtomicU64,
    persist_failures: AtomicU64,
}

pub struct Coordinator {
    working: Mutex<CollectionStore>,
    persistence: Arc<dyn SnapshotStore>,
    hub: Arc<BroadcastHub>,
    stats: AtomicCoordinatorStats,
}

impl Coordinator {
    /// Load the persisted snapshot and build the coordinator around it.
    ///
    /// A missing snapshot starts an empty collection. A corrupt one is
    /// logged and also starts empty; the next commit overwrites it. Any
    /// other load failure is returned, since starting empty would make the
    /// next commit clobber a snapshot that is merely out of reach.
    pub async fn bootstrap(
        schema: SchemaConfig,
        persistence: Arc<dyn SnapshotStore>,
        broadcast_capacity: usize,
    ) -> Result<Arc<Self>, PersistError> {
        let loaded = match persistence.load().await {
            Ok(Some(collection)) => {
                log::info!(
                    "Loaded {} record(s) from {}",
                    collection.len(),
                    persistence.describe()
                );
                collection
            }
            Ok(None) => {
                log::info!("No snapshot at {}, starting empty", persistence.describe());
                Collection::new()
            }
            Err(PersistError::Parse(e)) => {
                log::error!(
                    "Snapshot at {} is corrupt ({e}), starting empty",
                    persistence.describe()
                );
                Collection::new()
            }
            Err(e) => return Err(e),
        };

        let store = CollectionStore::from_snapshot(schema, loaded);
        let hub = BroadcastHub::new(broadcast_capacity, store.snapshot())
            .map_err(PersistError::Serialize)?;

        Ok(Arc::new(Self {
            working: Mutex::new(store),
            persistence,
            hub: Arc::new(hub),
            stats: AtomicCoordinatorStats::default(),
        }))
    }

    /// Commit `mutation` on a detached task.
    ///
    /// Dropping the returned future (client went away) does not abort the
    /// commit: subscribers may already be about to hear about it.
    pub async fn submit(self: &Arc<Self>, mutation: Mutation) -> Result<Applied, SyncError> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.commit(mutation).await })
            .await
            .map_err(|e| {
                log::error!("Mutation task failed: {e}");
                SyncError::Aborted
            })?
    }

    /// Apply, persist and publish `mutation` as one unit.
    pub async fn commit(&self, mutation: Mutation) -> Result<Applied, SyncError> {
        let label = mutation.label();
        let mut working = self.working.lock().await;

        let mut staged = working.clone();
        let applied = match mutation.apply(&mut staged) {
            Ok(applied) => applied,
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                log::debug!("Rejected {label}: {e}");
                return Err(e.into());
            }
        };

        let snapshot = Arc::new(staged.snapshot());
        // Encoded before saving so nothing after the save can fail.
        let encoded: Arc<str> = match snapshot.to_json() {
            Ok(text) => text.into(),
            Err(e) => {
                log::error!("Could not encode {label} snapshot: {e}; change discarded");
                return Err(PersistError::Serialize(e).into());
            }
        };
        if let Err(e) = self.persistence.save(&snapshot).await {
            self.stats.persist_failures.fetch_add(1, Ordering::Relaxed);
            log::error!(
                "Failed to persist {label} to {}: {e}; change discarded",
                self.persistence.describe()
            );
            return Err(e.into());
        }

        *working = staged;
        let delivered = self.hub.publish(snapshot, encoded);
        log::debug!("Committed {label}, pushed to {delivered} subscriber(s)");
        self.stats.committed.fetch_add(1, Ordering::Relaxed);
        drop(working);

        Ok(applied)
    }

    /// Last committed collection.
    pub fn snapshot(&self) -> Arc<Collection> {
        self.hub.snapshot()
    }

    /// Last committed collection, serialized.
    pub fn snapshot_json(&self) -> Arc<str> {
        self.hub.snapshot_json()
    }

    /// One group of the last committed collection.
    pub fn filter(&self, group: &str) -> Result<Vec<Record>, StoreError> {
        self.snapshot()
            .group(group)
            .map(<[Record]>::to_vec)
            .ok_or_else(|| StoreError::InvalidGroup(group.to_string()))
    }

    /// Open a subscription; its first message is the current snapshot.
    pub fn subscribe(&self, label: impl Into<String>) -> Subscription {
        self.hub.subscribe(label)
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            committed: self.stats.committed.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            persist_failures: self.stats.persist_failures.load(Ordering::Relaxed),
        }
    }
}
