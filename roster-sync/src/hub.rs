//! Snapshot fan-out to every open subscriber.
//!
//! One tokio broadcast channel carries pre-serialized snapshots; each
//! subscriber holds its own receiver. The hub also keeps the last published
//! snapshot, which is both the read view for `/data` and the first message
//! of every new subscription.
//!
//! ```text
//!   publish(Arc<Collection>, Arc<str>)
//!        │  encoded by the caller, before it persists
//!        ▼
//!   ┌──────────── state lock ────────────┐
//!   │ latest = snapshot                  │      ┌──► Subscription A
//!   │ sender.send(encoded) ──────────────┼──────┼──► Subscription B
//!   └────────────────────────────────────┘      └──► Subscription C
//! ```
//!
//! `subscribe` takes the same lock, so a new subscriber's initial snapshot
//! and its first streamed snapshot can never skip or repeat a commit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::Stream;
use parking_lot::Mutex;
use roster_core::Collection;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use uuid::Uuid;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    pub snapshots_published: u64,
    pub snapshots_skipped: u64,
    pub active_subscribers: usize,
}

/// Lock-free counters, bumped on the publish path.
#[derive(Default)]
struct AtomicHubStats {
    published: AtomicU64,
    skipped: AtomicU64,
}

/// Registered subscriber metadata.
#[derive(Debug, Clone)]
pub struct SubscriberInfo {
    pub id: Uuid,
    /// Free-form origin label (remote address, test name, ...)
    pub label: String,
    pub connected_at: Instant,
}

struct HubState {
    snapshot: Arc<Collection>,
    encoded: Arc<str>,
    subscribers: HashMap<Uuid, SubscriberInfo>,
}

pub struct BroadcastHub {
    sender: broadcast::Sender<Arc<str>>,
    state: Arc<Mutex<HubState>>,
    capacity: usize,
    stats: Arc<AtomicHubStats>,
}

impl BroadcastHub {
    /// Create a hub whose current state is `initial`.
    ///
    /// `capacity` bounds how many snapshots a slow subscriber may fall
    /// behind before it skips ahead to the newest one.
    pub fn new(capacity: usize, initial: Collection) -> Result<Self, serde_json::Error> {
        let encoded: Arc<str> = initial.to_json()?.into();
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Ok(Self {
            sender,
            state: Arc::new(Mutex::new(HubState {
                snapshot: Arc::new(initial),
                encoded,
                subscribers: HashMap::new(),
            })),
            capacity,
            stats: Arc::new(AtomicHubStats::default()),
        })
    }

    /// Register a subscriber. Its first message is the current snapshot.
    pub fn subscribe(&self, label: impl Into<String>) -> Subscription {
        let info = SubscriberInfo {
            id: Uuid::new_v4(),
            label: label.into(),
            connected_at: Instant::now(),
        };
        let id = info.id;

        let mut state = self.state.lock();
        let receiver = self.sender.subscribe();
        let initial = Arc::clone(&state.encoded);
        state.subscribers.insert(id, info);
        let count = state.subscribers.len();
        drop(state);

        log::debug!("Subscriber {id} registered ({count} active)");
        Subscription {
            id,
            initial: Some(initial),
            receiver,
            state: Arc::clone(&self.state),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Make `snapshot` current and push `encoded` (its serialized form) to
    /// every subscriber.
    ///
    /// Returns the number of receivers the snapshot was queued for. Zero
    /// subscribers is not an error.
    pub fn publish(&self, snapshot: Arc<Collection>, encoded: Arc<str>) -> usize {
        let mut state = self.state.lock();
        state.snapshot = snapshot;
        state.encoded = Arc::clone(&encoded);
        let delivered = self.sender.send(encoded).unwrap_or(0);
        drop(state);

        self.stats.published.fetch_add(1, Ordering::Relaxed);
        delivered
    }

    /// Last published snapshot.
    pub fn snapshot(&self) -> Arc<Collection> {
        Arc::clone(&self.state.lock().snapshot)
    }

    /// Last published snapshot, serialized.
    pub fn snapshot_json(&self) -> Arc<str> {
        Arc::clone(&self.state.lock().encoded)
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        self.state.lock().subscribers.values().cloned().collect()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            snapshots_published: self.stats.published.load(Ordering::Relaxed),
            snapshots_skipped: self.stats.skipped.load(Ordering::Relaxed),
            active_subscribers: self.subscriber_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Handle for one subscriber. Dropping it unregisters the subscriber.
pub struct Subscription {
    id: Uuid,
    initial: Option<Arc<str>>,
    receiver: broadcast::Receiver<Arc<str>>,
    state: Arc<Mutex<HubState>>,
    stats: Arc<AtomicHubStats>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next snapshot for this subscriber.
    ///
    /// Yields the snapshot current at subscribe time first. If the
    /// subscriber fell behind, older snapshots are skipped in favour of the
    /// newest retained one. `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        loop {
            match self.receiver.recv().await {
                Ok(encoded) => return Some(encoded),
                Err(RecvError::Lagged(n)) => {
                    self.stats.skipped.fetch_add(n, Ordering::Relaxed);
                    log::warn!("Subscriber {} lagged by {n} snapshots", self.id);
                    if let Some(latest) = self.drain_to_latest() {
                        return Some(latest);
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn drain_to_latest(&mut self) -> Option<Arc<str>> {
        let mut latest = None;
        loop {
            match self.receiver.try_recv() {
                Ok(encoded) => {
                    if latest.is_some() {
                        self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    latest = Some(encoded);
                }
                Err(TryRecvError::Lagged(n)) => {
                    self.stats.skipped.fetch_add(n, Ordering::Relaxed);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return latest,
            }
        }
    }

    /// Turn the subscription into a stream of serialized snapshots.
    pub fn into_stream(self) -> impl Stream<Item = Arc<str>> + Send + 'static {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|encoded| (encoded, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.subscribers.remove(&self.id);
        log::debug!(
            "Subscriber {} disconnected ({} active)",
            self.id,
            state.subscribers.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use roster_core::Record;

    fn collection_with(n: i64) -> Collection {
        let mut c = Collection::with_groups(["men"]);
        for id in 1..=n {
            c.push(Record {
                id,
                name: format!("r{id}"),
                group: "men".to_string(),
                rank: id,
            });
        }
        c
    }

    fn publish(hub: &BroadcastHub, collection: Collection) -> usize {
        let encoded: Arc<str> = collection.to_json().unwrap().into();
        hub.publish(Arc::new(collection), encoded)
    }

    fn decode(encoded: &str) -> Collection {
        Collection::from_json(encoded).unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_receives_current_state_first() {
        let hub = BroadcastHub::new(16, collection_with(2)).unwrap();
        let mut sub = hub.subscribe("test");
        let first = sub.recv().await.unwrap();
        assert_eq!(decode(&first), collection_with(2));
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_fans_out() {
        let hub = BroadcastHub::new(16, Collection::new()).unwrap();
        let mut a = hub.subscribe("a");
        let mut b = hub.subscribe("b");
        let mut c = hub.subscribe("c");

        let delivered = publish(&hub, collection_with(1));
        assert_eq!(delivered, 3);

        for sub in [&mut a, &mut b, &mut c] {
            let _initial = sub.recv().await.unwrap();
            let pushed = sub.recv().await.unwrap();
            assert_eq!(decode(&pushed).len(), 1);
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = BroadcastHub::new(16, Collection::new()).unwrap();
        assert_eq!(publish(&hub, collection_with(1)), 0);
        assert_eq!(hub.snapshot().len(), 1);
        assert_eq!(hub.stats().snapshots_published, 1);
    }

    #[tokio::test]
    async fn test_publish_keeps_given_encoding() {
        let hub = BroadcastHub::new(16, Collection::new()).unwrap();
        let mut sub = hub.subscribe("exact");
        let _initial = sub.recv().await.unwrap();

        let collection = collection_with(2);
        let encoded: Arc<str> = collection.to_json().unwrap().into();
        hub.publish(Arc::new(collection.clone()), Arc::clone(&encoded));

        assert_eq!(hub.snapshot_json(), encoded);
        assert_eq!(hub.snapshot().as_ref(), &collection);
        assert_eq!(sub.recv().await.unwrap(), encoded);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_latest_only() {
        let hub = BroadcastHub::new(16, Collection::new()).unwrap();
        publish(&hub, collection_with(1));
        publish(&hub, collection_with(2));

        let mut sub = hub.subscribe("late");
        assert_eq!(decode(&sub.recv().await.unwrap()).len(), 2);

        publish(&hub, collection_with(3));
        assert_eq!(decode(&sub.recv().await.unwrap()).len(), 3);
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let hub = BroadcastHub::new(16, Collection::new()).unwrap();
        let a = hub.subscribe("a");
        let _b = hub.subscribe("b");
        assert_eq!(hub.subscriber_count(), 2);
        drop(a);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.subscribers()[0].label, "b");
    }

    #[tokio::test]
    async fn test_stream_drop_unregisters() {
        let hub = BroadcastHub::new(16, collection_with(1)).unwrap();
        let mut stream = Box::pin(hub.subscribe("stream").into_stream());
        assert!(stream.next().await.is_some());
        assert_eq!(hub.subscriber_count(), 1);
        drop(stream);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_to_newest() {
        let hub = BroadcastHub::new(2, Collection::new()).unwrap();
        let mut sub = hub.subscribe("slow");
        let _initial = sub.recv().await.unwrap();

        for n in 1..=6 {
            publish(&hub, collection_with(n));
        }

        let next = sub.recv().await.unwrap();
        assert_eq!(decode(&next).len(), 6);
        assert!(hub.stats().snapshots_skipped >= 4);
    }

    #[tokio::test]
    async fn test_capacity() {
        let hub = BroadcastHub::new(32, Collection::new()).unwrap();
        assert_eq!(hub.capacity(), 32);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let hub = BroadcastHub::new(0, Collection::new()).unwrap();
        assert_eq!(hub.capacity(), 1);

        let mut sub = hub.subscribe("only");
        let _initial = sub.recv().await.unwrap();
        publish(&hub, collection_with(1));
        publish(&hub, collection_with(2));
        assert_eq!(decode(&sub.recv().await.unwrap()).len(), 2);
    }
}
