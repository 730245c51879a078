use pkg_constants::state::EVENT_LOG_CAPACITY;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Type of event in the watch stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Put,
    Delete,
}

/// A single watch event representing a state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub seq: u64,
    pub event_type: EventType,
    pub key: String,
    #[serde(default)]
    pub value: Option<Vec<u8>>,
}

/// In-memory event stream that tracks all state mutations with monotonic
/// sequence numbers. Subscribers filter by key prefix themselves.
///
/// A subscriber that falls more than `EVENT_LOG_CAPACITY` events behind
/// receives `RecvError::Lagged` and must relist.
#[derive(Clone)]
pub struct EventLog {
    seq: Arc<AtomicU64>,
    sender: broadcast::Sender<WatchEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            seq: Arc::new(AtomicU64::new(0)),
            sender,
        }
    }

    /// Record a new event. Called internally by StateStore on put/delete.
    pub fn emit(&self, event_type: EventType, key: String, value: Option<Vec<u8>>) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        // No receivers is fine.
        let _ = self.sender.send(WatchEvent {
            seq,
            event_type,
            key,
            value,
        });
    }

    /// Sequence number of the last emitted event.
    pub fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Subscribe to receive new events as they are emitted.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
