//! Sync event types and broadcast bus
//!
//! Callers (CLI, HTTP/SSE surface, an embedding UI) observe sync progress by
//! subscribing to the [`EventBus`]; the engine never drives caller state directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Which population a metadata pull touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSource {
    Live,
    Legacy,
}

/// Sync event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// Channel metadata pull finished
    ChannelsPulled {
        source: ChannelSource,
        /// Rows inserted or updated
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A track pull for one channel began (channel is now busy)
    ChannelSyncStarted {
        slug: String,
        timestamp: DateTime<Utc>,
    },

    /// A track pull finished and the checkpoint advanced
    ChannelSyncCompleted {
        slug: String,
        tracks: usize,
        timestamp: DateTime<Utc>,
    },

    /// A track pull failed; checkpoint left untouched
    ChannelSyncFailed {
        slug: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Batch track sync progress (emitted after each settled channel)
    BatchSyncProgress {
        completed: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// Full sync finished
    FullSyncCompleted {
        succeeded: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &str {
        match self {
            SyncEvent::ChannelsPulled { .. } => "ChannelsPulled",
            SyncEvent::ChannelSyncStarted { .. } => "ChannelSyncStarted",
            SyncEvent::ChannelSyncCompleted { .. } => "ChannelSyncCompleted",
            SyncEvent::ChannelSyncFailed { .. } => "ChannelSyncFailed",
            SyncEvent::BatchSyncProgress { .. } => "BatchSyncProgress",
            SyncEvent::FullSyncCompleted { .. } => "FullSyncCompleted",
        }
    }
}

/// Broadcast bus for [`SyncEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SyncEvent) -> Result<usize, broadcast::error::SendError<SyncEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
