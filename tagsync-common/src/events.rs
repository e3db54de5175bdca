//! Event types for the TagSync event system
//!
//! Provides the shared event definitions and the EventBus used as the
//! process-wide "dataset changed" notification channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why the dataset changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    /// A migration transformed or enriched records
    Migration,
}

/// TagSync event types
///
/// Events are broadcast via EventBus and can be serialized for transmission
/// to out-of-process observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// The persisted dataset changed
    ///
    /// Triggers:
    /// - UI: Reload tag/track views
    DatasetChanged {
        reason: ChangeReason,
        timestamp: DateTime<Utc>,
    },

    /// A migration began (or resumed) work
    MigrationStarted {
        migration: String,
        timestamp: DateTime<Utc>,
    },

    /// A backfill batch was settled
    MigrationProgress {
        migration: String,
        /// Keys done (succeeded or terminally failed)
        processed: usize,
        /// Keys waiting for a retry in a later run
        failed: usize,
        /// Keys targeted by this run
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// A migration durably completed
    MigrationCompleted {
        migration: String,
        timestamp: DateTime<Utc>,
    },

    /// A migration stopped itself after sustained failures
    MigrationPaused {
        migration: String,
        remaining: usize,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    /// Convenience constructor for a dataset change stamped now
    pub fn dataset_changed(reason: ChangeReason) -> Self {
        SyncEvent::DatasetChanged {
            reason,
            timestamp: Utc::now(),
        }
    }

    /// Event type name (matches the serialized `type` tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::DatasetChanged { .. } => "DatasetChanged",
            SyncEvent::MigrationStarted { .. } => "MigrationStarted",
            SyncEvent::MigrationProgress { .. } => "MigrationProgress",
            SyncEvent::MigrationCompleted { .. } => "MigrationCompleted",
            SyncEvent::MigrationPaused { .. } => "MigrationPaused",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use tagsync_common::events::{ChangeReason, EventBus, SyncEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(SyncEvent::dataset_changed(ChangeReason::Migration));
/// assert!(matches!(rx.try_recv(), Ok(SyncEvent::DatasetChanged { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered before the oldest are
    /// dropped for lagging subscribers.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SyncEvent) -> Result<usize, broadcast::error::SendError<SyncEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
