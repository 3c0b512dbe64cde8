//! Events published by a session for whatever presents it to the user.
use alloy::primitives::TxHash;
use tokio::sync::broadcast;
use tracing::debug;

use crate::tracker::OperationKey;

/// How many events a slow subscriber may fall behind before it starts
/// losing the oldest ones.
const EVENT_CAPACITY: usize = 64;

/// Lifecycle of the transaction behind one [`OperationKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Broadcast, waiting for confirmation.
    Submitted(TxHash),
    /// Included in the chain.
    Confirmed(TxHash),
    /// Rejected, reverted or timed out.
    Failed(String),
}

/// Severity of a [`Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Something finished well.
    Success,
    /// Informational.
    Info,
    /// Something went wrong and needs the user.
    Error,
}

/// A message meant for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Severity.
    pub level: Level,
    /// Text to show.
    pub message: String,
    /// Operation the notice belongs to. Consumers should replace the
    /// previous notice with the same key instead of stacking them.
    pub key: Option<OperationKey>,
}

/// Everything a session publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A tracked transaction changed state.
    Status {
        /// Operation the transaction belongs to.
        key: OperationKey,
        /// New state.
        status: TxStatus,
    },
    /// A message for the user.
    Notice(Notice),
}

/// Fan-out of [`Event`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }
}

impl EventBus {
    /// Returns a receiver for every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publishes `event`. Having no subscribers is fine.
    pub fn publish(&self, event: Event) {
        if self.tx.send(event).is_err() {
            debug!("event dropped, no subscribers");
        }
    }

    pub(crate) fn status(&self, key: OperationKey, status: TxStatus) {
        self.publish(Event::Status { key, status });
    }

    pub(crate) fn notify(
        &self,
        level: Level,
        key: Option<OperationKey>,
        message: impl Into<String>,
    ) {
        self.publish(Event::Notice(Notice {
            level,
            message: message.into(),
            key,
        }));
    }
}
