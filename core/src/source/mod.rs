pub mod kafka;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};

use crate::errors::SourceError;

/// A message received from the topic, addressed by partition and offset.
#[derive(Debug, Clone)]
pub struct SourceMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Broker-assigned timestamp in milliseconds, when the broker attached one.
    pub timestamp_ms: Option<i64>,
    /// Raw payload bytes; interpretation belongs to the event profile.
    pub payload: Vec<u8>,
}

impl SourceMessage {
    /// Broker timestamp as a UTC datetime.
    pub fn broker_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

/// Acknowledgment for one fully processed message: the position one past it,
/// with no metadata attached. Rejected messages are acknowledged too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOffset {
    pub topic: String,
    pub partition: i32,
    pub next_offset: i64,
}

impl PendingOffset {
    pub fn after(message: &SourceMessage) -> Self {
        Self {
            topic: message.topic.clone(),
            partition: message.partition,
            next_offset: message.offset + 1,
        }
    }
}

/// Shared slot for delivery failures reported by asynchronous offset
/// commits. The consumer callback runs on the client's own thread, so the
/// first failure is parked here and the processing loop picks it up at its
/// next checkpoint.
#[derive(Clone, Default)]
pub struct CommitLedger {
    first_failure: Arc<Mutex<Option<String>>>,
}

impl CommitLedger {
    /// Record a failure; later ones are ignored, the first is fatal anyway.
    pub fn record_failure(&self, reason: String) {
        let mut slot = self
            .first_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.get_or_insert(reason);
    }

    pub fn take_failure(&self) -> Option<String> {
        self.first_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// Where messages come from.
///
/// `next` yielding `Ok(None)` means the poll timeout elapsed with nothing to
/// read; that ends the sequence and is not an error. A closed source cannot
/// be reopened.
#[allow(async_fn_in_trait)]
pub trait MessageSource {
    async fn next(&mut self) -> Result<Option<SourceMessage>, SourceError>;

    /// Submit an offset acknowledgment without waiting for delivery.
    fn commit_async(&mut self, pending: &PendingOffset) -> Result<(), SourceError>;

    /// Delivery failure reported by an earlier `commit_async`, if any.
    /// Checked at every loop checkpoint; a failure aborts the run.
    fn take_commit_failure(&mut self) -> Option<SourceError>;

    async fn close(self) -> Result<(), SourceError>;
}
