//! Scripted doubles for the pipeline unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::errors::{SourceError, StoreError};
use crate::profile::{EventProfile, TimingColumns};
use crate::source::{MessageSource, PendingOffset, SourceMessage};
use crate::store::{TimesStore, UpdateRecord};

/// Store double driven by scripted answers. Remaining counts pop one per
/// call with the last entry repeating; affected counts pop one per batch and
/// default to the batch length once the script runs dry.
pub(crate) struct ScriptedStore {
    remaining: Mutex<VecDeque<u64>>,
    affected: Mutex<VecDeque<u64>>,
    batches: Mutex<Vec<usize>>,
}

impl ScriptedStore {
    pub fn new(remaining: &[u64]) -> Self {
        Self {
            remaining: Mutex::new(remaining.iter().copied().collect()),
            affected: Mutex::new(VecDeque::new()),
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn with_affected(self, affected: &[u64]) -> Self {
        *self.affected.lock().unwrap() = affected.iter().copied().collect();
        self
    }

    /// Sizes of the batches that actually reached the store, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

impl TimesStore for ScriptedStore {
    async fn remaining_count(&self) -> Result<u64, StoreError> {
        let mut script = self.remaining.lock().unwrap();
        if script.len() > 1 {
            Ok(script.pop_front().unwrap())
        } else {
            Ok(script.front().copied().unwrap_or(0))
        }
    }

    async fn update_batch(&self, records: &[UpdateRecord]) -> Result<u64, StoreError> {
        self.batches.lock().unwrap().push(records.len());
        let mut script = self.affected.lock().unwrap();
        Ok(script.pop_front().unwrap_or(records.len() as u64))
    }

    async fn biggest_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(None)
    }

    async fn timing_durations(&self, _columns: &TimingColumns) -> Result<Vec<f64>, StoreError> {
        Ok(Vec::new())
    }

    async fn end_timestamps(
        &self,
        _columns: &TimingColumns,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        Ok(Vec::new())
    }
}

/// One step of a scripted source feed.
pub(crate) enum Feed {
    Message(SourceMessage),
    /// Let the (paused) clock run before the next message arrives.
    Delay(Duration),
}

/// Source double replaying a fixed feed. An exhausted feed behaves like a
/// poll timeout.
pub(crate) struct ScriptedSource {
    feed: VecDeque<Feed>,
    committed: Arc<Mutex<Vec<PendingOffset>>>,
    fail_commits_after: Option<usize>,
    closed: Arc<Mutex<bool>>,
}

impl ScriptedSource {
    pub fn new(feed: Vec<Feed>) -> Self {
        Self {
            feed: feed.into(),
            committed: Arc::new(Mutex::new(Vec::new())),
            fail_commits_after: None,
            closed: Arc::new(Mutex::new(false)),
        }
    }

    /// Report a commit delivery failure once more than `n` offsets have
    /// been submitted.
    pub fn fail_commits_after(mut self, n: usize) -> Self {
        self.fail_commits_after = Some(n);
        self
    }

    pub fn committed_handle(&self) -> Arc<Mutex<Vec<PendingOffset>>> {
        Arc::clone(&self.committed)
    }

    pub fn closed_handle(&self) -> Arc<Mutex<bool>> {
        Arc::clone(&self.closed)
    }
}

impl MessageSource for ScriptedSource {
    async fn next(&mut self) -> Result<Option<SourceMessage>, SourceError> {
        while let Some(step) = self.feed.pop_front() {
            match step {
                Feed::Delay(pause) => tokio::time::sleep(pause).await,
                Feed::Message(message) => return Ok(Some(message)),
            }
        }
        Ok(None)
    }

    fn commit_async(&mut self, pending: &PendingOffset) -> Result<(), SourceError> {
        self.committed.lock().unwrap().push(pending.clone());
        Ok(())
    }

    fn take_commit_failure(&mut self) -> Option<SourceError> {
        let threshold = self.fail_commits_after?;
        (self.committed.lock().unwrap().len() > threshold).then(|| SourceError::OffsetCommit {
            reason: "broker refused the commit".to_string(),
        })
    }

    async fn close(self) -> Result<(), SourceError> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

pub(crate) fn json_message(offset: i64, payload: &str) -> SourceMessage {
    SourceMessage {
        topic: "test-topic".to_string(),
        partition: 0,
        offset,
        timestamp_ms: Some(1_672_531_200_000 + offset * 1000),
        payload: payload.as_bytes().to_vec(),
    }
}

/// Profile accepting any object with a string `id`, storing the id and the
/// broker timestamp.
pub(crate) struct IdProfile;

impl EventProfile for IdProfile {
    fn validate(&self, event: &Value) -> bool {
        event.get("id").and_then(Value::as_str).is_some()
    }

    fn to_record(&self, broker_timestamp: DateTime<Utc>, event: &Value) -> UpdateRecord {
        let id = event.get("id").and_then(Value::as_str).unwrap_or_default();
        UpdateRecord::new().with(id).with(broker_timestamp)
    }

    fn count_key(&self) -> &str {
        "results.stored"
    }

    fn biggest_key(&self) -> &str {
        "results.biggest"
    }

    fn stats_prefix(&self) -> &str {
        "results.timing"
    }

    fn timing_columns(&self) -> TimingColumns {
        TimingColumns {
            table: "rows".to_string(),
            start_column: "started_at".to_string(),
            end_column: "finished_at".to_string(),
        }
    }
}
