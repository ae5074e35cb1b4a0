use std::sync::Arc;

use tracing::debug;

use crate::errors::StoreError;
use crate::store::{TimesStore, UpdateRecord};

/// Buffers persistence records and writes them out in bounded batches.
///
/// The cap is the configured batch size or the current remaining count,
/// whichever is smaller: once as many records are waiting as the store still
/// misses, there is nothing to gain from holding out for more.
pub struct BatchWriter<St> {
    store: Arc<St>,
    buffer: Vec<UpdateRecord>,
    batch_size: usize,
}

impl<St: TimesStore> BatchWriter<St> {
    pub fn new(store: Arc<St>, batch_size: usize) -> Self {
        Self {
            store,
            buffer: Vec::new(),
            batch_size,
        }
    }

    pub fn push(&mut self, record: UpdateRecord) {
        self.buffer.push(record);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn reached_cap(&self, remaining: u64) -> bool {
        let cap = (self.batch_size as u64).min(remaining);
        self.buffer.len() as u64 >= cap
    }

    /// Write out everything buffered in one statement and report how many
    /// rows it touched. The buffer is surrendered up front: records that
    /// match no row leave with the flush and are never retried.
    pub async fn flush(&mut self) -> Result<u64, StoreError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let batch = std::mem::take(&mut self.buffer);
        let affected = self.store.update_batch(&batch).await?;
        debug!("Flushed {} records, {} rows updated", batch.len(), affected);
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStore;

    fn record(id: &str) -> UpdateRecord {
        UpdateRecord::new().with(id)
    }

    #[tokio::test]
    async fn test_cap_is_the_batch_size_when_plenty_remains() {
        let store = Arc::new(ScriptedStore::new(&[100]));
        let mut writer = BatchWriter::new(store, 2);

        writer.push(record("a"));
        assert!(!writer.reached_cap(100));

        writer.push(record("b"));
        assert!(writer.reached_cap(100));
    }

    #[tokio::test]
    async fn test_cap_shrinks_to_the_remaining_count() {
        let store = Arc::new(ScriptedStore::new(&[3]));
        let mut writer = BatchWriter::new(store, 500);

        writer.push(record("a"));
        writer.push(record("b"));
        assert!(!writer.reached_cap(3));

        writer.push(record("c"));
        assert!(writer.reached_cap(3));
    }

    #[tokio::test]
    async fn test_flush_clears_the_buffer_even_when_nothing_matched() {
        let store = Arc::new(ScriptedStore::new(&[10]).with_affected(&[0]));
        let mut writer = BatchWriter::new(Arc::clone(&store), 500);

        writer.push(record("a"));
        writer.push(record("b"));
        let affected = writer.flush().await.expect("flush should work");

        assert_eq!(affected, 0);
        assert_eq!(writer.buffered(), 0);
        assert_eq!(store.batch_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn test_empty_flush_skips_the_store() {
        let store = Arc::new(ScriptedStore::new(&[10]));
        let mut writer = BatchWriter::new(Arc::clone(&store), 500);

        let affected = writer.flush().await.expect("flush should work");

        assert_eq!(affected, 0);
        assert!(store.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_flush_reports_the_store_count_not_the_batch_size() {
        let store = Arc::new(ScriptedStore::new(&[10]).with_affected(&[7]));
        let mut writer = BatchWriter::new(store, 500);

        for i in 0..9 {
            writer.push(record(&format!("r{i}")));
        }

        assert_eq!(writer.flush().await.expect("flush should work"), 7);
    }
}
