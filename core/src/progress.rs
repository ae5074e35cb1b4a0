use std::sync::Arc;

use tracing::debug;

use crate::errors::StoreError;
use crate::store::TimesStore;

/// Cached view of how many rows the store still expects. Queried once at
/// startup and again after every flush that stored something; in between
/// the pipeline works off the cache.
pub struct RemainingGauge<St> {
    store: Arc<St>,
    remaining: u64,
}

impl<St: TimesStore> RemainingGauge<St> {
    pub fn new(store: Arc<St>) -> Self {
        Self { store, remaining: 0 }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub async fn refresh(&mut self) -> Result<u64, StoreError> {
        let fresh = self.store.remaining_count().await?;
        if fresh > self.remaining && self.remaining > 0 {
            debug!(
                "Remaining count grew from {} to {}, rows were added out of band",
                self.remaining, fresh
            );
        }
        self.remaining = fresh;
        debug!("Remains to update {} rows", self.remaining);
        Ok(self.remaining)
    }
}
