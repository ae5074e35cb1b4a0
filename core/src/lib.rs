//! Harvest timing events from a Kafka topic into rows a database already
//! expects.
//!
//! The pipeline consumes one topic under a manual-commit consumer group,
//! validates and reshapes each JSON event through an injected
//! [`profile::EventProfile`], buffers the resulting records, and writes them
//! out in bounded batches through an update-only query set supplied at
//! runtime. A run ends when the store misses nothing, when the topic stays
//! silent past the poll timeout, or when the quiet-period watchdog gives up.

pub mod batch;
pub mod config;
pub mod errors;
pub mod pipeline;
pub mod profile;
pub mod progress;
pub mod source;
pub mod stats;
pub mod status;
pub mod store;
pub mod telemetry;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testing;

pub use config::HarvestConfig;
pub use errors::{HarvestError, Result};
pub use pipeline::{HarvestPipeline, RunSummary, StopReason};
