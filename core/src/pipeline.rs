use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::batch::BatchWriter;
use crate::config::{KafkaConfig, ProcessingConfig};
use crate::errors::Result;
use crate::profile::EventProfile;
use crate::progress::RemainingGauge;
use crate::source::kafka::KafkaSource;
use crate::source::{MessageSource, PendingOffset, SourceMessage};
use crate::stats::{DataStats, histogram_lines, per_second_rates};
use crate::status::StatusSink;
use crate::store::TimesStore;
use crate::telemetry::HarvestMetrics;
use crate::watchdog::QuietPeriodWatchdog;

/// Why a run stopped consuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every expected row is updated.
    Complete,
    /// The source produced nothing within its poll timeout.
    SourceExhausted,
    /// The watchdog gave up after a forced flush stored nothing.
    QuietPeriod,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Total rows stored across every flush of the run.
    pub stored: u64,
    /// Rows the store still misses when the run ends.
    pub remaining: u64,
    pub stop: StopReason,
}

/// Drives the consume, validate, buffer, flush, acknowledge cycle against
/// one topic until the store misses nothing or nothing useful arrives
/// anymore. Delivery is at-least-once: offsets are acknowledged only after
/// the message has been handled, and replays land on update-only writes.
///
/// Per message the loop:
/// 1. pulls the next message; a poll timeout ends the run,
/// 2. parses and validates it; rejected messages skip straight to step 4,
/// 3. transforms and buffers it, flushing once the buffer reaches its cap,
/// 4. submits the offset acknowledgment, accepted or not,
/// 5. checkpoints: surfaces commit failures, stops when nothing remains,
///    and lets the watchdog force a flush after a long quiet spell.
pub struct HarvestPipeline<St> {
    kafka: KafkaConfig,
    processing: ProcessingConfig,
    store: Arc<St>,
    writer: BatchWriter<St>,
    progress: RemainingGauge<St>,
    watchdog: QuietPeriodWatchdog,
    profile: Arc<dyn EventProfile>,
    metrics: HarvestMetrics,
    stored: u64,
}

impl<St: TimesStore> HarvestPipeline<St> {
    pub fn new(
        kafka: KafkaConfig,
        processing: ProcessingConfig,
        store: Arc<St>,
        profile: Arc<dyn EventProfile>,
    ) -> Self {
        let writer = BatchWriter::new(Arc::clone(&store), processing.batch_size);
        let progress = RemainingGauge::new(Arc::clone(&store));
        let watchdog = QuietPeriodWatchdog::new(processing.max_quiet_period());
        Self {
            kafka,
            processing,
            store,
            writer,
            progress,
            watchdog,
            profile,
            metrics: HarvestMetrics::default(),
            stored: 0,
        }
    }

    pub fn metrics(&self) -> &HarvestMetrics {
        &self.metrics
    }

    /// Run to completion and report the results into the status sink.
    pub async fn run<S: StatusSink>(&mut self, status: &mut S) -> Result<RunSummary> {
        let remaining = self.progress.refresh().await?;
        let summary = if remaining == 0 {
            // Nothing to wait for; the consumer is never even created.
            info!("Store misses nothing, not consuming at all");
            RunSummary {
                stored: 0,
                remaining: 0,
                stop: StopReason::Complete,
            }
        } else {
            info!(
                "Consuming topic {} until {} rows are updated",
                self.kafka.topic, remaining
            );
            self.record_parameters(status);
            let source = KafkaSource::open(&self.kafka)?;
            self.execute(source).await?
        };

        self.report(status, &summary).await?;
        Ok(summary)
    }

    /// Consume the source until a stop condition, settle the buffer with one
    /// last unconditional flush, and summarize.
    async fn execute<S: MessageSource>(&mut self, source: S) -> Result<RunSummary> {
        let stop = self.drain(source).await?;

        let affected = self.writer.flush().await?;
        self.note_flush(affected).await?;

        let summary = RunSummary {
            stored: self.stored,
            remaining: self.progress.remaining(),
            stop,
        };
        match summary.stop {
            StopReason::Complete => {
                info!("All expected rows stored, {} in this run", summary.stored)
            }
            StopReason::SourceExhausted => info!(
                "Topic went silent, {} rows stored, {} still missing",
                summary.stored, summary.remaining
            ),
            StopReason::QuietPeriod => warn!(
                "No effective flush within {:?}, giving up with {} rows still missing",
                self.processing.max_quiet_period(),
                summary.remaining
            ),
        }
        Ok(summary)
    }

    async fn drain<S: MessageSource>(&mut self, mut source: S) -> Result<StopReason> {
        self.watchdog.mark_progress();
        let outcome = self.consume_loop(&mut source).await;
        let closed = source.close().await;
        let stop = outcome?;
        closed?;
        Ok(stop)
    }

    async fn consume_loop<S: MessageSource>(&mut self, source: &mut S) -> Result<StopReason> {
        loop {
            let Some(message) = source.next().await? else {
                return Ok(StopReason::SourceExhausted);
            };
            self.metrics.messages_received += 1;

            self.absorb(&message).await?;

            source.commit_async(&PendingOffset::after(&message))?;
            self.metrics.offsets_submitted += 1;

            if let Some(stop) = self.checkpoint(source).await? {
                return Ok(stop);
            }
        }
    }

    /// Validate, transform and buffer one message; flush when the buffer
    /// reaches its cap. Rejected messages only bump a counter, their offset
    /// is still acknowledged by the caller.
    async fn absorb(&mut self, message: &SourceMessage) -> Result<()> {
        let event: Value = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                debug!("Rejecting message at offset {}: not JSON: {}", message.offset, e);
                self.metrics.messages_rejected += 1;
                return Ok(());
            }
        };
        if !self.profile.validate(&event) {
            debug!("Rejecting message at offset {}: failed validation", message.offset);
            self.metrics.messages_rejected += 1;
            return Ok(());
        }

        let timestamp = message.broker_timestamp().unwrap_or_else(Utc::now);
        self.writer.push(self.profile.to_record(timestamp, &event));
        self.metrics.records_buffered += 1;

        if self.writer.reached_cap(self.progress.remaining()) {
            let affected = self.writer.flush().await?;
            self.note_flush(affected).await?;
        }
        Ok(())
    }

    async fn checkpoint<S: MessageSource>(&mut self, source: &mut S) -> Result<Option<StopReason>> {
        if let Some(failure) = source.take_commit_failure() {
            return Err(failure.into());
        }
        if self.progress.remaining() == 0 {
            return Ok(Some(StopReason::Complete));
        }
        if self.watchdog.expired() {
            let quiet_for = self.watchdog.quiet_for();
            let affected = self.writer.flush().await?;
            self.metrics.forced_flushes += 1;
            self.note_flush(affected).await?;
            if affected == 0 {
                return Ok(Some(StopReason::QuietPeriod));
            }
            warn!(
                "Quiet for {:?} but the forced flush stored {} rows, carrying on",
                quiet_for, affected
            );
        }
        Ok(None)
    }

    /// Account for one flush. Only a flush that stored something counts as
    /// progress: it restarts the watchdog and refreshes the remaining count.
    async fn note_flush(&mut self, affected: u64) -> Result<()> {
        self.metrics.flushes += 1;
        self.stored += affected;
        if affected > 0 {
            self.metrics.effective_flushes += 1;
            self.watchdog.mark_progress();
            self.progress.refresh().await?;
        }
        Ok(())
    }

    fn record_parameters<S: StatusSink>(&self, status: &mut S) {
        status.set("parameters.kafka.bootstrap", json!(self.kafka.bootstrap_servers));
        status.set("parameters.kafka.group", json!(self.kafka.consumer_group));
        status.set("parameters.kafka.topic", json!(self.kafka.topic));
        status.set("parameters.kafka.timeout", json!(self.kafka.consumer_timeout_ms));
    }

    /// Write the run results where the status document expects them, plus
    /// the timing statistics computed from the updated rows.
    async fn report<S: StatusSink>(&self, status: &mut S, summary: &RunSummary) -> Result<()> {
        status.set(self.profile.count_key(), json!(summary.stored));

        let biggest = self.store.biggest_timestamp().await?;
        if let Some(biggest) = biggest {
            status.set(self.profile.biggest_key(), json!(biggest.to_rfc3339()));
        }

        if let (Some(start_key), Some(biggest)) = (self.profile.start_key(), biggest) {
            match status.get_date(start_key) {
                Some(start) if biggest > start => {
                    let elapsed = (biggest - start).num_milliseconds() as f64 / 1000.0;
                    let simple_rps = summary.stored as f64 / elapsed;
                    info!("Simple RPS: {:.3}", simple_rps);
                    status.set("results.simple_rps", json!(simple_rps));
                }
                Some(_) => debug!("Biggest timestamp does not trail {start_key}, skipping simple RPS"),
                None => debug!("No usable date under {start_key}, skipping simple RPS"),
            }
        }

        self.report_timings(status).await
    }

    async fn report_timings<S: StatusSink>(&self, status: &mut S) -> Result<()> {
        let columns = self.profile.timing_columns();
        let prefix = self.profile.stats_prefix();

        let durations = self.store.timing_durations(&columns).await?;
        if let Some(stats) = DataStats::compute(&durations) {
            info!(
                "{} to {} durations: {:?}",
                columns.start_column, columns.end_column, stats
            );
            for line in histogram_lines(&durations, 10, 40) {
                info!("{}", line);
            }
            status.set(&format!("{prefix}.duration_stats"), stats.to_value());
        }

        let rates = per_second_rates(&self.store.end_timestamps(&columns).await?);
        if let Some(stats) = DataStats::compute(&rates) {
            info!("{} per-second rates: {:?}", columns.end_column, stats);
            for line in histogram_lines(&rates, 10, 40) {
                info!("{}", line);
            }
            status.set(&format!("{prefix}.rps_stats"), stats.to_value());
        }
        Ok(())
    }
}
