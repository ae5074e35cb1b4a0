use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::Message;
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::errors::SourceError;
use crate::source::{CommitLedger, MessageSource, PendingOffset, SourceMessage};

/// Consumer context that watches asynchronous commit results. librdkafka
/// delivers them on its own thread, so failures land in the shared ledger
/// for the processing loop to find at its next checkpoint.
pub struct CommitTracking {
    ledger: CommitLedger,
}

impl ClientContext for CommitTracking {}

impl ConsumerContext for CommitTracking {
    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!("Offset commit acknowledged for {} partitions", offsets.count()),
            Err(e) => {
                error!("Offset commit failed: {}", e);
                self.ledger.record_failure(e.to_string());
            }
        }
    }
}

/// Kafka-backed message source with fully manual offset management.
pub struct KafkaSource {
    consumer: StreamConsumer<CommitTracking>,
    ledger: CommitLedger,
    consumer_timeout: Duration,
}

impl KafkaSource {
    /// Create the consumer and subscribe to the configured topic. Reads
    /// start from the earliest offset the group has not consumed yet and
    /// offsets are only ever committed explicitly.
    pub fn open(config: &KafkaConfig) -> Result<Self, SourceError> {
        let ledger = CommitLedger::default();
        let consumer: StreamConsumer<CommitTracking> = consumer_config(config)
            .create_with_context(CommitTracking {
                ledger: ledger.clone(),
            })
            .map_err(|e| SourceError::ConsumerCreation {
                reason: e.to_string(),
            })?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| SourceError::Subscription {
                topic: config.topic.clone(),
                reason: e.to_string(),
            })?;

        info!("Subscribed to Kafka topic: {}", config.topic);

        Ok(Self {
            consumer,
            ledger,
            consumer_timeout: config.consumer_timeout(),
        })
    }
}

fn consumer_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("group.id", &config.consumer_group)
        .set("enable.partition.eof", "false")
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set("session.timeout.ms", config.session_timeout_ms.to_string())
        .set(
            "heartbeat.interval.ms",
            config.heartbeat_interval_ms.to_string(),
        )
        // librdkafka has no max.poll.records; the prefetch queue depth is
        // the knob that caps how many messages pile up client-side.
        .set("queued.min.messages", config.max_poll_records.to_string());
    client_config
}

impl MessageSource for KafkaSource {
    async fn next(&mut self) -> Result<Option<SourceMessage>, SourceError> {
        match timeout(self.consumer_timeout, self.consumer.recv()).await {
            Err(_) => {
                debug!(
                    "No message within {:?}, ending consumption",
                    self.consumer_timeout
                );
                Ok(None)
            }
            Ok(Err(e)) => Err(SourceError::Consumption {
                reason: e.to_string(),
            }),
            Ok(Ok(message)) => {
                let received = SourceMessage {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                    timestamp_ms: message.timestamp().to_millis(),
                    payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                };
                debug!(
                    "Received message from partition {} at offset {}",
                    received.partition, received.offset
                );
                Ok(Some(received))
            }
        }
    }

    fn commit_async(&mut self, pending: &PendingOffset) -> Result<(), SourceError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &pending.topic,
                pending.partition,
                Offset::Offset(pending.next_offset),
            )
            .map_err(|e| SourceError::OffsetCommit {
                reason: e.to_string(),
            })?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| SourceError::OffsetCommit {
                reason: e.to_string(),
            })
    }

    fn take_commit_failure(&mut self) -> Option<SourceError> {
        self.ledger
            .take_failure()
            .map(|reason| SourceError::OffsetCommit { reason })
    }

    async fn close(self) -> Result<(), SourceError> {
        // Dropping the consumer leaves the group; unsubscribing first keeps
        // the rebalance clean.
        self.consumer.unsubscribe();
        Ok(())
    }
}
