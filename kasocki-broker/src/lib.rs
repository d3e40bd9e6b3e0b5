//! rdkafka-backed [`BrokerAdapter`] for kasocki.
//!
//! This is a thin adapter, not a general-purpose Kafka client wrapper: it
//! exposes exactly the four operations a [`Session`] needs (metadata,
//! assign, poll-one, disconnect) and none of the coordinated-consumer-group
//! machinery a typical Kafka client API centers on.
//!
//! # The "no-rebalance" group trick
//!
//! Each session gets its own never-reused consumer group id
//! (`kasocki-<session-id>`) and calls `assign` (explicit partition
//! assignment) rather than `subscribe` (coordinated group membership). This
//! means the broker never attempts a rebalance for this consumer — sessions
//! are standalone readers, never group members sharing partitions. This is
//! a deliberate workaround for rdkafka's group-coordinator overhead on
//! consumers that hold exactly one member for their entire lifetime, and
//! should be preserved rather than "fixed" into a real consumer group.
//!
//! # Poll-one over a blocking client
//!
//! rdkafka's [`BaseConsumer::poll`] is a blocking call tuned for a fixed
//! timeout; `kasocki-core` wants a bounded-latency poll-one primitive it can
//! `.await`. Each call is dispatched onto [`tokio::task::spawn_blocking`]
//! with a short internal timeout, turning blocking I/O into an async
//! poll-one without starving the runtime's worker threads.
//!
//! [`Session`]: kasocki_core::session::Session
//! [`BaseConsumer::poll`]: rdkafka::consumer::BaseConsumer::poll

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kasocki_core::assignment::Assignment;
use kasocki_core::broker::{BrokerAdapter, BrokerError, BrokerMetadata, BrokerRecord, PollOutcome};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message as _;
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};

/// How long a single blocking `poll` call may wait for a record before
/// reporting [`PollOutcome::Timeout`].
const POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// How long `metadata()` waits for the broker to respond.
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Out-of-range offset policy, mirrors Kafka's
/// `default_topic_config.auto.offset.reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    /// Reset to the oldest retained record.
    Earliest,
    /// Reset to just past the newest record (default).
    Latest,
}

impl OffsetReset {
    const fn as_rdkafka_str(self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

impl Default for OffsetReset {
    fn default() -> Self {
        Self::Latest
    }
}

/// Configuration for an [`RdKafkaBrokerAdapter`]. Builder-configured,
/// mirroring the teacher's `RedpandaEventBusBuilder` shape.
#[derive(Clone)]
pub struct RdKafkaBrokerAdapterBuilder {
    brokers: Option<String>,
    session_id: Option<String>,
    client_id: Option<String>,
    offset_reset: OffsetReset,
    extra: BTreeMap<String, String>,
}

impl Default for RdKafkaBrokerAdapterBuilder {
    fn default() -> Self {
        Self {
            brokers: None,
            session_id: None,
            client_id: None,
            offset_reset: OffsetReset::default(),
            extra: BTreeMap::new(),
        }
    }
}

impl RdKafkaBrokerAdapterBuilder {
    /// Comma-separated bootstrap broker list. Defaults to
    /// `localhost:9092` if never set.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// The owning session's id. Forces `group.id = "kasocki-<session_id>"`
    /// and, unless [`client_id`](Self::client_id) overrides it, `client.id`
    /// to the same value — a unique, never-reused group per session (the
    /// "no-rebalance" trick, see module docs).
    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Override `client.id`. Defaults to `kasocki-<session_id>`.
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Out-of-range offset reset policy (default: [`OffsetReset::Latest`]).
    #[must_use]
    pub const fn offset_reset(mut self, policy: OffsetReset) -> Self {
        self.offset_reset = policy;
        self
    }

    /// Set an additional `rdkafka` client config key verbatim. Forced keys
    /// (`bootstrap.servers`, `group.id`, `client.id`, `enable.auto.commit`,
    /// `auto.offset.reset`) always win over anything set here.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Build the adapter, creating the underlying rdkafka consumer.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the consumer cannot be
    /// constructed (invalid config, unreachable brokers at connect time
    /// depending on `rdkafka` version).
    pub fn build(self) -> Result<RdKafkaBrokerAdapter, BrokerError> {
        let session_id = self
            .session_id
            .unwrap_or_else(|| "anonymous".to_string());
        let brokers = self.brokers.unwrap_or_else(|| "localhost:9092".to_string());
        let group_id = format!("kasocki-{session_id}");
        let client_id = self.client_id.unwrap_or_else(|| format!("kasocki-{session_id}"));

        let mut config = ClientConfig::new();
        for (key, value) in &self.extra {
            config.set(key.as_str(), value.as_str());
        }
        config
            .set("bootstrap.servers", &brokers)
            .set("group.id", &group_id)
            .set("client.id", &client_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", self.offset_reset.as_rdkafka_str())
            .set("enable.partition.eof", "true");

        tracing::info!(
            session = %session_id,
            brokers = %brokers,
            group_id = %group_id,
            client_id = %client_id,
            offset_reset = self.offset_reset.as_rdkafka_str(),
            "building rdkafka consumer for session"
        );

        let consumer: BaseConsumer = config
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(format!("failed to create consumer: {e}")))?;

        Ok(RdKafkaBrokerAdapter { consumer: Arc::new(consumer), closed: Arc::new(AtomicBool::new(false)) })
    }
}

/// An rdkafka-backed [`BrokerAdapter`]. One instance per session. The
/// consumer is held behind an `Arc` purely so each `spawn_blocking` call can
/// move an owned, `'static` handle onto its worker thread; the session
/// core's single-outstanding-poll invariant means it's never gripped from
/// two threads at once. `closed` tracks `disconnect()` so a poll racing a
/// concurrent disconnect observes a clean end-of-log rather than touching
/// the consumer at all.
pub struct RdKafkaBrokerAdapter {
    consumer: Arc<BaseConsumer>,
    closed: Arc<AtomicBool>,
}

impl RdKafkaBrokerAdapter {
    /// Start configuring a new adapter.
    #[must_use]
    pub fn builder() -> RdKafkaBrokerAdapterBuilder {
        RdKafkaBrokerAdapterBuilder::default()
    }
}

fn classify_kafka_error(err: &KafkaError) -> Option<PollOutcome> {
    // rdkafka surfaces both "no message available" and logical
    // end-of-partition as errors from the C library; neither is a hard
    // failure for a poll-one primitive.
    if matches!(err, KafkaError::MessageConsumption(code) if code.to_string().contains("PartitionEOF"))
    {
        return Some(PollOutcome::EndOfLog);
    }
    None
}

impl BrokerAdapter for RdKafkaBrokerAdapter {
    fn metadata(&self) -> Pin<Box<dyn Future<Output = Result<BrokerMetadata, BrokerError>> + Send + '_>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(BrokerError::MetadataFailed("adapter already disconnected".to_string()));
            }
            let consumer = Arc::clone(&self.consumer);
            tokio::task::spawn_blocking(move || {
                let metadata = consumer
                    .fetch_metadata(None, METADATA_TIMEOUT)
                    .map_err(|e| BrokerError::MetadataFailed(e.to_string()))?;
                let mut topics = BTreeMap::new();
                for topic in metadata.topics() {
                    let partitions = topic.partitions().iter().map(|p| p.id()).collect();
                    topics.insert(topic.name().to_string(), partitions);
                }
                Ok(BrokerMetadata { topics })
            })
            .await
            .map_err(|e| BrokerError::MetadataFailed(format!("metadata task panicked: {e}")))?
        })
    }

    fn assign(
        &self,
        assignments: &[Assignment],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let assignments = assignments.to_vec();
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(BrokerError::AssignFailed("adapter already disconnected".to_string()));
            }
            let consumer = Arc::clone(&self.consumer);
            tokio::task::spawn_blocking(move || {
                let mut list = TopicPartitionList::new();
                for assignment in &assignments {
                    let offset = if assignment.offset < 0 {
                        Offset::End
                    } else {
                        Offset::Offset(assignment.offset)
                    };
                    list.add_partition_offset(&assignment.topic, assignment.partition, offset)
                        .map_err(|e| BrokerError::AssignFailed(e.to_string()))?;
                }
                consumer.assign(&list).map_err(|e| BrokerError::AssignFailed(e.to_string()))
            })
            .await
            .map_err(|e| BrokerError::AssignFailed(format!("assign task panicked: {e}")))?
        })
    }

    fn poll(&self) -> Pin<Box<dyn Future<Output = Result<PollOutcome, BrokerError>> + Send + '_>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Ok(PollOutcome::EndOfLog);
            }
            let consumer = Arc::clone(&self.consumer);
            tokio::task::spawn_blocking(move || match consumer.poll(POLL_TIMEOUT) {
                None => Ok(PollOutcome::Timeout),
                Some(Ok(message)) => {
                    let record = BrokerRecord {
                        topic: message.topic().to_string(),
                        partition: message.partition(),
                        offset: message.offset(),
                        timestamp: message.timestamp().to_millis(),
                        key: message.key().map(<[u8]>::to_vec),
                        payload: message.payload().map_or_else(Vec::new, <[u8]>::to_vec),
                    };
                    Ok(PollOutcome::Record(record))
                },
                Some(Err(err)) => {
                    classify_kafka_error(&err).map_or_else(
                        || Err(BrokerError::PollFailed(err.to_string())),
                        Ok,
                    )
                },
            })
            .await
            .map_err(|e| BrokerError::PollFailed(format!("poll task panicked: {e}")))?
        })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            // Flip the flag first so any poll/assign/metadata call that
            // hasn't grabbed its `Arc` clone yet bails out without touching
            // the consumer. A call that already has its clone in flight on
            // a blocking thread still runs to completion; the underlying
            // `BaseConsumer` drops once every clone (this one included) is
            // gone, which is the only teardown rdkafka exposes.
            self.closed.store(true, Ordering::Release);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_brokers_and_group_id() {
        let builder = RdKafkaBrokerAdapter::builder().session_id("abc123");
        assert_eq!(builder.brokers, None);
        assert_eq!(builder.session_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn offset_reset_defaults_to_latest() {
        assert_eq!(OffsetReset::default(), OffsetReset::Latest);
        assert_eq!(OffsetReset::Latest.as_rdkafka_str(), "latest");
        assert_eq!(OffsetReset::Earliest.as_rdkafka_str(), "earliest");
    }
}
