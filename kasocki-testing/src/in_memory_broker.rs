//! An in-memory [`BrokerAdapter`] for exercising the session core without a
//! live Kafka/Redpanda cluster: fixed topic/partition metadata, seeded or
//! runtime-appended records, and a configurable out-of-range offset policy.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use kasocki_core::assignment::Assignment;
use kasocki_core::broker::{BrokerAdapter, BrokerError, BrokerMetadata, BrokerRecord, PollOutcome};
use tokio::sync::Mutex;

/// Out-of-range offset policy, mirroring the broker's
/// `default_topic_config.auto.offset.reset` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    /// Reset to the oldest retained record.
    Earliest,
    /// Reset to just past the newest record (default).
    Latest,
}

impl Default for OffsetReset {
    fn default() -> Self {
        Self::Latest
    }
}

#[derive(Debug, Clone, Default)]
struct Partition {
    records: Vec<BrokerRecord>,
}

#[derive(Debug)]
struct Inner {
    topics: BTreeMap<String, Vec<Partition>>,
    cursors: BTreeMap<(String, i32), usize>,
    assigned_order: Vec<(String, i32)>,
    next_poll_index: usize,
    offset_reset: OffsetReset,
    closed: bool,
    disconnect_calls: u32,
}

/// An in-memory broker, seeded with fixed topic/partition metadata and an
/// initial record log. Clone is cheap (shares the same backing state), so a
/// test can hold on to a handle for [`InMemoryBroker::produce`] while the
/// session owns its own `Arc<dyn BrokerAdapter>` clone.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryBroker {
    /// Start building a broker with no topics.
    #[must_use]
    pub fn builder() -> InMemoryBrokerBuilder {
        InMemoryBrokerBuilder::default()
    }

    /// Append a new record to `(topic, partition)` at runtime, e.g. to
    /// exercise the "latest offset reset, then a new record arrives" seed
    /// scenario. Returns the offset the record was appended at.
    ///
    /// # Panics
    ///
    /// Panics if `topic`/`partition` were not configured via the builder.
    pub async fn produce(&self, topic: &str, partition: i32, payload: Vec<u8>) -> i64 {
        self.produce_full(topic, partition, payload, None, None).await
    }

    /// Like [`produce`](Self::produce), with an explicit key and timestamp.
    ///
    /// # Panics
    ///
    /// Panics if `topic`/`partition` were not configured via the builder.
    pub async fn produce_full(
        &self,
        topic: &str,
        partition: i32,
        payload: Vec<u8>,
        key: Option<Vec<u8>>,
        timestamp: Option<i64>,
    ) -> i64 {
        let mut inner = self.inner.lock().await;
        let partitions = inner
            .topics
            .get_mut(topic)
            .unwrap_or_else(|| panic!("topic {topic} was not configured on this InMemoryBroker"));
        let part = partitions
            .get_mut(usize::try_from(partition).expect("partition index fits in usize"))
            .unwrap_or_else(|| panic!("partition {partition} was not configured for topic {topic}"));
        let offset = i64::try_from(part.records.len()).expect("offset fits in i64");
        part.records.push(BrokerRecord { topic: topic.to_string(), partition, offset, timestamp, key, payload });
        offset
    }

    /// Number of times [`BrokerAdapter::disconnect`] has completed on this
    /// instance. Used to assert that repeated disconnects are idempotent.
    pub async fn disconnect_call_count(&self) -> u32 {
        self.inner.lock().await.disconnect_calls
    }
}

/// Builder for [`InMemoryBroker`].
#[derive(Default)]
pub struct InMemoryBrokerBuilder {
    topics: BTreeMap<String, Vec<Partition>>,
    offset_reset: OffsetReset,
}

impl InMemoryBrokerBuilder {
    /// Declare a topic with the given number of empty partitions.
    #[must_use]
    pub fn topic(mut self, name: impl Into<String>, partitions: usize) -> Self {
        self.topics.insert(name.into(), vec![Partition::default(); partitions]);
        self
    }

    /// Seed `(topic, partition)` with a record at the next offset.
    ///
    /// # Panics
    ///
    /// Panics if `topic`/`partition` was not declared via [`topic`](Self::topic).
    #[must_use]
    pub fn record(mut self, topic: &str, partition: i32, payload: impl Into<Vec<u8>>) -> Self {
        let partitions = self
            .topics
            .get_mut(topic)
            .unwrap_or_else(|| panic!("topic {topic} not declared; call .topic() first"));
        let part = partitions
            .get_mut(usize::try_from(partition).expect("partition index fits in usize"))
            .unwrap_or_else(|| panic!("partition {partition} not declared for topic {topic}"));
        let offset = i64::try_from(part.records.len()).expect("offset fits in i64");
        part.records.push(BrokerRecord {
            topic: topic.to_string(),
            partition,
            offset,
            timestamp: Some(0),
            key: None,
            payload: payload.into(),
        });
        self
    }

    /// Set the out-of-range offset reset policy (default: `Latest`).
    #[must_use]
    pub const fn offset_reset(mut self, policy: OffsetReset) -> Self {
        self.offset_reset = policy;
        self
    }

    /// Build the broker.
    #[must_use]
    pub fn build(self) -> InMemoryBroker {
        InMemoryBroker {
            inner: Arc::new(Mutex::new(Inner {
                topics: self.topics,
                cursors: BTreeMap::new(),
                assigned_order: Vec::new(),
                next_poll_index: 0,
                offset_reset: self.offset_reset,
                closed: false,
                disconnect_calls: 0,
            })),
        }
    }
}

impl BrokerAdapter for InMemoryBroker {
    fn metadata(&self) -> Pin<Box<dyn Future<Output = Result<BrokerMetadata, BrokerError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            let topics = inner
                .topics
                .iter()
                .map(|(name, partitions)| {
                    let ids = (0..partitions.len())
                        .map(|i| i32::try_from(i).expect("partition count fits in i32"))
                        .collect();
                    (name.clone(), ids)
                })
                .collect();
            Ok(BrokerMetadata { topics })
        })
    }

    fn assign(
        &self,
        assignments: &[Assignment],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let assignments = assignments.to_vec();
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.assigned_order.clear();
            for assignment in &assignments {
                let len = inner
                    .topics
                    .get(&assignment.topic)
                    .and_then(|partitions| {
                        partitions.get(usize::try_from(assignment.partition).ok()?)
                    })
                    .map(|partition| partition.records.len())
                    .ok_or_else(|| {
                        BrokerError::AssignFailed(format!(
                            "unknown topic/partition {}/{}",
                            assignment.topic, assignment.partition
                        ))
                    })?;
                let cursor = if assignment.offset < 0 {
                    len
                } else {
                    let requested = usize::try_from(assignment.offset).unwrap_or(usize::MAX);
                    if requested > len {
                        match inner.offset_reset {
                            OffsetReset::Earliest => 0,
                            OffsetReset::Latest => len,
                        }
                    } else {
                        requested
                    }
                };
                let key = (assignment.topic.clone(), assignment.partition);
                inner.cursors.insert(key.clone(), cursor);
                inner.assigned_order.push(key);
            }
            inner.next_poll_index = 0;
            Ok(())
        })
    }

    fn poll(&self) -> Pin<Box<dyn Future<Output = Result<PollOutcome, BrokerError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return Ok(PollOutcome::EndOfLog);
            }
            let count = inner.assigned_order.len();
            if count == 0 {
                return Ok(PollOutcome::EndOfLog);
            }
            for step in 0..count {
                let index = (inner.next_poll_index + step) % count;
                let key = inner.assigned_order[index].clone();
                let cursor = *inner.cursors.get(&key).unwrap_or(&0);
                let partitions = inner
                    .topics
                    .get(&key.0)
                    .ok_or_else(|| BrokerError::PollFailed(format!("topic {} disappeared", key.0)))?;
                let partition = partitions
                    .get(usize::try_from(key.1).expect("partition index fits in usize"))
                    .ok_or_else(|| BrokerError::PollFailed(format!("partition {} disappeared", key.1)))?;
                if let Some(record) = partition.records.get(cursor) {
                    let record = record.clone();
                    inner.cursors.insert(key, cursor + 1);
                    inner.next_poll_index = (index + 1) % count;
                    return Ok(PollOutcome::Record(record));
                }
            }
            inner.next_poll_index = (inner.next_poll_index + 1) % count;
            Ok(PollOutcome::EndOfLog)
        })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.closed = true;
            inner.disconnect_calls += 1;
            Ok(())
        })
    }
}
