//! Broker adapter: the thin seam between a session and the underlying
//! durable log. `kasocki-core` depends only on this trait; `kasocki-broker`
//! provides an rdkafka-backed implementation and `kasocki-testing` provides
//! an in-memory one.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::assignment::Assignment;

/// A single record read from the broker, prior to deserialization.
#[derive(Debug, Clone)]
pub struct BrokerRecord {
    /// Topic the record was read from.
    pub topic: String,
    /// Partition the record was read from.
    pub partition: i32,
    /// Offset of this record within its partition.
    pub offset: i64,
    /// Broker-assigned timestamp in milliseconds since the epoch, if present.
    pub timestamp: Option<i64>,
    /// Record key, if present.
    pub key: Option<Vec<u8>>,
    /// Raw record payload, not yet deserialized.
    pub payload: Vec<u8>,
}

/// Broker metadata: the set of known topics and their partition ids, used
/// to compute `availableTopics` and to expand topic-name-form subscribe
/// requests into explicit assignments.
#[derive(Debug, Clone, Default)]
pub struct BrokerMetadata {
    /// Topic name to its partition ids, in ascending order.
    pub topics: BTreeMap<String, Vec<i32>>,
}

/// Outcome of a single `poll` call.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// A record was read.
    Record(BrokerRecord),
    /// The assigned partition(s) are exhausted for now; this is benign.
    EndOfLog,
    /// No record arrived before the adapter's internal poll timeout; benign.
    Timeout,
}

/// Errors surfaced by a [`BrokerAdapter`]. These are *hard* failures; benign
/// conditions are represented as [`PollOutcome`] variants instead so the
/// consume pipeline's retry logic never has to inspect error messages.
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Failed to establish a connection to the broker.
    #[error("broker connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to fetch topic/partition metadata.
    #[error("broker metadata fetch failed: {0}")]
    MetadataFailed(String),

    /// Failed to assign the given partitions.
    #[error("broker assign failed: {0}")]
    AssignFailed(String),

    /// Poll returned a non-benign failure.
    #[error("broker poll failed: {0}")]
    PollFailed(String),

    /// Failed to cleanly disconnect.
    #[error("broker disconnect failed: {0}")]
    DisconnectFailed(String),
}

/// Trait for broker client implementations.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `async fn` so it can be used as `Arc<dyn BrokerAdapter>` / `Box<dyn
/// BrokerAdapter>` behind a session, which is constructed generically over
/// the broker implementation at the process bootstrap layer.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a given instance is, however,
/// only ever driven by one session (single outstanding poll invariant) —
/// `Sync` is required only so the adapter can live behind an `Arc` shared
/// with logging/metrics wiring, not for concurrent polling.
pub trait BrokerAdapter: Send + Sync {
    /// Fetch topic/partition metadata from the broker.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::MetadataFailed`] if the broker is unreachable
    /// or the metadata request fails.
    fn metadata(&self) -> Pin<Box<dyn Future<Output = Result<BrokerMetadata, BrokerError>> + Send + '_>>;

    /// Assign this session's consumer to the given explicit assignments.
    /// Called exactly once, at subscribe time.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AssignFailed`] if the assignment is rejected
    /// by the broker client.
    fn assign(
        &self,
        assignments: &[Assignment],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Poll for the next record across all assigned partitions.
    ///
    /// At most one call to `poll` is ever in flight per adapter instance.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PollFailed`] for hard failures. Benign
    /// end-of-log/timeout conditions are returned as `Ok(PollOutcome::EndOfLog)`
    /// / `Ok(PollOutcome::Timeout)`, not as errors.
    fn poll(&self) -> Pin<Box<dyn Future<Output = Result<PollOutcome, BrokerError>> + Send + '_>>;

    /// Release the broker handle. Must be safe to call exactly once; the
    /// session tracks this via its `closing` flag so implementations need
    /// not be idempotent themselves.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::DisconnectFailed`] if the underlying client
    /// reports a failure; per the design notes, callers should treat a
    /// timeout at teardown as non-fatal rather than propagating it further.
    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;
}

impl From<BrokerError> for crate::error::KasockiError {
    fn from(err: BrokerError) -> Self {
        Self::Broker(err.to_string())
    }
}
