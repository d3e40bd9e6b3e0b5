//! The per-socket consumer session: state machine, consume pipeline, and
//! the handler-wrap that every socket-event handler runs inside.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::assignment::{available_topics, normalize_subscribe_request, Assignment, SubscribeRequest};
use crate::broker::BrokerAdapter;
use crate::error::{KasockiError, WireError};
use crate::matcher::{compile_matcher, Matcher, MatcherFactory};
use crate::message::{default_deserializer, deserialize_message, Deserializer};

/// The interval a session sleeps before retrying after a benign broker
/// condition (end-of-log, poll timeout).
const BENIGN_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Opaque session identifier, supplied by the transport (typically the
/// socket connection id). Used only for logging and error context.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a transport-supplied connection id as a session id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for a new session. `matcher_factory` and `deserializer`
/// are the pluggable collaborators that turn raw filter/payload bytes into
/// the compiled matcher and JSON value a session works with.
#[derive(Clone)]
pub struct SessionConfig {
    /// Optional allow-list; `availableTopics` is the intersection of this
    /// set with the broker's metadata topics, or the metadata topics
    /// verbatim if `None`.
    pub allowed_topics: Option<std::collections::BTreeSet<String>>,
    /// Compiles a raw filter map into a [`Matcher`]. Defaults to
    /// [`compile_matcher`].
    pub matcher_factory: MatcherFactory,
    /// Turns a raw broker record into a JSON value. Defaults to
    /// [`default_deserializer`].
    pub deserializer: Deserializer,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            allowed_topics: None,
            matcher_factory: Arc::new(|raw| compile_matcher(raw)),
            deserializer: Arc::new(default_deserializer),
        }
    }
}

/// The per-socket consumer session. Owns a broker handle exclusively; all
/// mutation happens through `&mut self` methods run from a single task, so
/// no interior mutability is needed for session-local state.
pub struct Session {
    id: SessionId,
    broker: Arc<dyn BrokerAdapter>,
    metadata: crate::broker::BrokerMetadata,
    available_topics: std::collections::BTreeSet<String>,
    assignments: Vec<Assignment>,
    matcher: Option<Matcher>,
    matcher_factory: MatcherFactory,
    deserializer: Deserializer,
    subscribed: bool,
    running: bool,
    closing: bool,
}

impl Session {
    /// Drive the `Init → Ready` (or `Init → Closed`) transition: fetch
    /// broker metadata, compute `availableTopics`, and fail closed if it
    /// is empty.
    ///
    /// # Errors
    ///
    /// Returns [`KasockiError::Broker`] if metadata fetch fails, or
    /// [`KasockiError::TopicNotAvailable`] if the computed `availableTopics`
    /// set is empty (the broker handle is released in that case, per the
    /// init-time failure propagation policy).
    pub async fn connect(
        id: SessionId,
        broker: Arc<dyn BrokerAdapter>,
        config: SessionConfig,
    ) -> Result<Self, KasockiError> {
        let metadata = broker.metadata().await?;
        let available = available_topics(&metadata, config.allowed_topics.as_ref());
        if available.is_empty() {
            let _ = broker.disconnect().await;
            return Err(KasockiError::TopicNotAvailable(
                "no topics available after applying allow-list".to_string(),
            ));
        }
        Ok(Self {
            id,
            broker,
            metadata,
            available_topics: available,
            assignments: Vec::new(),
            matcher: None,
            matcher_factory: config.matcher_factory,
            deserializer: config.deserializer,
            subscribed: false,
            running: false,
            closing: false,
        })
    }

    /// This session's identifier.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// The `availableTopics` set computed at connect time. Fixed for the
    /// lifetime of the session.
    #[must_use]
    pub const fn available_topics(&self) -> &std::collections::BTreeSet<String> {
        &self.available_topics
    }

    /// Whether `subscribe` has succeeded for this session.
    #[must_use]
    pub const fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Whether the push-mode consume loop should currently be running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Whether this session is closing (terminal).
    #[must_use]
    pub const fn is_closing(&self) -> bool {
        self.closing
    }

    /// The normalized assignment list established by `subscribe`.
    #[must_use]
    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    fn guard_open(&self) -> Result<(), KasockiError> {
        if self.closing {
            return Err(KasockiError::AlreadyClosing);
        }
        Ok(())
    }

    fn guard_subscribed(&self) -> Result<(), KasockiError> {
        self.guard_open()?;
        if !self.subscribed {
            return Err(KasockiError::NotSubscribed);
        }
        Ok(())
    }

    /// `subscribe` handler: validate and normalize the request, assign on
    /// the broker, and flip `subscribed`. Returns the normalized
    /// assignment list for the ack.
    ///
    /// # Errors
    ///
    /// See [`crate::assignment::normalize_subscribe_request`] for
    /// validation failures; returns [`KasockiError::AlreadySubscribed`] if
    /// already subscribed, or [`KasockiError::AlreadyClosing`] if closing.
    pub async fn subscribe(&mut self, request: SubscribeRequest) -> Result<Vec<Assignment>, KasockiError> {
        self.guard_open()?;
        if self.subscribed {
            return Err(KasockiError::AlreadySubscribed);
        }
        let normalized = normalize_subscribe_request(request, &self.available_topics, &self.metadata)?;
        self.broker.assign(&normalized).await?;
        self.assignments = normalized.clone();
        self.subscribed = true;
        Ok(normalized)
    }

    /// `filter` handler: compile a new matcher (replacing any prior one)
    /// or clear it if `spec` is `None`. Returns the compiled filter's wire
    /// view for the ack.
    ///
    /// # Errors
    ///
    /// Returns [`KasockiError::InvalidFilter`] if compilation fails, or
    /// [`KasockiError::NotSubscribed`] / [`KasockiError::AlreadyClosing`]
    /// per the usual guards.
    pub fn filter(
        &mut self,
        spec: Option<BTreeMap<String, Value>>,
    ) -> Result<BTreeMap<String, Value>, KasockiError> {
        self.guard_subscribed()?;
        match spec {
            None => {
                self.matcher = None;
                Ok(BTreeMap::new())
            },
            Some(raw) => {
                let matcher = (self.matcher_factory)(&raw)?;
                let rendered = matcher.render();
                self.matcher = Some(matcher);
                Ok(rendered)
            },
        }
    }

    /// `consume` handler (pull mode): return the next matched message, or
    /// `None` if the session closed mid-poll.
    ///
    /// # Errors
    ///
    /// Returns [`KasockiError::NotSubscribed`] / [`KasockiError::AlreadyClosing`]
    /// per the usual guards, or a hard broker error.
    pub async fn consume(&mut self) -> Result<Option<Value>, KasockiError> {
        self.guard_subscribed()?;
        self.consume_one().await
    }

    /// `start` handler: flip `running = true`.
    ///
    /// # Errors
    ///
    /// Returns [`KasockiError::NotSubscribed`], [`KasockiError::AlreadyStarted`],
    /// or [`KasockiError::AlreadyClosing`].
    pub fn start(&mut self) -> Result<(), KasockiError> {
        self.guard_subscribed()?;
        if self.running {
            return Err(KasockiError::AlreadyStarted);
        }
        self.running = true;
        Ok(())
    }

    /// `stop` handler: flip `running = false`. Idempotent; calling it
    /// while already stopped is a logged no-op, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`KasockiError::NotSubscribed`] / [`KasockiError::AlreadyClosing`]
    /// per the usual guards.
    pub fn stop(&mut self) -> Result<(), KasockiError> {
        self.guard_subscribed()?;
        if !self.running {
            tracing::debug!(session = %self.id, "stop on already-stopped session, ignoring");
        }
        self.running = false;
        Ok(())
    }

    /// `disconnect` handler: terminal. Idempotent — only the first call
    /// releases the broker handle; subsequent calls are silently dropped.
    ///
    /// # Errors
    ///
    /// Returns [`KasockiError::Broker`] if the broker's disconnect call
    /// fails; the session is still marked closed regardless.
    pub async fn disconnect(&mut self) -> Result<(), KasockiError> {
        if self.closing {
            return Ok(());
        }
        self.closing = true;
        self.running = false;
        self.broker.disconnect().await?;
        Ok(())
    }

    /// The one-message consume primitive shared by pull and push modes:
    /// poll, deserialize, match, return. Benign broker conditions are
    /// retried in a bounded loop with a fixed backoff; deserialization
    /// failures and filter misses are skipped; hard broker errors
    /// propagate.
    async fn consume_one(&mut self) -> Result<Option<Value>, KasockiError> {
        loop {
            if self.closing {
                return Ok(None);
            }
            match self.broker.poll().await {
                Ok(crate::broker::PollOutcome::Record(record)) => {
                    match deserialize_message(&self.deserializer, &record) {
                        Ok(message) => {
                            let matched = self.matcher.as_mut().is_none_or(|m| m.matches(&message));
                            if matched {
                                return Ok(Some(message));
                            }
                            // filter miss: advance and retry.
                        },
                        Err(error) => {
                            tracing::warn!(
                                session = %self.id,
                                topic = %record.topic,
                                partition = record.partition,
                                offset = record.offset,
                                error = %error,
                                "skipping message that failed to deserialize"
                            );
                        },
                    }
                },
                Ok(crate::broker::PollOutcome::EndOfLog | crate::broker::PollOutcome::Timeout) => {
                    tokio::time::sleep(BENIGN_RETRY_BACKOFF).await;
                },
                Err(error) => {
                    tracing::error!(session = %self.id, error = %error, "broker poll failed");
                    return Err(error.into());
                },
            }
        }
    }

    /// Drive the push-mode loop: repeatedly `consume_one`, invoking `emit`
    /// for each delivered message, until `running` goes false or the
    /// session closes. Intended to be raced against the socket's inbound
    /// event stream in a single `tokio::select!`, per the single-task-per-
    /// session concurrency model.
    ///
    /// # Errors
    ///
    /// Propagates a hard broker error from `consume_one`.
    pub async fn run_push_loop<F, Fut>(&mut self, mut emit: F) -> Result<(), KasockiError>
    where
        F: FnMut(Value) -> Fut,
        Fut: Future<Output = ()>,
    {
        while self.running && !self.closing {
            match self.consume_one().await {
                Ok(Some(message)) => emit(message).await,
                Ok(None) => break,
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }
}

/// Outcome of running a handler through [`wrap`]: either the ack value, or
/// a wire error to deliver via both the ack callback (if present) and an
/// `err` event emission.
pub enum HandlerOutcome<T> {
    /// Handler succeeded; deliver `T` via ack.
    Ack(T),
    /// Handler failed; deliver via ack failure and an `err` event.
    Err(WireError),
}

/// The handler-wrap: every socket-event handler runs through this.
/// Logs entry, bumps a per-event counter, runs `f`, and normalizes any
/// error into its wire form. Callers are responsible for actually
/// delivering the [`HandlerOutcome`] to the ack callback and/or emitting
/// the `err` event, since both are transport-specific.
pub async fn wrap<T, Fut>(session_id: &SessionId, event_name: &'static str, f: impl FnOnce() -> Fut) -> HandlerOutcome<T>
where
    Fut: Future<Output = Result<T, KasockiError>>,
{
    tracing::debug!(session = %session_id, event = event_name, "handling socket event");
    metrics::counter!("kasocki_socket_events_total", "event" => event_name).increment(1);
    match f().await {
        Ok(value) => HandlerOutcome::Ack(value),
        Err(error) => {
            tracing::warn!(session = %session_id, event = event_name, error = %error, "socket event failed");
            metrics::counter!("kasocki_socket_event_errors_total", "event" => event_name, "kind" => error.kind())
                .increment(1);
            HandlerOutcome::Err(error.to_wire(session_id))
        },
    }
}
