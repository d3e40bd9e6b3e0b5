//! Error taxonomy for session operations and their wire representation.
//!
//! [`KasockiError`] is the single error type returned by every session
//! operation (subscribe/filter/consume/start/stop). It carries enough
//! structured context to be logged usefully and to be turned into the
//! `err` socket event's wire shape via [`KasockiError::to_wire`].

use serde::Serialize;
use thiserror::Error;

use crate::SessionId;

/// Errors produced by session operations.
#[derive(Error, Debug, Clone)]
pub enum KasockiError {
    /// `subscribe` was called with a malformed or mixed-form assignment list.
    #[error("invalid assignment: {0}")]
    InvalidAssignment(String),

    /// A requested topic is not present in the broker's metadata, or is not
    /// in the configured allow-list.
    #[error("topic not available: {0}")]
    TopicNotAvailable(String),

    /// `subscribe` was called on a session that has already subscribed.
    #[error("session is already subscribed")]
    AlreadySubscribed,

    /// An operation that requires a subscription (`filter`, `consume`,
    /// `start`, `stop`) was called before `subscribe`.
    #[error("session is not subscribed")]
    NotSubscribed,

    /// `start` was called on a session whose consume loop is already running.
    #[error("session is already started")]
    AlreadyStarted,

    /// An operation was attempted on a session that is already closing.
    #[error("session is already closing")]
    AlreadyClosing,

    /// `filter` was called with a spec that failed to compile (bad regex
    /// literal, unknown criterion shape, or a pattern rejected by the
    /// catastrophic-backtracking safety check).
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// The deserializer hook failed to parse a broker record.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Broker adapter reported a hard failure (not end-of-log/timeout).
    #[error("broker error: {0}")]
    Broker(String),

    /// Catch-all for failures that don't fit a named variant above.
    #[error("kasocki error: {0}")]
    Kasocki(String),
}

impl KasockiError {
    /// Stable machine-readable name for this error kind, used as the wire
    /// event's `name` field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAssignment(_) => "InvalidAssignment",
            Self::TopicNotAvailable(_) => "TopicNotAvailable",
            Self::AlreadySubscribed => "AlreadySubscribed",
            Self::NotSubscribed => "NotSubscribed",
            Self::AlreadyStarted => "AlreadyStarted",
            Self::AlreadyClosing => "AlreadyClosing",
            Self::InvalidFilter(_) => "InvalidFilter",
            Self::Deserialization(_) => "Deserialization",
            Self::Broker(_) => "Broker",
            Self::Kasocki(_) => "Kasocki",
        }
    }

    /// Build the wire representation of this error for the given session,
    /// attaching kind-specific context where the variant carries any (the
    /// offending topic, the rejected assignment/filter/payload detail).
    #[must_use]
    pub fn to_wire(&self, socket: &SessionId) -> WireError {
        WireError {
            name: self.kind(),
            message: self.to_string(),
            socket: socket.to_string(),
            context: self.context(),
        }
    }

    /// Kind-specific context for the wire error: the raw offending value,
    /// separate from [`kind`](Self::kind)'s stable name and the
    /// human-readable `message`, so a client can act on it without parsing
    /// the message string.
    fn context(&self) -> Option<String> {
        match self {
            Self::TopicNotAvailable(topic) => Some(topic.clone()),
            Self::InvalidAssignment(detail)
            | Self::InvalidFilter(detail)
            | Self::Deserialization(detail)
            | Self::Broker(detail)
            | Self::Kasocki(detail) => Some(detail.clone()),
            Self::AlreadySubscribed | Self::NotSubscribed | Self::AlreadyStarted | Self::AlreadyClosing => {
                None
            },
        }
    }
}

/// Serializable shape for the socket `err` event, per the external wire
/// format. `thiserror`'s `Display` impl alone doesn't carry `socket` or
/// `context`, so this is a distinct type rather than a derive on
/// [`KasockiError`] itself.
#[derive(Debug, Clone, Serialize)]
pub struct WireError {
    /// Stable error kind name (matches [`KasockiError::kind`]).
    pub name: &'static str,
    /// Human-readable message.
    pub message: String,
    /// The session (socket connection id) this error originated from.
    pub socket: String,
    /// Optional extra context (offending field, topic, pattern, etc).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_not_available_attaches_topic_as_context() {
        let error = KasockiError::TopicNotAvailable("kasocki_test_99".to_string());
        let wire = error.to_wire(&SessionId::new("s1"));
        assert_eq!(wire.name, "TopicNotAvailable");
        assert_eq!(wire.context.as_deref(), Some("kasocki_test_99"));
    }

    #[test]
    fn already_closing_has_no_context() {
        let error = KasockiError::AlreadyClosing;
        let wire = error.to_wire(&SessionId::new("s1"));
        assert_eq!(wire.context, None);
    }
}
