//! # kasocki-core
//!
//! The per-socket consumer session at the heart of kasocki: the bridge
//! between a durable partitioned log (topics, partitions, monotonic
//! offsets) and a single long-lived bidirectional socket connection.
//!
//! This crate has no transport and no broker client of its own. It depends
//! only on the [`broker::BrokerAdapter`] trait; `kasocki-broker` supplies an
//! rdkafka-backed implementation and `kasocki-testing` an in-memory one.
//! `kasocki-web` binds one [`session::Session`] per accepted WebSocket
//! connection and drives its socket-event surface through [`session::wrap`].
//!
//! ## Modules
//!
//! - [`error`] — the error taxonomy ([`error::KasockiError`]) and its wire
//!   representation.
//! - [`assignment`] — validates and normalizes `subscribe` requests into
//!   `{topic, partition, offset}` tuples.
//! - [`matcher`] — compiles a filter map into a total predicate over
//!   decoded messages.
//! - [`message`] — the deserializer pipeline and origin-metadata envelope.
//! - [`broker`] — the broker adapter seam ([`broker::BrokerAdapter`]).
//! - [`session`] — the session state machine, the consume pipeline, and the
//!   handler-wrap.

pub mod assignment;
pub mod broker;
pub mod error;
pub mod matcher;
pub mod message;
pub mod session;

pub use error::{KasockiError, WireError};
pub use session::{wrap, HandlerOutcome, Session, SessionConfig, SessionId};
