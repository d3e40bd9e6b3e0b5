//! HTTP/WebSocket transport for kasocki: accepts connections, upgrades them
//! to the session protocol, and bootstraps process-wide concerns (config,
//! health, correlation ids) around it.
//!
//! # Request flow
//!
//! 1. A client opens `GET /ws` and is upgraded to a WebSocket.
//! 2. [`handlers::websocket::upgrade`] builds a broker adapter and a
//!    [`kasocki_core::session::Session`] scoped to that one connection.
//! 3. The connection's single task drives the session: client events in,
//!    `ready`/`ack`/`err`/`message` events out, until the socket closes.
//!
//! `GET /health` and `GET /health/ready` give load balancers and deploy
//! tooling a plain-HTTP view of the same broker reachability a socket
//! connection depends on.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod state;

// Re-export key types for convenience
pub use config::Config;
pub use middleware::{correlation_id_layer, CorrelationIdExt, CORRELATION_ID_HEADER};
pub use state::AppState;
