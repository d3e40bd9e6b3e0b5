//! # kasocki-testing
//!
//! Test-only collaborators for exercising `kasocki-core` without a live
//! broker or socket transport: an in-memory [`BrokerAdapter`] implementation
//! and builders for seeding topics, partitions, and records.
//!
//! [`BrokerAdapter`]: kasocki_core::broker::BrokerAdapter

pub mod generators;
pub mod in_memory_broker;

pub use in_memory_broker::{InMemoryBroker, InMemoryBrokerBuilder, OffsetReset};
