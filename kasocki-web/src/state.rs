//! Application state shared across all HTTP/WebSocket handlers.

use std::collections::BTreeSet;
use std::sync::Arc;

use kasocki_broker::RdKafkaBrokerAdapter;
use kasocki_core::broker::{BrokerAdapter, BrokerError};
use kasocki_core::session::SessionConfig;

use crate::config::Config;

/// Shared application state: the process configuration, plus everything a
/// newly accepted connection needs to build its own session.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
}

impl AppState {
    /// Build application state from a loaded [`Config`].
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config: Arc::new(config) }
    }

    /// The process configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build a fresh, session-scoped broker adapter. Each accepted
    /// connection gets its own adapter instance so the "no-rebalance" trick
    /// (a unique consumer group id per session) holds.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the underlying consumer
    /// cannot be constructed.
    pub fn build_broker(&self, session_id: &str) -> Result<Arc<dyn BrokerAdapter>, BrokerError> {
        let adapter = RdKafkaBrokerAdapter::builder()
            .brokers(&self.config.broker.brokers)
            .session_id(session_id)
            .offset_reset(self.config.broker.offset_reset)
            .build()?;
        Ok(Arc::new(adapter))
    }

    /// Build the [`SessionConfig`] every accepted connection is started
    /// with: the allow-list from process configuration, default matcher
    /// factory and deserializer.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            allowed_topics: self
                .config
                .broker
                .allowed_topics
                .as_ref()
                .map(|topics| topics.iter().cloned().collect::<BTreeSet<_>>()),
            ..SessionConfig::default()
        }
    }
}
