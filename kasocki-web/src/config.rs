//! Configuration for the kasocki process, loaded from environment variables.

use std::env;

use kasocki_broker::OffsetReset;

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Broker connection and session defaults.
    pub broker: BrokerConfig,
    /// HTTP/WebSocket server bind configuration.
    pub server: ServerConfig,
}

/// Broker connection configuration (`KASOCKI_BROKER_LIST`, `KASOCKI_ALLOWED_TOPICS`,
/// `KASOCKI_OFFSET_RESET`).
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Comma-separated bootstrap broker list.
    pub brokers: String,
    /// Optional allow-list restricting `availableTopics`; `None` exposes every
    /// topic in broker metadata.
    pub allowed_topics: Option<Vec<String>>,
    /// Out-of-range offset reset policy applied by each session's broker
    /// adapter.
    pub offset_reset: OffsetReset,
}

/// HTTP/WebSocket server configuration (`KASOCKI_HOST`, `KASOCKI_PORT`,
/// `KASOCKI_METRICS_PORT`).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind the WebSocket/HTTP listener to.
    pub host: String,
    /// Port to bind the WebSocket/HTTP listener to.
    pub port: u16,
    /// Port the Prometheus exporter serves `/metrics` on.
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// defaults documented on each field.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            broker: BrokerConfig {
                brokers: env::var("KASOCKI_BROKER_LIST")
                    .unwrap_or_else(|_| "localhost:9092".to_string()),
                allowed_topics: env::var("KASOCKI_ALLOWED_TOPICS").ok().map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                }),
                offset_reset: match env::var("KASOCKI_OFFSET_RESET").as_deref() {
                    Ok("earliest") => OffsetReset::Earliest,
                    _ => OffsetReset::Latest,
                },
            },
            server: ServerConfig {
                host: env::var("KASOCKI_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("KASOCKI_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(8080),
                metrics_port: env::var("KASOCKI_METRICS_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(9090),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_environment() {
        let config = Config {
            broker: BrokerConfig {
                brokers: "localhost:9092".to_string(),
                allowed_topics: None,
                offset_reset: OffsetReset::Latest,
            },
            server: ServerConfig { host: "0.0.0.0".to_string(), port: 8080, metrics_port: 9090 },
        };
        assert_eq!(config.broker.brokers, "localhost:9092");
        assert!(config.broker.allowed_topics.is_none());
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn parses_comma_separated_allow_list() {
        let raw = "orders, payments,,shipments ";
        let parsed: Vec<String> =
            raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
        assert_eq!(parsed, vec!["orders", "payments", "shipments"]);
    }
}
