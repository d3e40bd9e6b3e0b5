//! Health check endpoints.
//!
//! Used by load balancers and monitoring systems to verify service health.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

/// Simple liveness check: the process is running.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness body reporting whether the broker is reachable and, if so,
/// the topics/partitions it currently advertises.
#[derive(Debug, Serialize)]
pub struct ReadinessReport {
    /// Whether the broker metadata call succeeded.
    ready: bool,
    /// Topic name to partition ids, present only when `ready`.
    #[serde(skip_serializing_if = "Option::is_none")]
    topics: Option<std::collections::BTreeMap<String, Vec<i32>>>,
    /// Failure message, present only when not `ready`.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Readiness check: builds a throwaway broker adapter and fetches metadata
/// from it. Exposes the same topic/partition listing as the `ready`
/// socket event, over plain HTTP, for use by load balancers and
/// orchestrators that can't speak the WebSocket protocol.
///
/// # Endpoint
///
/// ```text
/// GET /health/ready
/// ```
///
/// # Status Codes
///
/// - 200 OK: broker reachable, metadata attached
/// - 503 Service Unavailable: broker unreachable
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessReport>) {
    let probe = match state.build_broker("health-probe") {
        Ok(broker) => broker.metadata().await,
        Err(error) => Err(error),
    };
    match probe {
        Ok(metadata) => {
            (StatusCode::OK, Json(ReadinessReport { ready: true, topics: Some(metadata.topics), error: None }))
        },
        Err(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessReport { ready: false, topics: None, error: Some(error.to_string()) }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simple_health_check_is_always_ok() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
