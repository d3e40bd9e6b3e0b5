//! kasocki WebSocket server.
//!
//! Bridges a durable partitioned log to long-lived socket connections, one
//! consumer session per socket.

use axum::routing::get;
use axum::Router;
use kasocki_web::handlers::{health_check, readiness, upgrade};
use kasocki_web::{correlation_id_layer, AppState, Config};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kasocki=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting kasocki server");

    let config = Config::from_env();
    info!(
        brokers = %config.broker.brokers,
        host = %config.server.host,
        port = config.server.port,
        "configuration loaded"
    );

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.server.metrics_port))
        .install()?;
    info!(port = config.server.metrics_port, "prometheus exporter installed");

    let state = AppState::new(config.clone());

    let app = Router::new()
        .route("/ws", get(upgrade))
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness))
        .layer(correlation_id_layer())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "kasocki server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("kasocki server stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM so `axum::serve` can drain in-flight sessions
/// before the process exits.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(error = %error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(error) => tracing::error!(error = %error, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down gracefully"),
        () = terminate => info!("received SIGTERM, shutting down gracefully"),
    }
}
