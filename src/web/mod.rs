//! HTTP surface of the exporter.
//!
//! Serves the Prometheus text exposition on the configured telemetry path,
//! a small landing page and a JSON health check.

pub mod config;
pub mod handlers;
pub mod router;

// Re-export commonly used items
pub use config::WebConfig;
pub use handlers::AppState;
pub use router::create_app;

use crate::collector::CollectorRegistry;
use crate::error::{ExporterError, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Serve metrics from `registry` until `shutdown` fires.
pub async fn start_web_server(
    config: WebConfig,
    registry: Arc<CollectorRegistry>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = config.bind_address()?;
    let app = create_app(AppState::new(config.clone(), registry));

    let listener = tokio::net::TcpListener::bind(addr.as_str())
        .await
        .map_err(|e| ExporterError::web_server_error(format!("Failed to bind to {}: {}", addr, e)))?;
    let addr = listener.local_addr()?;

    info!("Listening on http://{}", addr);
    info!("Metrics available at http://{}{}", addr, config.metrics_route());

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| ExporterError::web_server_error(format!("Server error: {}", e)))?;

    Ok(())
}
