//! HTTP handlers for the exporter endpoints.

use crate::collector::CollectorRegistry;
use crate::error::{ExporterError, Result};
use crate::web::config::WebConfig;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
};
use prometheus::{proto::MetricFamily, Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, warn};

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<CollectorRegistry>,
    pub config: WebConfig,
    /// Bounds parallel scrapes, `None` when unlimited
    pub scrape_limit: Option<Arc<Semaphore>>,
}

impl AppState {
    pub fn new(config: WebConfig, registry: Arc<CollectorRegistry>) -> Self {
        let scrape_limit = (config.max_requests > 0)
            .then(|| Arc::new(Semaphore::new(config.max_requests)));
        Self {
            registry,
            config,
            scrape_limit,
        }
    }
}

/// Encode metric families in the Prometheus text format.
pub fn encode_text(families: &[MetricFamily]) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| ExporterError::parse_error(format!("encoded metrics: {}", e)))
}

/// Gather every collector and return the text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    let _permit = match &state.scrape_limit {
        Some(limit) => match Arc::clone(limit).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                warn!(
                    max_requests = state.config.max_requests,
                    "too many parallel scrapes, rejecting"
                );
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Too many concurrent scrape requests",
                )
                    .into_response();
            }
        },
        None => None,
    };

    let registry = Arc::clone(&state.registry);
    let gathered = tokio::task::spawn_blocking(move || encode_text(&registry.gather())).await;

    match gathered {
        Ok(Ok(body)) => (
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Ok(Err(e)) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!("Metrics gathering task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "server-exporter",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Landing page linking to the metrics.
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let collectors: String = state
        .registry
        .collector_names()
        .iter()
        .map(|name| format!("<li>{}</li>", name))
        .collect();

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Server Exporter</title></head>
<body>
<h1>Server Exporter</h1>
<p><a href="{path}">Metrics</a></p>
<h2>Collectors</h2>
<ul>{collectors}</ul>
</body>
</html>
"#,
        path = state.config.metrics_route(),
        collectors = collectors,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{IntCounter, Registry};

    #[test]
    fn test_encode_text() {
        let registry = Registry::new();
        let counter = IntCounter::new("demo_total", "Demo counter").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc();

        let text = encode_text(&registry.gather()).unwrap();
        assert!(text.contains("# TYPE demo_total counter"));
        assert!(text.contains("demo_total 1"));
    }

    #[test]
    fn test_empty_families_encode_to_nothing() {
        assert_eq!(encode_text(&[]).unwrap(), "");
    }

    #[test]
    fn test_zero_max_requests_disables_limit() {
        let registry = Arc::new(CollectorRegistry::new("test").unwrap());
        let state = AppState::new(WebConfig::default().with_max_requests(0), registry.clone());
        assert!(state.scrape_limit.is_none());

        let state = AppState::new(WebConfig::default().with_max_requests(2), registry);
        assert_eq!(
            state.scrape_limit.map(|limit| limit.available_permits()),
            Some(2)
        );
    }
}
