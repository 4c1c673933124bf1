//! Web application router and middleware setup.

use crate::web::handlers::{self, AppState};
use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Create the axum application with all routes and middleware.
pub fn create_app(state: AppState) -> Router {
    let metrics_route = state.config.metrics_route();

    let mut app = Router::new()
        .route(&metrics_route, get(handlers::metrics))
        .route("/api/health", get(handlers::health_check));

    // Metrics may be served from the root itself.
    if metrics_route != "/" {
        app = app.route("/", get(handlers::index));
    }

    app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectorRegistry;
    use crate::web::WebConfig;
    use std::sync::Arc;

    #[test]
    fn test_metrics_at_root_does_not_clash_with_index() {
        let registry = Arc::new(CollectorRegistry::new("test").unwrap());
        let state = AppState::new(WebConfig::default().with_telemetry_path("/"), registry);
        let _app = create_app(state);
    }
}
