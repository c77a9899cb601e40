pub mod health;
pub mod metrics;
pub mod probe;

use axum::{Router, http::StatusCode, routing::get};
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Routes wrapped in the HTTP middleware stack served by `main`.
pub fn app(state: AppState, request_timeout: Duration) -> Router {
    router(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// All exporter routes, without middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/probe", get(probe::probe))
        .route("/probe/workspace", get(probe::probe_workspace))
        .route("/probe/subscription", get(probe::probe_subscription))
        .route("/metrics", get(metrics::self_metrics))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .with_state(state)
}
