use axum::{
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};

use crate::AppState;
use crate::exposition;

/// The exporter's own metrics.
pub async fn self_metrics(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let body = state.metrics.encode().map_err(|e| {
        tracing::error!("unable to encode self metrics: {e}");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(([(header::CONTENT_TYPE, exposition::content_type())], body))
}
