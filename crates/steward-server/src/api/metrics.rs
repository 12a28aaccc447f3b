//! Prometheus Metrics Endpoint

use super::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse};

/// GET /metrics - Prometheus exposition format
#[tracing::instrument(skip(state))]
pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics_state {
        Some(metrics) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            metrics.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("content-type", "text/plain; charset=utf-8")],
            "Metrics not initialized".to_string(),
        ),
    }
}
