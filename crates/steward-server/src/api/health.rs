//! Health Check Endpoints

use super::state::AppState;
use axum::{extract::State, http::StatusCode};
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Liveness probe. Verifies the shared store answers within 2s.
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    let Some(store) = state.store.as_ref() else {
        return Ok("OK");
    };

    match tokio::time::timeout(Duration::from_secs(2), store.status()).await {
        Ok(Ok(())) => Ok("OK"),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "store health check failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(_) => {
            tracing::warn!("store health check timed out");
            Err(StatusCode::REQUEST_TIMEOUT)
        }
    }
}

/// Readiness probe. Returns OK once every actor of this node was started.
#[tracing::instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if state.readiness.load(Ordering::Acquire) {
        Ok("READY")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
