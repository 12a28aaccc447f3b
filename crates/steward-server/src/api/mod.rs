//! HTTP API Module
//!
//! The HTTP boundary of a steward node. Handlers only adapt requests into actor
//! messages and wait, bounded, on the replies.
//!
//! This module contains:
//! - `state`: Shared application state
//! - `health`: Liveness and readiness probes
//! - `metrics`: Prometheus metrics endpoint
//! - `ping`: Worker keepalives
//! - `scripts`: On-demand script execution
//! - `pods`: Current membership snapshot
//! - `version`: Build metadata

mod health;
mod metrics;
mod ping;
mod pods;
mod scripts;
mod state;
mod version;

pub use state::AppState;

use axum::{
    routing::{get, put},
    Router,
};

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Observability
        .route("/metrics", get(metrics::get_metrics))
        .route("/version", get(version::get_version))
        // Membership
        .route("/ping", put(ping::put_ping))
        .route("/pods", get(pods::get_pods))
        // Scripts
        .route("/script", put(scripts::put_script))
        .route("/action/{key}", put(scripts::put_action))
        .with_state(state)
}
