//! Keepalive Endpoint
//!
//! `PUT /ping` adapts a worker's keepalive into a message for the membership
//! writer. The write itself happens asynchronously.

use super::state::AppState;
use crate::membership::{Keepalive, MembershipMessage};
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub key: String,
}

pub async fn put_ping(
    State(state): State<AppState>,
    Json(keepalive): Json<Keepalive>,
) -> Result<Json<PingResponse>, (StatusCode, String)> {
    let Some(membership) = state.membership.as_ref() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "this node is not a coordinator".to_string(),
        ));
    };
    let Some(key) = keepalive.entity_key() else {
        return Err((
            StatusCode::BAD_REQUEST,
            "keepalive needs one of key, ip or id".to_string(),
        ));
    };

    tracing::trace!(key = %key, role = %keepalive.role, "keepalive received");
    membership
        .tell(MembershipMessage::Update(keepalive))
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(PingResponse { key }))
}
