//! Membership View
//!
//! `GET /pods` returns the ordered snapshot the leader would hash, its digest
//! and the digest last published by the leader.

use super::state::AppState;
use crate::election::Snapshot;
use crate::membership::MembershipRecord;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::atomic::Ordering;

#[derive(Debug, Serialize)]
pub struct PodsResponse {
    pub digest: String,
    pub stamp: Option<String>,
    pub leader: bool,
    pub members: Vec<MembershipRecord>,
}

fn internal(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[tracing::instrument(skip(state))]
pub async fn get_pods(
    State(state): State<AppState>,
) -> Result<Json<PodsResponse>, (StatusCode, String)> {
    let Some(store) = state.store.as_ref() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "this node is not a coordinator".to_string(),
        ));
    };

    let nodes = store.list(&state.layout.pods_dir()).await.map_err(internal)?;
    let snapshot = Snapshot::from_nodes(&nodes);
    let digest = snapshot.digest().map_err(internal)?;
    let stamp = store
        .read(&state.layout.stamp_key())
        .await
        .map_err(internal)?
        .map(|node| node.value);

    Ok(Json(PodsResponse {
        digest,
        stamp,
        leader: state.leader.load(Ordering::Acquire),
        members: snapshot.members,
    }))
}
