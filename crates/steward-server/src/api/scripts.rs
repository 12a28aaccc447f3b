//! Script Endpoints
//!
//! - `PUT /script`: `{"cmd": "...", "input": ...}`, run through `sh -c`
//! - `PUT /action/{key}`: the key is the command line, the raw body is `$INPUT`
//!
//! Both queue a request on the script runner and wait for its stdout, at most
//! `action_timeout`.

use super::state::AppState;
use crate::scripts::{Job, ScriptError, ScriptMessage, ScriptRequest};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct ScriptBody {
    pub cmd: String,
    #[serde(default)]
    pub input: Option<Value>,
}

pub async fn put_script(
    State(state): State<AppState>,
    Json(body): Json<ScriptBody>,
) -> Result<String, (StatusCode, String)> {
    if body.cmd.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "cmd must not be empty".to_string()));
    }
    let mut job = Job::shell(body.cmd);
    match body.input {
        None | Some(Value::Null) => {}
        Some(Value::String(input)) => job = job.env("INPUT", input),
        Some(other) => job = job.env("INPUT", other.to_string()),
    }
    run(&state, job).await
}

pub async fn put_action(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: String,
) -> Result<String, (StatusCode, String)> {
    run(&state, Job::exec(key).env("INPUT", body)).await
}

async fn run(state: &AppState, job: Job) -> Result<String, (StatusCode, String)> {
    let command = job.command.clone();
    let (request, reply) = ScriptRequest::new(job);
    state
        .scripts
        .tell(ScriptMessage::Invoke(request))
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    match tokio::time::timeout(state.action_timeout, reply).await {
        Ok(Ok(Ok(stdout))) => Ok(stdout),
        Ok(Ok(Err(e @ ScriptError::Spawn(_)))) => {
            tracing::warn!(command = %command, error = %e, "script failed to start");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
        Ok(Ok(Err(e @ ScriptError::Terminated))) => Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string())),
        Ok(Err(_)) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "script runner dropped the request".to_string(),
        )),
        Err(_) => {
            tracing::warn!(command = %command, timeout = ?state.action_timeout, "script timed out");
            Err((
                StatusCode::GATEWAY_TIMEOUT,
                format!("no result within {:?}", state.action_timeout),
            ))
        }
    }
}
