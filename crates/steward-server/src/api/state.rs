//! Application State
//!
//! Shared state passed to all API handlers.

use crate::membership::MembershipMessage;
use crate::scripts::ScriptMessage;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use steward_core::observability::MetricsState;
use steward_core::{ActorRef, Layout, SharedStore};

#[derive(Clone)]
pub struct AppState {
    /// Absent on a worker-only node
    pub store: Option<SharedStore>,
    pub layout: Layout,
    pub membership: Option<ActorRef<MembershipMessage>>,
    pub scripts: ActorRef<ScriptMessage>,
    /// How long an HTTP caller waits for a script
    pub action_timeout: Duration,
    pub readiness: Arc<AtomicBool>,
    pub leader: Arc<AtomicBool>,
    pub metrics_state: Option<MetricsState>,
}
