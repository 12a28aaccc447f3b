//! Structured Events
//!
//! One function per lifecycle event so field names stay consistent across
//! the coordinator, the worker and the automaton.
//!
//! Event types:
//! - `actor_started` / `actor_stopped` - Actor lifecycle
//! - `actor_reset` - Handler fault routed through `reset`
//! - `leadership_acquired` / `leadership_lost` - Leader election
//! - `membership_changed` - New snapshot digest observed
//! - `callback_dispatched` - Callback invocation sent to the runner
//! - `script_completed` - A supervised script finished or was killed
//! - `state_transition` / `transition_rejected` - Automaton transitions
//! - `sequence_assigned` - First sighting of an entity

use crate::error::Fault;
use tracing::{debug, info, warn};

pub fn actor_started(tag: &str, state: &str) {
    debug!(
        event_type = "actor_started",
        tag = %tag,
        state = %state,
        "Actor started"
    );
}

pub fn actor_stopped(tag: &str, state: &str) {
    info!(
        event_type = "actor_stopped",
        tag = %tag,
        state = %state,
        "Actor stopped"
    );
}

/// Emit an actor reset event. Deliberate aborts are logged at info.
pub fn actor_reset(tag: &str, state: &str, fault: &Fault, terminating: bool) {
    if fault.is_abort() {
        info!(
            event_type = "actor_reset",
            tag = %tag,
            state = %state,
            reason = %fault,
            terminating = terminating,
            "Actor aborted"
        );
    } else {
        warn!(
            event_type = "actor_reset",
            tag = %tag,
            state = %state,
            error = %fault,
            terminating = terminating,
            "Actor fault, resetting"
        );
    }
}

pub fn leadership_acquired(group: &str, lock_key: &str) {
    info!(
        event_type = "leadership_acquired",
        group = %group,
        lock_key = %lock_key,
        "Leadership acquired"
    );
}

pub fn leadership_lost(group: &str, lock_key: &str, reason: &str) {
    warn!(
        event_type = "leadership_lost",
        group = %group,
        lock_key = %lock_key,
        reason = %reason,
        "Leadership lost"
    );
}

pub fn membership_changed(group: &str, digest: &str, members: usize) {
    info!(
        event_type = "membership_changed",
        group = %group,
        digest = %digest,
        members = members,
        "Membership changed"
    );
}

pub fn callback_dispatched(group: &str, command: &str, digest: &str) {
    info!(
        event_type = "callback_dispatched",
        group = %group,
        command = %command,
        digest = %digest,
        "Callback dispatched"
    );
}

pub fn script_completed(tag: &str, command: &str, code: &str, killed: bool, elapsed_ms: u64) {
    info!(
        event_type = "script_completed",
        tag = %tag,
        command = %command,
        code = %code,
        killed = killed,
        elapsed_ms = elapsed_ms,
        "Script completed"
    );
}

pub fn state_transition(from: &str, to: &str, pid: Option<u32>) {
    info!(
        event_type = "state_transition",
        from = %from,
        to = %to,
        pid = ?pid,
        "State transition"
    );
}

pub fn transition_rejected(from: &str, to: &str, reason: &str) {
    warn!(
        event_type = "transition_rejected",
        from = %from,
        to = %to,
        reason = %reason,
        "Transition rejected"
    );
}

pub fn sequence_assigned(group: &str, entity: &str, seq: i64) {
    info!(
        event_type = "sequence_assigned",
        group = %group,
        entity = %entity,
        seq = seq,
        "Sequence assigned"
    );
}
