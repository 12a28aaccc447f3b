//! Prometheus Metrics
//!
//! Metrics tracked:
//! - `steward_actor_count` - gauge of running actors by tag
//! - `steward_actor_resets_total` - counter of handler faults by tag
//! - `steward_leadership_changes_total` - counter of acquired/lost leadership
//! - `steward_is_leader` - 1 while this replica holds the lowest lock key
//! - `steward_membership_writes_total` - counter of membership records written
//! - `steward_sequence_cas_retries_total` - counter of lost sequence CAS races
//! - `steward_callbacks_total` - counter of callback runs by outcome
//! - `steward_scripts_total` - counter of supervised scripts by actor and outcome
//! - `steward_script_duration_seconds` - histogram of script wall time
//! - `steward_transitions_total` - counter of automaton transitions by outcome
//!
//! Without an installed recorder every function here is a no-op.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// State containing the Prometheus handle for metrics export
#[derive(Clone)]
pub struct MetricsState {
    pub prometheus_handle: PrometheusHandle,
}

impl MetricsState {
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

/// Install the Prometheus recorder and describe every metric.
pub fn init_metrics() -> Result<MetricsState, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metric_descriptions();
    Ok(MetricsState {
        prometheus_handle: handle,
    })
}

fn register_metric_descriptions() {
    describe_gauge!("steward_actor_count", "Number of running actors by tag");
    describe_counter!(
        "steward_actor_resets_total",
        "Total number of handler faults routed through reset"
    );

    describe_counter!(
        "steward_leadership_changes_total",
        "Total number of leadership acquisitions and losses"
    );
    describe_gauge!("steward_is_leader", "Whether this replica is the leader");
    describe_counter!(
        "steward_membership_writes_total",
        "Total number of membership records written"
    );
    describe_counter!(
        "steward_sequence_cas_retries_total",
        "Total number of sequence compare-and-swap races lost"
    );

    describe_counter!(
        "steward_callbacks_total",
        "Total number of callback invocations by outcome"
    );
    describe_counter!(
        "steward_scripts_total",
        "Total number of supervised scripts by actor and outcome"
    );
    describe_histogram!(
        "steward_script_duration_seconds",
        "Wall time of supervised scripts in seconds"
    );
    describe_counter!(
        "steward_transitions_total",
        "Total number of automaton transition requests by outcome"
    );
}

pub fn actor_started(tag: &str) {
    gauge!("steward_actor_count", "tag" => tag.to_string()).increment(1.0);
}

pub fn actor_stopped(tag: &str) {
    gauge!("steward_actor_count", "tag" => tag.to_string()).decrement(1.0);
}

pub fn record_actor_reset(tag: &str) {
    counter!("steward_actor_resets_total", "tag" => tag.to_string()).increment(1);
}

pub fn record_leadership(acquired: bool) {
    let event = if acquired { "acquired" } else { "lost" };
    counter!("steward_leadership_changes_total", "event" => event).increment(1);
    gauge!("steward_is_leader").set(if acquired { 1.0 } else { 0.0 });
}

pub fn record_membership_write() {
    counter!("steward_membership_writes_total").increment(1);
}

pub fn record_sequence_retry() {
    counter!("steward_sequence_cas_retries_total").increment(1);
}

pub fn record_callback(outcome: &str) {
    counter!("steward_callbacks_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_script(actor: &str, outcome: &str, duration: Duration) {
    counter!(
        "steward_scripts_total",
        "actor" => actor.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("steward_script_duration_seconds", "actor" => actor.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_transition(outcome: &str) {
    counter!("steward_transitions_total", "outcome" => outcome.to_string()).increment(1);
}
