//! Observability Module
//!
//! - `metrics`: Prometheus metrics for actors, election, membership and scripts
//! - `events`: Structured event logging with consistent fields
//! - `tracing`: Subscriber setup with optional OpenTelemetry export

pub mod events;
pub mod metrics;
pub mod tracing;

pub use self::metrics::{init_metrics, MetricsState};
pub use self::tracing::{init_tracing, shutdown_tracing, TracingConfig};
