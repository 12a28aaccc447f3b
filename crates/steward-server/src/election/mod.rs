//! Leadership and change detection
//!
//! Coordinator replicas race for the lowest lock key; the winner snapshots the
//! membership directory every cycle, debounces digest changes and hands the
//! snapshot to the callback runner.

mod detector;
mod leader;
mod snapshot;

pub use detector::{ChangeDetector, Dispatch};
pub use leader::{ElectionData, ElectionMessage, ElectionState, LeaderElector};
pub use snapshot::Snapshot;
