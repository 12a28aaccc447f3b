//! Worker role: report liveness and a payload to the coordinator.

mod keepalive;

pub use keepalive::{KeepaliveMessage, KeepaliveSender, KeepaliveState};
