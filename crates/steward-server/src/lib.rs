//! Steward Server Library
//!
//! Coordinator and worker roles: keepalive membership with stable sequence
//! numbers, leader election over the shared store, debounced change detection
//! and the callback and script runners, all exposed over HTTP.

pub mod api;
pub mod config;
pub mod election;
pub mod membership;
pub mod node;
pub mod scripts;
pub mod version;
pub mod worker;
