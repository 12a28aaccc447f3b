//! Steward Automaton
//!
//! A script-driven state machine. States and their allowed transitions come
//! from a YAML manifest; transitions are requested over a unix socket and each
//! one runs the target state's shell snippet, killing the previous one if it is
//! still running.

pub mod command;
pub mod control;
pub mod machine;
pub mod manifest;

pub use command::{Command, ProtocolError};
pub use control::{send, ControlServer};
pub use machine::{Ack, Automaton, AutomatonMessage, AutomatonState, Request};
pub use manifest::{Graph, Manifest, ManifestError, Rejection, StateNode};
