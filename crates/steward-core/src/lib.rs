//! Steward Core Library
//!
//! The actor/FSM engine, the shared-store abstraction and the observability
//! setup used by the coordinator, the worker and the automaton.

pub mod error;
pub mod fsm;
pub mod observability;
pub mod process;
pub mod signals;
pub mod store;

pub use error::Fault;
pub use fsm::{Actor, ActorHandle, ActorRef, Context, Machine, Registry, Transition};
pub use store::{Layout, SharedStore, Store, StoreError};
