//! Actor/FSM Engine
//!
//! Every long-lived component is a [`Machine`] driven by [`Actor`]. Each actor
//! owns a tokio task, an unbounded mailbox and its data. One tick drains the
//! mailbox through [`Machine::on_message`], runs [`Machine::step`] for the
//! current state and then sleeps for the delay the step returned.
//!
//! Handler errors and panics are caught by the engine and routed to
//! [`Machine::reset`]. Termination is cooperative: [`ActorHandle::terminate`]
//! cancels the actor's token, the handlers notice it through
//! [`Context::is_terminating`] and the loop exits after the next `reset`.

mod engine;
mod handle;
mod registry;
mod supervision;

pub use engine::Actor;
pub use handle::{ActorHandle, ActorRef, ShutdownError, TellError};
pub use registry::{Registry, DEFAULT_SHUTDOWN_TIMEOUT};
pub use supervision::{RestartPolicy, RestartTracker};

use crate::error::Fault;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of a state handler: the next state and how long to wait before running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S> {
    pub next: S,
    pub delay: Duration,
}

impl<S> Transition<S> {
    /// Run `next` on the following tick without sleeping.
    pub fn now(next: S) -> Self {
        Self {
            next,
            delay: Duration::ZERO,
        }
    }

    pub fn after(next: S, delay: Duration) -> Self {
        Self { next, delay }
    }

    /// Raise the delay to at least `floor`.
    pub fn at_least(mut self, floor: Duration) -> Self {
        self.delay = self.delay.max(floor);
        self
    }
}

/// Per-tick view of the engine handed to the handlers.
#[derive(Debug, Clone)]
pub struct Context {
    tag: &'static str,
    token: CancellationToken,
}

impl Context {
    pub(crate) fn new(tag: &'static str, token: CancellationToken) -> Self {
        Self { tag, token }
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// True once the owner asked the actor to stop.
    pub fn is_terminating(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Force a clean pass through `reset`.
    pub fn abort<T>(&self, reason: impl Into<String>) -> Result<T, Fault> {
        Err(Fault::Aborted(reason.into()))
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// A state machine run by the engine.
pub trait Machine: Send + 'static {
    type State: Copy + PartialEq + Debug + Display + Send + Sync + 'static;
    type Data: Send + 'static;
    type Message: Send + 'static;

    /// State entered on start and after a default `reset`.
    const INITIAL: Self::State;

    /// Short identifier used in logs and metric labels.
    fn tag(&self) -> &'static str;

    /// Handle one mailbox message. Must not block.
    fn on_message(&mut self, data: &mut Self::Data, message: Self::Message);

    /// Run the handler of `state`.
    fn step(
        &mut self,
        state: Self::State,
        data: &mut Self::Data,
        ctx: &Context,
    ) -> impl Future<Output = Result<Transition<Self::State>, Fault>> + Send;

    /// Compensate for a fault raised by `step`. The actor resumes from the returned
    /// state, or exits if it is terminating.
    fn reset(
        &mut self,
        data: &mut Self::Data,
        fault: &Fault,
        ctx: &Context,
    ) -> impl Future<Output = Transition<Self::State>> + Send {
        let _ = (data, fault, ctx);
        async { Transition::now(Self::INITIAL) }
    }
}
