use super::handle::{ActorHandle, ActorRef};
use super::supervision::{RestartPolicy, RestartTracker};
use super::{Context, Machine, Transition};
use crate::error::Fault;
use crate::observability::{events, metrics};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

/// Builder for a running actor.
pub struct Actor<M: Machine> {
    machine: M,
    state: M::State,
    data: M::Data,
    policy: RestartPolicy,
}

impl<M: Machine> Actor<M> {
    pub fn new(machine: M, data: M::Data) -> Self {
        Self {
            machine,
            state: M::INITIAL,
            data,
            policy: RestartPolicy::default(),
        }
    }

    pub fn state(mut self, state: M::State) -> Self {
        self.state = state;
        self
    }

    pub fn policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Spawn the actor loop on the current tokio runtime.
    pub fn spawn(self) -> ActorRef<M::Message> {
        let tag = self.machine.tag();
        let token = CancellationToken::new();
        let (sender, mailbox) = mpsc::unbounded_channel();
        let ctx = Context::new(tag, token.clone());

        let task = tokio::spawn(run(
            self.machine,
            self.state,
            self.data,
            mailbox,
            ctx,
            self.policy,
        ));

        ActorRef::new(sender, ActorHandle::new(tag, token, task))
    }
}

impl<M: Machine> Actor<M>
where
    M::Data: Default,
{
    /// Start `machine` from its initial state with default data.
    pub fn start(machine: M) -> ActorRef<M::Message> {
        Actor::new(machine, M::Data::default()).spawn()
    }
}

impl<M: Machine> Actor<M> {
    pub fn start_at(machine: M, state: M::State, data: M::Data) -> ActorRef<M::Message> {
        Actor::new(machine, data).state(state).spawn()
    }
}

async fn run<M: Machine>(
    mut machine: M,
    mut state: M::State,
    mut data: M::Data,
    mut mailbox: mpsc::UnboundedReceiver<M::Message>,
    ctx: Context,
    policy: RestartPolicy,
) {
    let tag = ctx.tag();
    let mut tracker = RestartTracker::new(policy);

    events::actor_started(tag, &state.to_string());
    metrics::actor_started(tag);

    loop {
        while let Ok(message) = mailbox.try_recv() {
            machine.on_message(&mut data, message);
        }

        let outcome = AssertUnwindSafe(machine.step(state, &mut data, &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Fault::Panic(panic_message(panic))));

        let transition = match outcome {
            Ok(transition) => {
                tracker.reset();
                transition
            }
            Err(fault) => {
                let terminating = ctx.is_terminating();
                events::actor_reset(tag, &state.to_string(), &fault, terminating);
                metrics::record_actor_reset(tag);

                let transition = AssertUnwindSafe(machine.reset(&mut data, &fault, &ctx))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        error!(
                            tag = %tag,
                            error = %panic_message(panic),
                            "reset handler panicked"
                        );
                        Transition::now(M::INITIAL)
                    });

                if ctx.is_terminating() {
                    break;
                }
                if fault.is_abort() {
                    transition
                } else {
                    transition.at_least(tracker.record_fault())
                }
            }
        };

        if transition.next != state {
            trace!(tag = %tag, from = %state, to = %transition.next, "state change");
        }
        state = transition.next;

        if transition.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = tokio::time::sleep(transition.delay) => {}
                _ = ctx.token().cancelled() => {}
            }
        }
    }

    events::actor_stopped(tag, &state.to_string());
    metrics::actor_stopped(tag);
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
