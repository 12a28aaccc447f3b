use super::{report, Job, POLL};
use std::collections::VecDeque;
use steward_core::observability::metrics;
use steward_core::process::Supervised;
use steward_core::{Context, Fault, Layout, Machine, SharedStore, Transition};
use strum::Display;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CallbackState {
    Initial,
    WaitForCompletion,
}

/// One callback run requested by the leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub job: Job,
    pub digest: String,
}

#[derive(Debug)]
pub enum CallbackMessage {
    Invoke(Invocation),
}

#[derive(Debug, Default)]
pub struct CallbackData {
    fifo: VecDeque<Invocation>,
    running: Option<Supervised>,
}

/// Runs the membership callback and persists its JSON stdout as `$STATE`.
pub struct CallbackRunner {
    store: SharedStore,
    layout: Layout,
}

impl CallbackRunner {
    pub fn new(store: SharedStore, layout: Layout) -> Self {
        Self { store, layout }
    }

    /// Persisted state, only if it is valid JSON.
    async fn user_state(&self) -> Result<Option<String>, Fault> {
        let Some(node) = self.store.read(&self.layout.state_key()).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<serde_json::Value>(&node.value) {
            Ok(_) => Ok(Some(node.value)),
            Err(e) => {
                warn!(key = %node.key, error = %e, "persisted state is not valid JSON, ignored");
                Ok(None)
            }
        }
    }

    async fn initial(
        &self,
        data: &mut CallbackData,
        ctx: &Context,
    ) -> Result<Transition<CallbackState>, Fault> {
        // no new run is started once shutdown began
        if ctx.is_terminating() {
            return ctx.abort("terminating");
        }

        while let Some(head) = data.fifo.front() {
            let mut job = head.job.clone();
            let digest = head.digest.clone();
            if let Some(state) = self.user_state().await? {
                job = job.env("STATE", state);
            }

            match job.spawn() {
                Ok(child) => {
                    debug!(command = %job.command, digest = %digest, pid = ?child.pid(), "callback started");
                    data.running = Some(child);
                    return Ok(Transition::after(CallbackState::WaitForCompletion, POLL));
                }
                Err(e) => {
                    error!(command = %job.command, error = %e, "callback could not be spawned, dropped");
                    metrics::record_callback("spawn_failed");
                    data.fifo.pop_front();
                }
            }
        }

        Ok(Transition::after(CallbackState::Initial, POLL))
    }

    async fn wait_for_completion(
        &self,
        data: &mut CallbackData,
        ctx: &Context,
    ) -> Result<Transition<CallbackState>, Fault> {
        if ctx.is_terminating() {
            return ctx.abort("terminating");
        }
        let Some(child) = data.running.as_mut() else {
            return Ok(Transition::now(CallbackState::Initial));
        };
        if !child.poll()? {
            return Ok(Transition::after(CallbackState::WaitForCompletion, POLL));
        }

        let Some(child) = data.running.take() else {
            return Ok(Transition::now(CallbackState::Initial));
        };
        let captured = child.finish().await;
        let command = data
            .fifo
            .pop_front()
            .map(|invocation| invocation.job.command)
            .unwrap_or_default();
        report(self.tag(), &command, &captured);

        let stdout = captured.stdout.trim();
        match serde_json::from_str::<serde_json::Value>(stdout) {
            Ok(state) => {
                self.store
                    .write(&self.layout.state_key(), &state.to_string(), None)
                    .await?;
                info!(command = %command, "callback state persisted");
                metrics::record_callback("ok");
            }
            Err(e) => {
                warn!(command = %command, error = %e, "callback stdout is not JSON, state unchanged");
                metrics::record_callback("no_state");
            }
        }

        Ok(Transition::now(CallbackState::Initial))
    }
}

impl Machine for CallbackRunner {
    type State = CallbackState;
    type Data = CallbackData;
    type Message = CallbackMessage;

    const INITIAL: CallbackState = CallbackState::Initial;

    fn tag(&self) -> &'static str {
        "callback"
    }

    fn on_message(&mut self, data: &mut CallbackData, message: CallbackMessage) {
        match message {
            CallbackMessage::Invoke(invocation) => data.fifo.push_back(invocation),
        }
    }

    async fn step(
        &mut self,
        state: CallbackState,
        data: &mut CallbackData,
        ctx: &Context,
    ) -> Result<Transition<CallbackState>, Fault> {
        match state {
            CallbackState::Initial => self.initial(data, ctx).await,
            CallbackState::WaitForCompletion => self.wait_for_completion(data, ctx).await,
        }
    }

    async fn reset(
        &mut self,
        data: &mut CallbackData,
        _fault: &Fault,
        ctx: &Context,
    ) -> Transition<CallbackState> {
        // a run that was already started is not repeated
        if let Some(mut child) = data.running.take() {
            child.kill().await;
            let captured = child.finish().await;
            if let Some(invocation) = data.fifo.pop_front() {
                report(self.tag(), &invocation.job.command, &captured);
            }
        }
        if ctx.is_terminating() {
            for invocation in data.fifo.drain(..) {
                warn!(command = %invocation.job.command, digest = %invocation.digest, "callback dropped on shutdown");
                metrics::record_callback("dropped");
            }
        }
        Transition::now(CallbackState::Initial)
    }
}
