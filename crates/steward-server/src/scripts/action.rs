use super::{report, Job, POLL};
use std::collections::VecDeque;
use steward_core::process::Supervised;
use steward_core::{Context, Fault, Machine, Transition};
use strum::Display;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ScriptState {
    Initial,
    WaitForCompletion,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("command could not be spawned: {0}")]
    Spawn(String),

    #[error("script runner is shutting down")]
    Terminated,
}

/// A command requested over HTTP, answered through `reply`.
#[derive(Debug)]
pub struct ScriptRequest {
    pub job: Job,
    pub reply: oneshot::Sender<Result<String, ScriptError>>,
}

impl ScriptRequest {
    /// Build a request and the receiver its caller waits on.
    pub fn new(job: Job) -> (Self, oneshot::Receiver<Result<String, ScriptError>>) {
        let (reply, receiver) = oneshot::channel();
        (Self { job, reply }, receiver)
    }
}

#[derive(Debug)]
pub enum ScriptMessage {
    Invoke(ScriptRequest),
}

#[derive(Debug, Default)]
pub struct ScriptData {
    fifo: VecDeque<ScriptRequest>,
    running: Option<Supervised>,
}

impl ScriptData {
    fn answer(&mut self, result: Result<String, ScriptError>) -> Option<String> {
        let request = self.fifo.pop_front()?;
        // the caller may have timed out already
        let _ = request.reply.send(result);
        Some(request.job.command)
    }
}

/// Runs HTTP-requested commands one at a time and replies with their stdout.
#[derive(Debug, Default)]
pub struct ScriptRunner;

impl ScriptRunner {
    async fn initial(
        &self,
        data: &mut ScriptData,
        ctx: &Context,
    ) -> Result<Transition<ScriptState>, Fault> {
        if ctx.is_terminating() {
            return ctx.abort("terminating");
        }

        while let Some(head) = data.fifo.front() {
            match head.job.spawn() {
                Ok(child) => {
                    debug!(command = %head.job.command, pid = ?child.pid(), "script started");
                    data.running = Some(child);
                    return Ok(Transition::after(ScriptState::WaitForCompletion, POLL));
                }
                Err(e) => {
                    warn!(command = %head.job.command, error = %e, "script could not be spawned");
                    data.answer(Err(ScriptError::Spawn(e.to_string())));
                }
            }
        }

        Ok(Transition::after(ScriptState::Initial, POLL))
    }

    async fn wait_for_completion(
        &self,
        data: &mut ScriptData,
        ctx: &Context,
    ) -> Result<Transition<ScriptState>, Fault> {
        if ctx.is_terminating() {
            return ctx.abort("terminating");
        }
        let Some(child) = data.running.as_mut() else {
            return Ok(Transition::now(ScriptState::Initial));
        };
        if !child.poll()? {
            return Ok(Transition::after(ScriptState::WaitForCompletion, POLL));
        }

        let Some(child) = data.running.take() else {
            return Ok(Transition::now(ScriptState::Initial));
        };
        let captured = child.finish().await;
        let stdout = captured.stdout.trim_end_matches('\n').to_string();
        if let Some(command) = data.answer(Ok(stdout)) {
            report(self.tag(), &command, &captured);
        }
        Ok(Transition::now(ScriptState::Initial))
    }
}

impl Machine for ScriptRunner {
    type State = ScriptState;
    type Data = ScriptData;
    type Message = ScriptMessage;

    const INITIAL: ScriptState = ScriptState::Initial;

    fn tag(&self) -> &'static str {
        "script"
    }

    fn on_message(&mut self, data: &mut ScriptData, message: ScriptMessage) {
        match message {
            ScriptMessage::Invoke(request) => data.fifo.push_back(request),
        }
    }

    async fn step(
        &mut self,
        state: ScriptState,
        data: &mut ScriptData,
        ctx: &Context,
    ) -> Result<Transition<ScriptState>, Fault> {
        match state {
            ScriptState::Initial => self.initial(data, ctx).await,
            ScriptState::WaitForCompletion => self.wait_for_completion(data, ctx).await,
        }
    }

    async fn reset(
        &mut self,
        data: &mut ScriptData,
        _fault: &Fault,
        ctx: &Context,
    ) -> Transition<ScriptState> {
        if let Some(mut child) = data.running.take() {
            child.kill().await;
            let captured = child.finish().await;
            if let Some(command) = data.answer(Err(ScriptError::Terminated)) {
                report(self.tag(), &command, &captured);
            }
        }
        if ctx.is_terminating() {
            while data.answer(Err(ScriptError::Terminated)).is_some() {}
        }
        Transition::now(ScriptState::Initial)
    }
}
