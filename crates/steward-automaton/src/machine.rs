//! Automaton Actor
//!
//! Supervises at most one script at a time. Transition requests are queued
//! in arrival order; `initial` drains invalid requests and launches the first
//! valid one, `wait_for_completion` polls the script and kills it as soon as
//! another request is queued behind it.

use crate::manifest::Graph;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use steward_core::observability::{events, metrics};
use steward_core::process::{self, Supervised};
use steward_core::{Context, Fault, Machine, Transition};
use strum::Display;
use tokio::sync::oneshot;
use tracing::{debug, warn};

const POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AutomatonState {
    Initial,
    WaitForCompletion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Ok,
    Ko,
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Ack::Ok => "OK",
            Ack::Ko => "KO",
        })
    }
}

/// A queued transition.
#[derive(Debug)]
pub struct Request {
    pub target: String,
    pub input: String,
    /// Acknowledge only once the script finished or was killed
    pub blocking: bool,
    pub reply: Option<oneshot::Sender<Ack>>,
}

impl Request {
    /// A request nobody waits on, used to trip the machine at boot.
    pub fn detached(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            input: String::new(),
            blocking: false,
            reply: None,
        }
    }

    pub fn new(target: impl Into<String>, input: impl Into<String>, blocking: bool) -> (Self, oneshot::Receiver<Ack>) {
        let (reply, receiver) = oneshot::channel();
        let request = Self {
            target: target.into(),
            input: input.into(),
            blocking,
            reply: Some(reply),
        };
        (request, receiver)
    }

    fn ack(&mut self, ack: Ack) {
        if let Some(reply) = self.reply.take() {
            // the client may be gone already
            let _ = reply.send(ack);
        }
    }
}

#[derive(Debug)]
pub enum AutomatonMessage {
    Transition(Request),
    /// Report the current state tag
    Query(oneshot::Sender<String>),
}

#[derive(Debug, Default)]
pub struct AutomatonData {
    fifo: VecDeque<Request>,
    /// Index of the current state, `None` until the first transition
    current: Option<usize>,
    running: Option<Supervised>,
}

pub struct Automaton {
    graph: Graph,
    socket: PathBuf,
}

impl Automaton {
    /// `socket` is exported to the scripts as `$SOCKET` so they can drive the machine.
    pub fn new(graph: Graph, socket: PathBuf) -> Self {
        Self { graph, socket }
    }

    async fn initial(
        &self,
        data: &mut AutomatonData,
        ctx: &Context,
    ) -> Result<Transition<AutomatonState>, Fault> {
        if ctx.is_terminating() {
            return ctx.abort("terminating");
        }

        while let Some(head) = data.fifo.front_mut() {
            let from = self.graph.node(data.current).tag.clone();
            let rejection = match self.graph.allows(data.current, &head.target) {
                Ok(index) => {
                    let to = self.graph.node(Some(index));
                    let mut command = process::shell(&to.shell);
                    command
                        .env("SOCKET", &self.socket)
                        .env("INPUT", &head.input);
                    match Supervised::spawn(command) {
                        Ok(child) => {
                            events::state_transition(&from, &to.tag, child.pid());
                            metrics::record_transition("applied");
                            data.current = Some(index);
                            data.running = Some(child);
                            if !head.blocking {
                                head.ack(Ack::Ok);
                            }
                            return Ok(Transition::after(AutomatonState::WaitForCompletion, POLL));
                        }
                        Err(e) => format!("script could not be spawned: {e}"),
                    }
                }
                Err(rejection) => rejection.to_string(),
            };

            events::transition_rejected(&from, &head.target, &rejection);
            metrics::record_transition("rejected");
            head.ack(Ack::Ko);
            data.fifo.pop_front();
        }

        Ok(Transition::after(AutomatonState::Initial, POLL))
    }

    async fn wait_for_completion(
        &self,
        data: &mut AutomatonData,
        ctx: &Context,
    ) -> Result<Transition<AutomatonState>, Fault> {
        if ctx.is_terminating() {
            return ctx.abort("terminating");
        }
        let Some(child) = data.running.as_mut() else {
            return Ok(Transition::now(AutomatonState::Initial));
        };

        let complete = child.poll()?;
        if !complete && data.fifo.len() <= 1 {
            return Ok(Transition::after(AutomatonState::WaitForCompletion, POLL));
        }
        if !complete {
            warn!(
                pid = ?child.pid(),
                pending = data.fifo.len() - 1,
                "superseded by a newer transition, killing script"
            );
            child.kill().await;
        }

        self.complete(data).await;
        Ok(Transition::now(AutomatonState::Initial))
    }

    /// Reap the running script, log its output and acknowledge its request.
    async fn complete(&self, data: &mut AutomatonData) {
        if let Some(child) = data.running.take() {
            let captured = child.finish().await;
            let outcome = if captured.killed {
                "killed"
            } else if captured.success() {
                "ok"
            } else {
                "failed"
            };
            let node = self.graph.node(data.current);
            events::script_completed(
                self.tag(),
                &node.shell,
                &captured.code_label(),
                captured.killed,
                captured.elapsed.as_millis() as u64,
            );
            metrics::record_script(self.tag(), outcome, captured.elapsed);
            let output = captured.combined();
            if !output.is_empty() {
                debug!(state = %node.tag, pid = ?captured.pid, output = %output.trim_end(), "script output");
            }
        }

        if let Some(mut request) = data.fifo.pop_front() {
            if request.blocking {
                request.ack(Ack::Ok);
            }
        }
    }
}

impl Machine for Automaton {
    type State = AutomatonState;
    type Data = AutomatonData;
    type Message = AutomatonMessage;

    const INITIAL: AutomatonState = AutomatonState::Initial;

    fn tag(&self) -> &'static str {
        "automaton"
    }

    fn on_message(&mut self, data: &mut AutomatonData, message: AutomatonMessage) {
        match message {
            AutomatonMessage::Transition(request) => data.fifo.push_back(request),
            AutomatonMessage::Query(reply) => {
                let _ = reply.send(self.graph.node(data.current).tag.clone());
            }
        }
    }

    async fn step(
        &mut self,
        state: AutomatonState,
        data: &mut AutomatonData,
        ctx: &Context,
    ) -> Result<Transition<AutomatonState>, Fault> {
        match state {
            AutomatonState::Initial => self.initial(data, ctx).await,
            AutomatonState::WaitForCompletion => self.wait_for_completion(data, ctx).await,
        }
    }

    async fn reset(
        &mut self,
        data: &mut AutomatonData,
        _fault: &Fault,
        ctx: &Context,
    ) -> Transition<AutomatonState> {
        if let Some(child) = data.running.as_mut() {
            child.kill().await;
            self.complete(data).await;
        }
        if ctx.is_terminating() {
            for mut request in data.fifo.drain(..) {
                request.ack(Ack::Ko);
            }
        }
        Transition::now(AutomatonState::Initial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;
    use steward_core::{Actor, ActorRef};
    use tokio::time::Instant;

    fn start(manifest: &str) -> ActorRef<AutomatonMessage> {
        let graph = Manifest::parse(manifest).unwrap().validate().unwrap();
        Actor::start(Automaton::new(graph, PathBuf::from("/tmp/automaton.sock")))
    }

    fn transition(
        automaton: &ActorRef<AutomatonMessage>,
        target: &str,
        blocking: bool,
    ) -> oneshot::Receiver<Ack> {
        let (request, reply) = Request::new(target, "", blocking);
        automaton.tell(AutomatonMessage::Transition(request)).unwrap();
        reply
    }

    async fn state(automaton: &ActorRef<AutomatonMessage>) -> String {
        let (reply, receiver) = oneshot::channel();
        automaton.tell(AutomatonMessage::Query(reply)).unwrap();
        receiver.await.unwrap()
    }

    const IDLE_RUN: &str = r#"
initial: idle
states:
  - tag: idle
    shell: "true"
    next: [run]
  - tag: run
    shell: "sleep 5; echo done"
    next: [idle]
"#;

    #[tokio::test]
    async fn test_wait_supersedes_running_script() {
        let automaton = start(IDLE_RUN);
        assert_eq!(state(&automaton).await, "idle");
        automaton
            .tell(AutomatonMessage::Transition(Request::detached("idle")))
            .unwrap();

        let started = Instant::now();
        let goto = transition(&automaton, "run", false);
        let wait = transition(&automaton, "idle", true);

        assert_eq!(goto.await.unwrap(), Ack::Ok);
        assert_eq!(wait.await.unwrap(), Ack::Ok);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(state(&automaton).await, "idle");

        automaton.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_fifo_drains_invalid_and_superseded_requests() {
        let automaton = start(
            r#"
initial: start
states:
  - tag: start
    shell: "true"
    next: ["b*", "c*"]
  - tag: a
    shell: "true"
  - tag: b
    shell: "sleep 5"
    next: [c]
  - tag: c
    shell: "echo c"
"#,
        );
        automaton
            .tell(AutomatonMessage::Transition(Request::detached("start")))
            .unwrap();

        let started = Instant::now();
        let a = transition(&automaton, "a", true);
        let b = transition(&automaton, "b", true);
        let c = transition(&automaton, "c", true);

        assert_eq!(a.await.unwrap(), Ack::Ko);
        assert_eq!(b.await.unwrap(), Ack::Ok);
        assert_eq!(c.await.unwrap(), Ack::Ok);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(state(&automaton).await, "c");

        automaton.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejections_keep_current_state() {
        let automaton = start(IDLE_RUN);
        assert_eq!(transition(&automaton, "idle", true).await.unwrap(), Ack::Ok);
        assert_eq!(transition(&automaton, "missing", true).await.unwrap(), Ack::Ko);
        assert_eq!(transition(&automaton, "idle", false).await.unwrap(), Ack::Ko);
        assert_eq!(state(&automaton).await, "idle");
        automaton.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_script_environment() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let manifest = format!(
            "initial: write\nstates:\n  - tag: write\n    shell: 'printf \"%s|%s\" \"$SOCKET\" \"$INPUT\" > {}'\n",
            out.display()
        );
        let automaton = start(&manifest);
        let (request, reply) = Request::new("write", "hello world", true);
        automaton.tell(AutomatonMessage::Transition(request)).unwrap();
        assert_eq!(reply.await.unwrap(), Ack::Ok);
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "/tmp/automaton.sock|hello world"
        );
        automaton.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_kills_running_script() {
        let automaton = start(IDLE_RUN);
        let blocking = transition(&automaton, "run", true);
        tokio::time::sleep(Duration::from_millis(300)).await;
        let started = Instant::now();
        automaton.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        // the running request completes when its script is killed
        assert_eq!(blocking.await.unwrap(), Ack::Ok);
    }
}
