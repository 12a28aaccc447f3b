//! Script Runners
//!
//! Two actors supervise external commands, one child at a time, polled across
//! ticks:
//! - `callback`: run by the leader whenever the membership digest changes;
//!   its stdout round-trips into the shared store as the next `$STATE`
//! - `action`: commands requested over HTTP, the caller waits on a one-shot
//!   reply carrying the child's stdout

mod action;
mod callback;

pub use action::{ScriptError, ScriptMessage, ScriptRequest, ScriptRunner};
pub use callback::{CallbackMessage, CallbackRunner, Invocation};

use std::io;
use std::time::Duration;
use steward_core::observability::{events, metrics};
use steward_core::process::{self, Captured, Supervised};
use tracing::debug;

/// Delay between two polls of a running child, and between two idle spins.
pub(crate) const POLL: Duration = Duration::from_millis(250);

/// A command and the extra environment it runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub command: String,
    /// Run through `sh -c` instead of splitting on whitespace
    pub shell: bool,
    pub env: Vec<(String, String)>,
}

impl Job {
    pub fn exec(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            shell: false,
            env: Vec::new(),
        }
    }

    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            shell: true,
            ..Self::exec(command)
        }
    }

    pub fn env(mut self, name: &str, value: impl Into<String>) -> Self {
        self.env.push((name.to_string(), value.into()));
        self
    }

    /// Spawn the child. The current environment is inherited.
    pub fn spawn(&self) -> io::Result<Supervised> {
        let mut command = if self.shell {
            process::shell(&self.command)
        } else {
            process::exec(&self.command)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?
        };
        command.envs(self.env.iter().map(|(name, value)| (name, value)));
        Supervised::spawn(command)
    }
}

/// Emit the completion event and metrics for a finished child.
pub(crate) fn report(tag: &str, command: &str, captured: &Captured) {
    let outcome = if captured.killed {
        "killed"
    } else if captured.success() {
        "ok"
    } else {
        "failed"
    };
    events::script_completed(
        tag,
        command,
        &captured.code_label(),
        captured.killed,
        captured.elapsed.as_millis() as u64,
    );
    metrics::record_script(tag, outcome, captured.elapsed);
    if !captured.stderr.is_empty() {
        debug!(tag = %tag, pid = ?captured.pid, stderr = %captured.stderr.trim_end(), "script stderr");
    }
}
