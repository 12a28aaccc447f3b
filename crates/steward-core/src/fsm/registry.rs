use super::handle::{ActorHandle, ShutdownError};
use futures::future::join_all;
use std::time::Duration;
use tracing::{info, warn};

/// Default bound on how long [`Registry::shutdown_all`] waits for each actor.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the lifecycle of every actor started by a process.
#[derive(Debug)]
pub struct Registry {
    actors: Vec<ActorHandle>,
    timeout: Duration,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_TIMEOUT)
    }
}

impl Registry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            actors: Vec::new(),
            timeout,
        }
    }

    pub fn register(&mut self, actor: ActorHandle) {
        self.actors.push(actor);
    }

    pub fn tags(&self) -> Vec<&'static str> {
        self.actors.iter().map(ActorHandle::tag).collect()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Terminate every registered actor, then wait for all of them.
    ///
    /// Actors that do not unwind within the timeout are aborted and reported.
    pub async fn shutdown_all(&mut self) -> Vec<ShutdownError> {
        let actors = std::mem::take(&mut self.actors);
        info!(count = actors.len(), timeout = ?self.timeout, "Shutting down actors");

        for actor in &actors {
            actor.terminate();
        }

        let timeout = self.timeout;
        let errors: Vec<ShutdownError> = join_all(actors.iter().map(|actor| actor.join(timeout)))
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        for error in &errors {
            warn!(error = %error, "actor shutdown incomplete");
        }
        errors
    }
}
