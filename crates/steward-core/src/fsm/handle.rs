use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TellError {
    #[error("actor {tag} is no longer running")]
    Stopped { tag: &'static str },
}

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("actor {tag} did not stop within {timeout:?}, task aborted")]
    Timeout {
        tag: &'static str,
        timeout: Duration,
    },

    #[error("actor {tag} panicked outside of its handlers")]
    Panicked { tag: &'static str },
}

/// Lifecycle handle of a running actor, independent of its message type.
#[derive(Debug, Clone)]
pub struct ActorHandle {
    tag: &'static str,
    token: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ActorHandle {
    pub(crate) fn new(tag: &'static str, token: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            tag,
            token,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// Set the termination flag without waiting.
    pub fn terminate(&self) {
        self.token.cancel();
    }

    pub async fn is_finished(&self) -> bool {
        match self.task.lock().await.as_ref() {
            Some(task) => task.is_finished(),
            None => true,
        }
    }

    /// Wait for the actor task to exit, aborting it once `timeout` elapses.
    pub async fn join(&self, timeout: Duration) -> Result<(), ShutdownError> {
        let Some(mut task) = self.task.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => {
                debug!(tag = %self.tag, "actor joined");
                Ok(())
            }
            Ok(Err(e)) if e.is_panic() => Err(ShutdownError::Panicked { tag: self.tag }),
            Ok(Err(_)) => Ok(()),
            Err(_) => {
                warn!(tag = %self.tag, timeout = ?timeout, "actor did not stop in time, aborting");
                task.abort();
                Err(ShutdownError::Timeout {
                    tag: self.tag,
                    timeout,
                })
            }
        }
    }

    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        self.terminate();
        self.join(timeout).await
    }
}

/// Typed handle used to send messages to an actor.
#[derive(Debug)]
pub struct ActorRef<M> {
    sender: mpsc::UnboundedSender<M>,
    handle: ActorHandle,
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<M> ActorRef<M> {
    pub(crate) fn new(sender: mpsc::UnboundedSender<M>, handle: ActorHandle) -> Self {
        Self { sender, handle }
    }

    pub fn tag(&self) -> &'static str {
        self.handle.tag
    }

    /// Enqueue a message. Never blocks.
    pub fn tell(&self, message: M) -> Result<(), TellError> {
        self.sender
            .send(message)
            .map_err(|_| TellError::Stopped { tag: self.handle.tag })
    }

    pub fn handle(&self) -> ActorHandle {
        self.handle.clone()
    }

    /// Terminate the actor and wait (bounded) for it to exit.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        self.handle.shutdown(timeout).await
    }
}
