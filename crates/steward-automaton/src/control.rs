//! Control Channel
//!
//! A unix stream socket. A client connects, writes one command and reads back
//! at most one line; the server then closes the connection. A command the
//! grammar rejects closes the connection without a reply.

use crate::command::Command;
use crate::machine::{AutomatonMessage, Request};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use steward_core::ActorRef;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Longest command accepted from a client.
const MAX_COMMAND: u64 = 64 * 1024;

/// A client that has not sent its command by then is dropped without a reply.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
}

impl ControlServer {
    /// Bind `path`, replacing a stale socket file left by a previous run.
    pub fn bind(path: &Path) -> io::Result<Self> {
        if path.exists() {
            info!(path = %path.display(), "removing stale socket");
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` resolves, then remove the socket file.
    pub async fn serve<F>(self, automaton: ActorRef<AutomatonMessage>, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                _ = &mut shutdown => break Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let automaton = automaton.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle(stream, automaton, READ_TIMEOUT).await {
                                debug!(error = %e, "control connection failed");
                            }
                        });
                    }
                    Err(e) => break Err(e),
                },
            }
        };

        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "socket file not removed");
        }
        result
    }
}

async fn handle(
    stream: UnixStream,
    automaton: ActorRef<AutomatonMessage>,
    read_timeout: Duration,
) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut line = String::new();
    let mut reader = BufReader::new(reader.take(MAX_COMMAND));
    match tokio::time::timeout(read_timeout, reader.read_line(&mut line)).await {
        Ok(read) => {
            read?;
        }
        Err(_) => {
            warn!(timeout = ?read_timeout, "control client sent no command, closed");
            return Ok(());
        }
    }
    debug!(command = %line.trim_end(), "socket ->");

    let command = match Command::parse(&line) {
        Ok(command) => command,
        Err(e) => {
            warn!(error = %e, "control command rejected");
            return Ok(());
        }
    };

    let reply = match command {
        Command::State => {
            let (reply, receiver) = oneshot::channel();
            if automaton.tell(AutomatonMessage::Query(reply)).is_err() {
                return Ok(());
            }
            receiver.await.ok()
        }
        Command::Goto { target, input } => request(&automaton, target, input, false).await,
        Command::Wait { target, input } => request(&automaton, target, input, true).await,
    };

    if let Some(reply) = reply {
        writer.write_all(reply.as_bytes()).await?;
        writer.shutdown().await?;
    }
    Ok(())
}

async fn request(
    automaton: &ActorRef<AutomatonMessage>,
    target: String,
    input: String,
    blocking: bool,
) -> Option<String> {
    let (request, receiver) = Request::new(target, input, blocking);
    automaton.tell(AutomatonMessage::Transition(request)).ok()?;
    receiver.await.ok().map(|ack| ack.to_string())
}

/// Send one command and return the reply, empty if the server closed without one.
pub async fn send(path: &Path, command: &str) -> io::Result<String> {
    let mut stream = UnixStream::connect(path).await?;
    stream.write_all(command.as_bytes()).await?;
    stream.shutdown().await?;
    let mut reply = String::new();
    stream.read_to_string(&mut reply).await?;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Automaton;
    use crate::manifest::Manifest;
    use steward_core::Actor;
    use tokio::time::Instant;

    const MANIFEST: &str = r#"
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
    async fn test_socket_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("automaton.sock");
        std::fs::write(&path, "stale").unwrap();

        let graph = Manifest::parse(MANIFEST).unwrap().validate().unwrap();
        let automaton = Actor::start(Automaton::new(graph, path.clone()));
        let server = ControlServer::bind(&path).unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve(automaton.clone(), async {
            let _ = stopped.await;
        }));

        assert_eq!(send(&path, "STATE").await.unwrap(), "idle");
        assert_eq!(send(&path, "WAIT idle").await.unwrap(), "OK");

        let started = Instant::now();
        assert_eq!(send(&path, "GOTO run").await.unwrap(), "OK");
        assert_eq!(send(&path, "STATE").await.unwrap(), "run");
        assert_eq!(send(&path, "WAIT idle").await.unwrap(), "OK");
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(send(&path, "STATE\n").await.unwrap(), "idle");

        assert_eq!(send(&path, "GOTO nowhere").await.unwrap(), "KO");
        assert_eq!(send(&path, "JUMP idle").await.unwrap(), "");

        stop.send(()).unwrap();
        serving.await.unwrap().unwrap();
        assert!(!path.exists());
        automaton.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_client_is_closed_without_reply() {
        let graph = Manifest::parse(MANIFEST).unwrap().validate().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let automaton = Actor::start(Automaton::new(graph, dir.path().join("automaton.sock")));
        let (server_side, mut client) = UnixStream::pair().unwrap();

        let handled = tokio::spawn(handle(
            server_side,
            automaton.clone(),
            Duration::from_millis(100),
        ));
        tokio::time::timeout(Duration::from_secs(5), handled)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let mut reply = String::new();
        client.read_to_string(&mut reply).await.unwrap();
        assert_eq!(reply, "");
        automaton.shutdown(Duration::from_secs(5)).await.unwrap();
    }
}
