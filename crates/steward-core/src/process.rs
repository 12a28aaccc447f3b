//! Child Process Supervision
//!
//! Scripts are polled across actor ticks, never awaited inside a handler.
//! Each child runs in its own process group so a forced kill also reaches
//! the grandchildren a shell script may have started. Stdout and stderr are
//! drained by background tasks while the child runs.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// How long output collection may take once the child is gone.
const OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// Build a `sh -c <script>` command.
pub fn shell(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

/// Build a command from a whitespace-separated line. `None` if the line is blank.
pub fn exec(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let program = words.next()?;
    let mut command = Command::new(program);
    command.args(words);
    Some(command)
}

/// A running child process with its output being captured.
#[derive(Debug)]
pub struct Supervised {
    child: Child,
    pid: Option<u32>,
    started: Instant,
    status: Option<ExitStatus>,
    killed: bool,
    stdout: JoinHandle<Vec<u8>>,
    stderr: JoinHandle<Vec<u8>>,
}

/// Everything observed about a finished child.
#[derive(Debug, Clone)]
pub struct Captured {
    pub pid: Option<u32>,
    pub status: Option<ExitStatus>,
    pub killed: bool,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl Captured {
    /// Exit code for logs, `_` when the child died from a signal.
    pub fn code_label(&self) -> String {
        self.status
            .and_then(|status| status.code())
            .map(|code| code.to_string())
            .unwrap_or_else(|| "_".to_string())
    }

    pub fn success(&self) -> bool {
        !self.killed && self.status.is_some_and(|status| status.success())
    }

    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

fn drain<R>(reader: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf).await;
        }
        buf
    })
}

async fn collect(mut task: JoinHandle<Vec<u8>>) -> String {
    match tokio::time::timeout(OUTPUT_GRACE, &mut task).await {
        Ok(Ok(buf)) => String::from_utf8_lossy(&buf).into_owned(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

impl Supervised {
    /// Spawn `command` with null stdin and piped output.
    pub fn spawn(mut command: Command) -> io::Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let pid = child.id();
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        debug!(pid = ?pid, "child spawned");

        Ok(Self {
            child,
            pid,
            started: Instant::now(),
            status: None,
            killed: false,
            stdout,
            stderr,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Non-blocking check, true once the child has exited.
    pub fn poll(&mut self) -> io::Result<bool> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status.is_some())
    }

    /// SIGKILL the whole process group and reap the child.
    pub async fn kill(&mut self) {
        if self.status.is_some() {
            return;
        }
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
        let _ = self.child.kill().await;
        self.killed = true;
        self.status = self.child.try_wait().ok().flatten();
        trace!(pid = ?self.pid, "child killed");
    }

    /// Reap the child and collect its output.
    pub async fn finish(mut self) -> Captured {
        if self.status.is_none() {
            self.status = tokio::time::timeout(OUTPUT_GRACE, self.child.wait())
                .await
                .ok()
                .and_then(Result::ok);
        }
        let elapsed = self.started.elapsed();
        let stdout = collect(self.stdout).await;
        let stderr = collect(self.stderr).await;

        Captured {
            pid: self.pid,
            status: self.status,
            killed: self.killed,
            stdout,
            stderr,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn wait_exit(child: &mut Supervised) {
        for _ in 0..200 {
            if child.poll().unwrap() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("child did not exit");
    }

    #[test]
    fn test_exec_splits_on_whitespace() {
        assert!(exec("   ").is_none());
        let command = exec("echo  a b").unwrap();
        let args: Vec<_> = command.as_std().get_args().collect();
        assert_eq!(command.as_std().get_program(), "echo");
        assert_eq!(args, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_captures_output_and_status() {
        let mut child = Supervised::spawn(shell("echo out; echo err >&2; exit 3")).unwrap();
        wait_exit(&mut child).await;
        let captured = child.finish().await;
        assert_eq!(captured.stdout, "out\n");
        assert_eq!(captured.stderr, "err\n");
        assert_eq!(captured.code_label(), "3");
        assert!(!captured.success());
        assert_eq!(captured.combined(), "out\nerr\n");
    }

    #[tokio::test]
    async fn test_environment_is_passed() {
        let mut command = shell("printf '%s' \"$INPUT\"");
        command.env("INPUT", "hello world");
        let mut child = Supervised::spawn(command).unwrap();
        wait_exit(&mut child).await;
        assert_eq!(child.finish().await.stdout, "hello world");
    }

    #[tokio::test]
    async fn test_kill_reaches_grandchildren() {
        let mut child = Supervised::spawn(shell("sleep 30 & sleep 30; echo done")).unwrap();
        assert!(!child.poll().unwrap());
        child.kill().await;
        assert!(child.poll().unwrap());

        // the backgrounded sleep holds stdout open unless it was killed too
        let captured = tokio::time::timeout(Duration::from_secs(5), child.finish())
            .await
            .unwrap();
        assert!(captured.killed);
        assert_eq!(captured.code_label(), "_");
        assert!(captured.stdout.is_empty());
        assert!(captured.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let result = Supervised::spawn(exec("/nonexistent/steward-test-binary").unwrap());
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
