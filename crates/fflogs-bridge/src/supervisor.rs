//! Worker process supervision.
//!
//! A [`Session`] owns one worker process from spawn to termination:
//! - stdin: commands, written from the caller's task
//! - stdout: drained by a dedicated task into the event channel
//! - stderr: drained into the log so the worker never blocks on it
//!
//! Reading and writing never share a lock. The process is killed on drop if
//! [`Session::terminate`] was never reached.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::FramedWrite;

use crate::bridge::codec::CommandCodec;
use crate::bridge::protocol::{self, Event, SessionId};
use crate::collector::{self, CollectionState};
use crate::drain::{spawn_drain, spawn_stderr_sink};
use crate::sequencer::CommandSink;

/// The worker could not be brought up. No command has been sent.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("worker image unavailable: {0}")]
    ImageUnavailable(String),
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker {0} not captured")]
    StreamNotCaptured(&'static str),
}

/// A write to the worker failed mid-session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("worker i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("worker session already terminated")]
    Closed,
}

/// Longest a single command write may take before the worker is treated as
/// stuck.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Extension point for how the worker process is started.
pub trait WorkerSpawner: Send + Sync {
    /// Start the worker for `image`. All three standard streams must be piped.
    fn spawn(&self, image: &Path) -> std::io::Result<Child>;
}

/// Runs `<program> [args...] <image>`; `node` by default.
#[derive(Debug, Clone)]
pub struct RuntimeSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl RuntimeSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for RuntimeSpawner {
    fn default() -> Self {
        Self::new("node")
    }
}

impl WorkerSpawner for RuntimeSpawner {
    fn spawn(&self, image: &Path) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

/// A running worker and the streams attached to it.
pub struct Session {
    id: SessionId,
    child: Child,
    writer: Option<FramedWrite<ChildStdin, CommandCodec>>,
    events: mpsc::UnboundedReceiver<Event>,
    drain: JoinHandle<usize>,
    stderr: JoinHandle<usize>,
    send_timeout: Duration,
    terminate_grace: Duration,
    terminated: bool,
}

impl Session {
    /// Spawn the worker and start draining its output.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        spawner: &dyn WorkerSpawner,
        image: &Path,
        terminate_grace: Duration,
    ) -> Result<Self, LaunchError> {
        let id = SessionId::new();
        tracing::info!(session = %id, image = %image.display(), "Spawning worker subprocess");

        let mut child = spawner.spawn(image)?;

        let streams = (
            child.stdin.take(),
            child.stdout.take(),
            child.stderr.take(),
        );
        let (stdin, stdout, stderr) = match streams {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            (stdin, stdout, _) => {
                let _ = child.start_kill();
                let missing = if stdin.is_none() {
                    "stdin"
                } else if stdout.is_none() {
                    "stdout"
                } else {
                    "stderr"
                };
                return Err(LaunchError::StreamNotCaptured(missing));
            }
        };

        let (tx, events) = mpsc::unbounded_channel();
        let drain = spawn_drain(stdout, tx, id);
        let stderr = spawn_stderr_sink(stderr, id);

        tracing::debug!(session = %id, pid = ?child.id(), "Worker started");

        Ok(Self {
            id,
            child,
            writer: Some(FramedWrite::new(stdin, CommandCodec::new())),
            events,
            drain,
            stderr,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            terminate_grace,
            terminated: false,
        })
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Write one command line and flush it.
    ///
    /// A worker that stops reading its stdin fills the pipe. If the write has
    /// not completed within the send timeout it fails with
    /// [`io::ErrorKind::TimedOut`](std::io::ErrorKind::TimedOut) and the
    /// writer is closed, since a partial line may already be in the pipe.
    pub async fn send(&mut self, command: protocol::Command) -> Result<(), SessionError> {
        let writer = self.writer.as_mut().ok_or(SessionError::Closed)?;
        tracing::debug!(session = %self.id, kind = command.kind(), id = %command.id, "Sending command");
        match tokio::time::timeout(self.send_timeout, writer.send(command)).await {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => {
                tracing::warn!(
                    session = %self.id,
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "Worker stopped reading commands, closing stdin"
                );
                self.writer = None;
                Err(SessionError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "worker did not accept command in time",
                )))
            }
        }
    }

    /// Receiver for events decoded by the drain loop.
    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<Event> {
        &mut self.events
    }

    /// Wait for `expected` channels on this session's events until `deadline`.
    pub async fn collect(&mut self, expected: &[&str], deadline: Instant) -> CollectionState {
        collector::collect(&mut self.events, expected, deadline).await
    }

    /// Stop the worker. Safe to call more than once; never fails.
    ///
    /// Closes stdin, asks the worker to exit, and kills it if it is still
    /// running after the grace period.
    pub async fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        // Dropping the writer closes the worker's stdin.
        self.writer = None;
        self.request_exit();

        match tokio::time::timeout(self.terminate_grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(session = %self.id, %status, "Worker exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(session = %self.id, error = %e, "Failed to wait for worker");
            }
            Err(_) => {
                tracing::warn!(
                    session = %self.id,
                    grace_ms = self.terminate_grace.as_millis() as u64,
                    "Worker ignored termination, killing"
                );
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(session = %self.id, error = %e, "Failed to kill worker");
                }
            }
        }

        self.drain.abort();
        self.stderr.abort();
    }

    #[cfg(unix)]
    fn request_exit(&mut self) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        // No pid means the child has already been reaped.
        let Some(pid) = self.child.id() else {
            return;
        };
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::debug!(session = %self.id, error = %e, "SIGTERM failed, killing worker");
            let _ = self.child.start_kill();
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) {
        let _ = self.child.start_kill();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.terminated {
            tracing::warn!(session = %self.id, "Session dropped without terminate, killing worker");
            let _ = self.child.start_kill();
            self.drain.abort();
            self.stderr.abort();
        }
    }
}

#[async_trait]
impl CommandSink for Session {
    async fn send(&mut self, command: protocol::Command) -> Result<(), SessionError> {
        Session::send(self, command).await
    }
}
