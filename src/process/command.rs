//! # Command-backed worker processes.
//!
//! [`CommandSpawner`] starts each worker as a child process running a configured
//! command. The child's stdin/stdout carry the channel protocol
//! ([`crate::protocol`]); stderr is inherited so worker panics stay visible.
//!
//! ```text
//!            stdin  ◄── writer task ◄── mpsc<String> ◄── WorkerProcess::send
//!  child ─┤
//!            stdout ──► reader task ──► WorkerEvent::{Listening, Message}
//!                            └─ EOF ──► child.wait() ──► WorkerEvent::Exit
//! ```
//!
//! The reader drains stdout before reaping, so `Exit` always comes last.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{ExitInfo, KillSignal, Spawn, SpawnedWorker, WorkerEvent, WorkerId, WorkerProcess};
use crate::protocol::{self, MasterMessage, WorkerMessage};

/// Environment variable carrying the worker id.
pub const WORKER_ID_ENV: &str = "CLUSTER_WORKER_ID";
/// Environment variable carrying the process role (`worker`).
pub const ROLE_ENV: &str = "CLUSTER_ROLE";

/// Spawns workers by running a command.
#[derive(Clone, Debug)]
pub struct CommandSpawner {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl CommandSpawner {
    /// Creates a spawner for `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Appends command-line arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable for every worker.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl Spawn for CommandSpawner {
    fn spawn(&self, id: WorkerId) -> io::Result<SpawnedWorker> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(WORKER_ID_ENV, id.to_string())
            .env(ROLE_ENV, "worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        // A terminal Ctrl+C reaches the master only; workers are stopped by escalation.
        #[cfg(unix)]
        cmd.process_group(0);
        let mut child = cmd.spawn()?;

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("worker stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("worker stdout was not captured"))?;

        let exited = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (line_tx, line_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(id, stdin, line_rx));
        tokio::spawn(read_loop(id, child, stdout, event_tx, Arc::clone(&exited)));

        debug!(worker_id = id, pid, program = %self.program.display(), "worker process started");
        Ok(SpawnedWorker {
            process: Box::new(ChildProcess {
                pid,
                lines: line_tx,
                exited,
            }),
            events: event_rx,
        })
    }
}

/// Control handle for one child started by [`CommandSpawner`].
struct ChildProcess {
    pid: Option<u32>,
    lines: mpsc::UnboundedSender<String>,
    exited: Arc<AtomicBool>,
}

impl WorkerProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn kill(&self, signal: KillSignal) -> io::Result<()> {
        // Once reaped, the pid may already belong to someone else.
        if self.exited.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "worker process already exited",
            ));
        }
        let pid = self
            .pid
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "worker has no pid"))?;
        signal.deliver(pid)
    }

    fn send(&self, message: &MasterMessage) -> io::Result<()> {
        let line = protocol::encode_line(message)?;
        self.lines
            .send(line)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "worker stdin closed"))
    }
}

async fn write_loop(id: WorkerId, mut stdin: ChildStdin, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            debug!(worker_id = id, error = %e, "worker stdin closed");
            break;
        }
        if let Err(e) = stdin.flush().await {
            debug!(worker_id = id, error = %e, "worker stdin flush failed");
            break;
        }
    }
}

async fn read_loop(
    id: WorkerId,
    mut child: Child,
    stdout: ChildStdout,
    events: mpsc::UnboundedSender<WorkerEvent>,
    exited: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(value) = protocol::parse_line(&line) else {
                    continue;
                };
                let event = match WorkerMessage::classify(&value) {
                    Ok(WorkerMessage::Listening { address }) => WorkerEvent::Listening { address },
                    _ => WorkerEvent::Message(value),
                };
                let _ = events.send(event);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(worker_id = id, error = %e, "failed to read worker channel");
                break;
            }
        }
    }

    let info = match child.wait().await {
        Ok(status) => exit_info(status),
        Err(e) => {
            warn!(worker_id = id, error = %e, "failed to reap worker");
            ExitInfo::default()
        }
    };
    exited.store(true, Ordering::SeqCst);
    let _ = events.send(WorkerEvent::Exit(info));
}

#[cfg(unix)]
fn exit_info(status: std::process::ExitStatus) -> ExitInfo {
    use std::os::unix::process::ExitStatusExt;
    ExitInfo {
        code: status.code(),
        signal: status.signal(),
    }
}

#[cfg(not(unix))]
fn exit_info(status: std::process::ExitStatus) -> ExitInfo {
    ExitInfo {
        code: status.code(),
        signal: None,
    }
}
