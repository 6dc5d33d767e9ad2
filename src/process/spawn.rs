//! # Spawn seam between the master and worker processes.
//!
//! ```text
//!  ClusterMaster::fork_worker()
//!        │
//!        └─► Spawn::spawn(id) ──► SpawnedWorker
//!                                   ├─ process: Box<dyn WorkerProcess>   (kill / send)
//!                                   └─ events:  UnboundedReceiver<WorkerEvent>
//!                                                ├─ Listening { address }
//!                                                ├─ Message(json)
//!                                                └─ Exit(ExitInfo)      (always last)
//! ```
//!
//! ## Rules
//! - `Exit` is the last event a worker produces; nothing follows it.
//! - A closed event stream without `Exit` is treated as an exit with unknown status.
//! - `WorkerProcess::kill` and `WorkerProcess::send` never block.

use std::io;

use serde_json::Value;
use tokio::sync::mpsc;

use super::{KillSignal, WorkerId};
use crate::protocol::MasterMessage;

/// How a worker process ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Raw signal number, if a signal terminated the process.
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }
}

/// Notifications produced by one worker, in the order they happened.
#[derive(Clone, Debug)]
pub enum WorkerEvent {
    /// The worker bound its service socket.
    Listening { address: Option<String> },
    /// Any other channel message (already parsed as JSON, not yet validated).
    Message(Value),
    /// The process is gone.
    Exit(ExitInfo),
}

/// Control side of one running worker. Owned exclusively by its `WorkerHandle`.
pub trait WorkerProcess: Send + Sync + 'static {
    /// OS process id, if known.
    fn pid(&self) -> Option<u32>;

    /// Sends `signal` to the process.
    fn kill(&self, signal: KillSignal) -> io::Result<()>;

    /// Queues a message on the worker's inbound channel.
    fn send(&self, message: &MasterMessage) -> io::Result<()>;
}

/// A freshly started worker.
pub struct SpawnedWorker {
    pub process: Box<dyn WorkerProcess>,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
}

/// Starts worker processes.
pub trait Spawn: Send + Sync + 'static {
    /// Starts the worker that will be known as `id`.
    fn spawn(&self, id: WorkerId) -> io::Result<SpawnedWorker>;
}
