//! Process boundary: spawning workers, delivering signals, exit reporting.
//!
//! The master never touches an OS process directly. It goes through the
//! [`Spawn`] seam, which hands back a [`WorkerProcess`] (signal + send side)
//! and a stream of [`WorkerEvent`]s (listening / message / exit side).
//!
//! ## Contents
//! - [`Spawn`], [`WorkerProcess`], [`WorkerEvent`], [`ExitInfo`] the seam itself
//! - [`CommandSpawner`] the real implementation over `tokio::process`
//! - [`KillSignal`] the escalation signals and their delivery

mod command;
mod signal;
mod spawn;

pub use command::{CommandSpawner, ROLE_ENV, WORKER_ID_ENV};
pub use signal::{KillSignal, signal_name};
pub use spawn::{ExitInfo, Spawn, SpawnedWorker, WorkerEvent, WorkerProcess};

/// Identifier of a worker, unique within one master process (starts at 1).
pub type WorkerId = u32;
