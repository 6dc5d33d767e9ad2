//! Error types used by the cluster master, the worker link and the file listener.
//!
//! All failures surface as one enum, [`ClusterError`]. Most of its variants are
//! logged and absorbed by the master; only two are meant to reach a caller:
//!
//! - [`ClusterError::StartupFailed`] a worker exited before it reported `listening`;
//! - [`ClusterError::KillExhausted`] SIGINT, SIGTERM and SIGKILL all failed to stop a worker.
//!
//! Like the rest of the crate, the enum provides `as_label` for log fields.

use std::time::Duration;

use thiserror::Error;

use crate::process::{KillSignal, WorkerId};

/// # Errors produced by the cluster runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ClusterError {
    /// The OS refused to start a worker process.
    #[error("failed to spawn worker {id}: {source}")]
    Spawn {
        /// Id reserved for the worker that could not be started.
        id: WorkerId,
        #[source]
        source: std::io::Error,
    },

    /// Worker exited before it reported `listening`.
    #[error("worker {id} exited before listening (code={code:?}, signal={signal:?})")]
    StartupFailed {
        id: WorkerId,
        code: Option<i32>,
        signal: Option<i32>,
    },

    /// The kill primitive itself failed (process already gone, permission denied, ...).
    #[error("failed to send {signal} to worker {id}: {reason}")]
    KillFailed {
        id: WorkerId,
        signal: KillSignal,
        reason: String,
    },

    /// Worker survived the whole SIGINT → SIGTERM → SIGKILL escalation.
    #[error("worker {id} did not exit after SIGINT, SIGTERM and SIGKILL (waited {waited:?})")]
    KillExhausted {
        id: WorkerId,
        /// Sum of the three escalation timeouts.
        waited: Duration,
    },

    /// No worker with this id is tracked.
    #[error("unknown worker {id}")]
    UnknownWorker { id: WorkerId },

    /// Another kill or reload already owns this worker's exit.
    #[error("worker {id} is already exiting")]
    AlreadyExiting { id: WorkerId },

    /// The master is shutting down and forks no more workers.
    #[error("master is shutting down")]
    ShuttingDown,

    /// The message channel to a process is gone.
    #[error("channel to worker {id} is closed")]
    ChannelClosed { id: WorkerId },

    /// The OS file watcher could not be created or attached.
    #[error("file watcher: {0}")]
    Watch(#[from] notify::Error),

    /// Installing the SIGINT handler failed.
    #[error("signal handler registration failed: {0}")]
    Signal(#[source] std::io::Error),

    /// A correlated bus request got no response in time.
    #[error("no response to '{event}' within {timeout:?}")]
    RequestTimeout { event: String, timeout: Duration },
}

impl ClusterError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use clustervisor::ClusterError;
    ///
    /// let err = ClusterError::StartupFailed { id: 1, code: Some(1), signal: None };
    /// assert_eq!(err.as_label(), "worker_startup_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ClusterError::Spawn { .. } => "worker_spawn_failed",
            ClusterError::StartupFailed { .. } => "worker_startup_failed",
            ClusterError::KillFailed { .. } => "worker_kill_failed",
            ClusterError::KillExhausted { .. } => "worker_kill_exhausted",
            ClusterError::UnknownWorker { .. } => "unknown_worker",
            ClusterError::AlreadyExiting { .. } => "worker_already_exiting",
            ClusterError::ShuttingDown => "shutting_down",
            ClusterError::ChannelClosed { .. } => "channel_closed",
            ClusterError::Watch(_) => "file_watch_failed",
            ClusterError::Signal(_) => "signal_registration_failed",
            ClusterError::RequestTimeout { .. } => "request_timeout",
        }
    }

    /// Whether the error means shutdown or boot cannot complete cleanly.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use clustervisor::ClusterError;
    ///
    /// let err = ClusterError::KillExhausted { id: 3, waited: Duration::from_secs(15) };
    /// assert!(err.is_fatal());
    /// ```
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClusterError::KillExhausted { .. }
                | ClusterError::StartupFailed { .. }
                | ClusterError::Spawn { .. }
                | ClusterError::Signal(_)
        )
    }
}
