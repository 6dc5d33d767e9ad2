//! # Per-worker handle.
//!
//! One [`WorkerHandle`] exists per forked worker. It owns the process-control
//! side of the worker and publishes its lifecycle state on a `watch` channel, so
//! any task can wait for the worker's death without owning its event stream.
//!
//! ```text
//!  starting ──listening──► listening ──kill()──► exiting ──exit──► dead
//!      │                       │                                   ▲
//!      └──────────exit─────────┴───────────────────────────────────┘
//! ```
//!
//! Only the worker's monitor task moves a handle to `dead`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::ClusterError;
use crate::process::{KillSignal, WorkerId, WorkerProcess};
use crate::protocol::MasterMessage;

/// Lifecycle state of one worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Starting,
    Listening,
    Exiting,
    Dead,
}

/// Serializable view of one worker, as reported by `get_stats`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub id: WorkerId,
    pub pid: Option<u32>,
    pub state: WorkerState,
    pub exited_after_disconnect: bool,
    pub uptime_secs: u64,
}

/// Handle to one forked worker.
pub struct WorkerHandle {
    id: WorkerId,
    pid: Option<u32>,
    process: Box<dyn WorkerProcess>,
    state: watch::Sender<WorkerState>,
    exited_after_disconnect: AtomicBool,
    forked_at: Instant,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish()
    }
}

impl WorkerHandle {
    pub fn new(id: WorkerId, process: Box<dyn WorkerProcess>) -> Self {
        let (state, _) = watch::channel(WorkerState::Starting);
        Self {
            id,
            pid: process.pid(),
            process,
            state,
            exited_after_disconnect: AtomicBool::new(false),
            forked_at: Instant::now(),
        }
    }

    #[inline]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    #[inline]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn is_dead(&self) -> bool {
        self.state() == WorkerState::Dead
    }

    /// True once the master asked this worker to go away.
    pub fn exited_after_disconnect(&self) -> bool {
        self.exited_after_disconnect.load(Ordering::SeqCst)
    }

    /// Records that the coming exit is intentional.
    ///
    /// Must happen before the first signal: the exit it causes is then
    /// classified as voluntary and never reforked. Returns `true` only for the
    /// call that started the disconnect.
    pub fn mark_disconnecting(&self) -> bool {
        let first = !self.exited_after_disconnect.swap(true, Ordering::SeqCst);
        self.state.send_if_modified(|s| match s {
            WorkerState::Starting | WorkerState::Listening => {
                *s = WorkerState::Exiting;
                true
            }
            WorkerState::Exiting | WorkerState::Dead => false,
        });
        first
    }

    /// `starting -> listening`. Ignored in any other state.
    pub(crate) fn mark_listening(&self) -> bool {
        self.state.send_if_modified(|s| {
            if *s == WorkerState::Starting {
                *s = WorkerState::Listening;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn mark_dead(&self) {
        self.state.send_replace(WorkerState::Dead);
    }

    /// Resolves once the worker's exit has been observed.
    pub async fn exited(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|s| *s == WorkerState::Dead).await;
    }

    pub(crate) fn signal(&self, signal: KillSignal) -> std::io::Result<()> {
        self.process.kill(signal)
    }

    /// Queues a message on the worker's inbound channel.
    pub fn send(&self, message: &MasterMessage) -> Result<(), ClusterError> {
        self.process
            .send(message)
            .map_err(|_| ClusterError::ChannelClosed { id: self.id })
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            id: self.id,
            pid: self.pid,
            state: self.state(),
            exited_after_disconnect: self.exited_after_disconnect(),
            uptime_secs: self.forked_at.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;

    struct Inert;

    impl WorkerProcess for Inert {
        fn pid(&self) -> Option<u32> {
            Some(77)
        }
        fn kill(&self, _signal: KillSignal) -> io::Result<()> {
            Ok(())
        }
        fn send(&self, _message: &MasterMessage) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn disconnect_marks_voluntary_and_exiting() {
        let handle = WorkerHandle::new(1, Box::new(Inert));
        assert!(handle.mark_listening());
        assert!(handle.mark_disconnecting());
        assert!(!handle.mark_disconnecting(), "only the first call owns the exit");

        assert!(handle.exited_after_disconnect());
        assert_eq!(handle.state(), WorkerState::Exiting);
        assert!(!handle.mark_listening());
    }

    #[test]
    fn dead_is_terminal_for_disconnect() {
        let handle = WorkerHandle::new(1, Box::new(Inert));
        handle.mark_dead();
        handle.mark_disconnecting();
        assert_eq!(handle.state(), WorkerState::Dead);
    }

    #[tokio::test]
    async fn exited_resolves_after_mark_dead() {
        let handle = Arc::new(WorkerHandle::new(2, Box::new(Inert)));
        let waiter = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.exited().await })
        };
        tokio::task::yield_now().await;
        handle.mark_dead();
        waiter.await.unwrap();
        // Already dead: resolves immediately.
        handle.exited().await;
    }

    #[test]
    fn status_serializes_camel_case() {
        let handle = WorkerHandle::new(3, Box::new(Inert));
        let json = serde_json::to_value(handle.status()).unwrap();
        assert_eq!(json["pid"], 77);
        assert_eq!(json["state"], "starting");
        assert_eq!(json["exitedAfterDisconnect"], false);
        assert!(matches!(
            handle.send(&MasterMessage::Event { args: vec![] }),
            Err(ClusterError::ChannelClosed { id: 3 })
        ));
    }
}
