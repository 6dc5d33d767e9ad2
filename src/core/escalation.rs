//! # Kill one worker with an escalating signal sequence.
//!
//! ```text
//! mark_disconnecting()            (exit will be voluntary: no refork)
//!   ├─► SIGINT  → wait ≤ sigint_timeout  ─ exited ─► Ok
//!   ├─► SIGTERM → wait ≤ sigterm_timeout ─ exited ─► Ok
//!   ├─► SIGKILL → wait ≤ sigkill_timeout ─ exited ─► Ok
//!   └─► publish KillEscalationExhausted  ──────────► Err(KillExhausted)
//! ```
//!
//! ## Rules
//! - Signals are never skipped or reordered.
//! - A worker already dead is success without sending anything.
//! - A kill primitive error ends escalation at once with `KillFailed`. The one
//!   exception is "process not found" while the exit is still in flight: that
//!   step waits for the exit report like a delivered signal would.
//! - Waiting is `tokio::time::timeout` over the handle's death, so an early exit
//!   drops the pending timer.

use std::io;
use std::time::Duration;

use tokio::time;
use tracing::debug;

use super::worker::WorkerHandle;
use crate::error::ClusterError;
use crate::events::{Bus, Event, EventKind};
use crate::process::KillSignal;

/// Drives `worker` through SIGINT, SIGTERM and SIGKILL until it exits.
///
/// A kill primitive error rejects at once with [`ClusterError::KillFailed`],
/// except `io::ErrorKind::NotFound`: the process is already gone but its exit
/// has not been reported yet, so that step waits for the report and the
/// sequence continues as if the signal had been delivered.
pub async fn kill_worker(
    worker: &WorkerHandle,
    timeouts: [Duration; 3],
    bus: &Bus,
) -> Result<(), ClusterError> {
    worker.mark_disconnecting();
    if worker.is_dead() {
        return Ok(());
    }

    for (signal, wait) in KillSignal::ESCALATION.into_iter().zip(timeouts) {
        match worker.signal(signal) {
            Ok(()) => {
                bus.publish(
                    Event::new(EventKind::KillSignalSent)
                        .with_worker(worker.id())
                        .with_pid(worker.pid())
                        .with_kill_signal(signal),
                );
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(worker_id = worker.id(), %signal, "worker already gone; waiting for exit report");
            }
            Err(e) => {
                return Err(ClusterError::KillFailed {
                    id: worker.id(),
                    signal,
                    reason: e.to_string(),
                });
            }
        }

        if time::timeout(wait, worker.exited()).await.is_ok() {
            return Ok(());
        }
        debug!(worker_id = worker.id(), %signal, ?wait, "worker still alive after signal");
    }

    let waited: Duration = timeouts.iter().sum();
    bus.publish(
        Event::new(EventKind::KillEscalationExhausted)
            .with_worker(worker.id())
            .with_pid(worker.pid())
            .with_reason(format!("still alive after {waited:?}")),
    );
    Err(ClusterError::KillExhausted {
        id: worker.id(),
        waited,
    })
}
