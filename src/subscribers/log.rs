//! # LogWriter: structured lifecycle logging
//!
//! Turns each lifecycle [`Event`] into one `tracing` record. Crashes, startup
//! failures and exhausted escalations log at `error`/`warn`; routine lifecycle
//! steps at `info`; per-signal escalation steps at `debug`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  worker forked worker_id=1 pid=4242
//! INFO  worker listening worker_id=1 pid=4242 address=0.0.0.0:3000
//! WARN  worker exited worker_id=1 pid=4242 code=Some(1) signal=None voluntary=false
//! INFO  worker respawn scheduled worker_id=1 delay_ms=100
//! DEBUG kill signal sent worker_id=2 pid=4243 signal=SIGINT
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::process::signal_name;
use crate::subscribers::Subscribe;

/// Logging subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::WorkerForked => {
                info!(worker_id = e.worker, pid = e.pid, "worker forked");
            }
            EventKind::WorkerListening => {
                info!(worker_id = e.worker, pid = e.pid, address = reason, "worker listening");
            }
            EventKind::WorkerExited => {
                let signal = e.signal.map(signal_name);
                if e.voluntary == Some(true) {
                    info!(worker_id = e.worker, pid = e.pid, code = ?e.code, signal = ?signal, "worker stopped");
                } else {
                    warn!(
                        worker_id = e.worker,
                        pid = e.pid,
                        code = ?e.code,
                        signal = ?signal,
                        voluntary = false,
                        "worker exited"
                    );
                }
            }
            EventKind::WorkerStartupFailed => {
                error!(
                    worker_id = e.worker,
                    pid = e.pid,
                    code = ?e.code,
                    signal = ?e.signal.map(signal_name),
                    "worker exited before listening"
                );
            }
            EventKind::WorkerRespawnScheduled => {
                info!(worker_id = e.worker, delay_ms = e.delay_ms, "worker respawn scheduled");
            }
            EventKind::KillSignalSent => {
                debug!(
                    worker_id = e.worker,
                    pid = e.pid,
                    signal = ?e.signal.map(signal_name),
                    "kill signal sent"
                );
            }
            EventKind::KillEscalationExhausted => {
                error!(worker_id = e.worker, pid = e.pid, reason, "worker survived kill escalation");
            }
            EventKind::PoolReady => {
                info!(reason, "worker pool ready");
            }
            EventKind::ShutdownRequested => {
                info!(reason, "shutdown requested");
            }
            EventKind::ShutdownCompleted => {
                info!(code = ?e.code, "shutdown completed");
            }
            EventKind::ReloadRequested => {
                info!(reason, "reload requested");
            }
            EventKind::FileChanged => {
                debug!(reason, "file changed");
            }
            EventKind::MalformedMessage => {
                warn!(worker_id = e.worker, reason, "dropped malformed worker message");
            }
            EventKind::SubscriberOverflow => {
                warn!(reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                error!(reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
