//! # Lifecycle events published by the cluster master.
//!
//! The [`EventKind`] enum groups events into four families:
//! - **Worker lifecycle**: forked, listening, exited, startup failure, respawn.
//! - **Kill escalation**: each signal sent, escalation exhausted.
//! - **Cluster control**: pool ready, shutdown, reload, file changes.
//! - **Diagnostics**: malformed channel messages, subscriber overflow/panic.
//!
//! The [`Event`] struct carries optional metadata (worker id, pid, signal, exit
//! code, reason, delay) set depending on the kind.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use clustervisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::WorkerExited)
//!     .with_worker(3)
//!     .with_pid(4242)
//!     .with_code(1)
//!     .with_voluntary(false);
//!
//! assert_eq!(ev.kind, EventKind::WorkerExited);
//! assert_eq!(ev.worker, Some(3));
//! assert_eq!(ev.code, Some(1));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::process::{KillSignal, WorkerId};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets `reason` (`subscriber=<name> ...`).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets `reason`.
    SubscriberOverflow,

    // === Worker lifecycle ===
    /// A worker process was spawned.
    ///
    /// Sets `worker`, `pid`.
    WorkerForked,

    /// A worker reported `listening`.
    ///
    /// Sets `worker`, `pid`, optionally `reason` (bound address).
    WorkerListening,

    /// A worker that had reached `listening` exited.
    ///
    /// Sets `worker`, `pid`, `code`/`signal`, `voluntary`.
    WorkerExited,

    /// A worker exited before `listening`. It is not replaced.
    ///
    /// Sets `worker`, `pid`, `code`/`signal`.
    WorkerStartupFailed,

    /// A replacement fork is scheduled after a crash.
    ///
    /// Sets `worker` (the crashed one), `delay_ms`.
    WorkerRespawnScheduled,

    // === Kill escalation ===
    /// A kill signal was delivered.
    ///
    /// Sets `worker`, `pid`, `signal`.
    KillSignalSent,

    /// SIGINT, SIGTERM and SIGKILL all timed out.
    ///
    /// Sets `worker`, `pid`, `reason`.
    KillEscalationExhausted,

    // === Cluster control ===
    /// Every initial worker reported `listening`.
    ///
    /// Sets `reason` (`workers=<n>`).
    PoolReady,

    /// Shutdown requested (SIGINT or a master-affecting file change).
    ///
    /// Sets `reason`.
    ShutdownRequested,

    /// Every worker is confirmed dead; the exit hook is next.
    ///
    /// Sets `code` (process exit code).
    ShutdownCompleted,

    /// Rolling reload of every worker was requested.
    ///
    /// Sets `reason`.
    ReloadRequested,

    /// The file listener observed a change.
    ///
    /// Sets `reason` (`file changed: <path>`).
    FileChanged,

    /// A worker sent something that is not a known channel message.
    ///
    /// Sets `worker`, `reason`.
    MalformedMessage,
}

impl EventKind {
    /// Short kebab-case label, used by the log subscriber.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::SubscriberPanicked => "subscriber-panicked",
            EventKind::SubscriberOverflow => "subscriber-overflow",
            EventKind::WorkerForked => "worker-forked",
            EventKind::WorkerListening => "worker-listening",
            EventKind::WorkerExited => "worker-exited",
            EventKind::WorkerStartupFailed => "worker-startup-failed",
            EventKind::WorkerRespawnScheduled => "worker-respawn-scheduled",
            EventKind::KillSignalSent => "kill-signal-sent",
            EventKind::KillEscalationExhausted => "kill-escalation-exhausted",
            EventKind::PoolReady => "pool-ready",
            EventKind::ShutdownRequested => "shutdown-requested",
            EventKind::ShutdownCompleted => "shutdown-completed",
            EventKind::ReloadRequested => "reload-requested",
            EventKind::FileChanged => "file-changed",
            EventKind::MalformedMessage => "malformed-message",
        }
    }
}

/// Lifecycle event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Worker the event is about.
    pub worker: Option<WorkerId>,
    /// OS pid of that worker.
    pub pid: Option<u32>,
    /// Signal sent to, or that ended, the worker.
    pub signal: Option<i32>,
    /// Exit code.
    pub code: Option<i32>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
    /// Delay before a scheduled respawn, in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Whether an exit was requested by the master.
    pub voluntary: Option<bool>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            worker: None,
            pid: None,
            signal: None,
            code: None,
            reason: None,
            delay_ms: None,
            voluntary: None,
        }
    }

    #[inline]
    pub fn with_worker(mut self, id: WorkerId) -> Self {
        self.worker = Some(id);
        self
    }

    /// Attaches a pid; `None` leaves the field unset.
    #[inline]
    pub fn with_pid(mut self, pid: impl Into<Option<u32>>) -> Self {
        self.pid = pid.into();
        self
    }

    /// Attaches a raw signal number; `None` leaves the field unset.
    #[inline]
    pub fn with_signal(mut self, signal: impl Into<Option<i32>>) -> Self {
        self.signal = signal.into();
        self
    }

    /// Attaches one of the escalation signals.
    #[inline]
    pub fn with_kill_signal(self, signal: KillSignal) -> Self {
        self.with_signal(signal.as_raw())
    }

    #[inline]
    pub fn with_code(mut self, code: impl Into<Option<i32>>) -> Self {
        self.code = code.into();
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    #[inline]
    pub fn with_voluntary(mut self, voluntary: bool) -> Self {
        self.voluntary = Some(voluntary);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} info={info}"))
    }

    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
