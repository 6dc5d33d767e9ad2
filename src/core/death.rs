//! Exit classification and death logging for the master and its workers.

use tracing::{error, info, warn};

use crate::process::{WorkerId, signal_name};

/// How bad a process exit was.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeathSeverity {
    /// Exit code 0.
    Clean = 0,
    /// Nonzero exit code, no signal.
    Failed = 1,
    /// Ended by a signal.
    Signaled = 2,
}

impl DeathSeverity {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Classifies an exit. A signal wins over any code.
///
/// An exit with neither code nor signal (status unknown) counts as `Failed`.
///
/// # Example
/// ```
/// use clustervisor::{DeathSeverity, classify_death};
///
/// assert_eq!(classify_death(None, Some(9)), DeathSeverity::Signaled);
/// assert_eq!(classify_death(Some(1235), None), DeathSeverity::Failed);
/// assert_eq!(classify_death(Some(0), None), DeathSeverity::Clean);
/// ```
pub fn classify_death(code: Option<i32>, signal: Option<i32>) -> DeathSeverity {
    match (code, signal) {
        (_, Some(_)) => DeathSeverity::Signaled,
        (Some(0), None) => DeathSeverity::Clean,
        _ => DeathSeverity::Failed,
    }
}

/// Logs the master's own exit and returns its severity.
pub fn log_master_death(code: Option<i32>, signal: Option<i32>) -> DeathSeverity {
    let severity = classify_death(code, signal);
    let pid = std::process::id();
    match severity {
        DeathSeverity::Signaled => {
            error!(pid, signal = ?signal.map(signal_name), "master process killed by signal");
        }
        DeathSeverity::Failed => error!(pid, code = ?code, "master process exited with failure"),
        DeathSeverity::Clean => info!(pid, "master process exited"),
    }
    severity
}

/// Logs a worker's exit and returns its severity.
pub fn log_worker_death(
    id: WorkerId,
    pid: Option<u32>,
    code: Option<i32>,
    signal: Option<i32>,
) -> DeathSeverity {
    let severity = classify_death(code, signal);
    match severity {
        DeathSeverity::Signaled => {
            warn!(worker_id = id, pid, signal = ?signal.map(signal_name), "worker killed by signal");
        }
        DeathSeverity::Failed => warn!(worker_id = id, pid, code = ?code, "worker exited with failure"),
        DeathSeverity::Clean => info!(worker_id = id, pid, "worker exited"),
    }
    severity
}
