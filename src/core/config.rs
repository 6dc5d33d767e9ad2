//! # Cluster configuration.
//!
//! Provides [`ClusterConfig`], the settings for one [`ClusterMaster`](crate::ClusterMaster).
//!
//! ## Sentinel values
//! - `workers = None` → one worker per CPU core (two when running under CI)
//! - `sigkill_timeout = 0s` → SIGKILL is sent but its exit is not awaited
//!   (escalation fails immediately unless the exit is already observed)

use std::path::PathBuf;
use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Environment variable whose presence means "running under CI".
pub const CI_ENV: &str = "CI";

/// Worker count used under CI, independent of the machine's core count.
pub const CI_WORKERS: usize = 2;

/// Configuration for the cluster master.
///
/// ## Field semantics
/// - `workers`: explicit pool size; wins over the CI rule and the core count
/// - `sigint_timeout` / `sigterm_timeout` / `sigkill_timeout`: how long each
///   escalation step waits for the worker to exit
/// - `bus_capacity`: lifecycle event ring buffer size (min 1)
/// - `respawn_backoff`: delay before the replacement of a crashed worker
/// - `auto_reload`: watch `watch_paths` and reload on change
/// - `master_file`: changes to this file restart the whole system
/// - `status_timeout`: how long `/clusters`-style requests wait for the master
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    pub workers: Option<usize>,
    /// Install the SIGINT handler during `initialize`. Tests turn this off.
    pub handle_signals: bool,
    pub sigint_timeout: Duration,
    pub sigterm_timeout: Duration,
    pub sigkill_timeout: Duration,
    pub bus_capacity: usize,
    pub respawn_backoff: BackoffPolicy,
    pub auto_reload: bool,
    pub watch_paths: Vec<PathBuf>,
    pub master_file: Option<PathBuf>,
    pub status_timeout: Duration,
}

impl ClusterConfig {
    /// Resolves the pool size.
    ///
    /// Explicit override first, then the CI rule, then the core count (at least 1).
    ///
    /// # Example
    /// ```
    /// use clustervisor::ClusterConfig;
    ///
    /// let mut cfg = ClusterConfig::default();
    /// assert_eq!(cfg.resolve_worker_count(true), 2);
    ///
    /// cfg.workers = Some(5);
    /// assert_eq!(cfg.resolve_worker_count(true), 5);
    /// ```
    pub fn resolve_worker_count(&self, ci: bool) -> usize {
        match self.workers {
            Some(n) => n,
            None if ci => CI_WORKERS,
            None => num_cpus::get().max(1),
        }
    }

    /// Pool size for the current environment.
    pub fn worker_count(&self) -> usize {
        self.resolve_worker_count(running_in_ci())
    }

    /// The three escalation timeouts, in escalation order.
    #[inline]
    pub fn escalation_timeouts(&self) -> [Duration; 3] {
        [self.sigint_timeout, self.sigterm_timeout, self.sigkill_timeout]
    }

    /// Total time a worker can take to die before escalation fails.
    #[inline]
    pub fn escalation_budget(&self) -> Duration {
        self.escalation_timeouts().iter().sum()
    }

    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for ClusterConfig {
    /// Default configuration:
    ///
    /// - one worker per core, SIGINT handler installed
    /// - 5s per escalation step
    /// - `bus_capacity = 1024`
    /// - `respawn_backoff = BackoffPolicy::default()`
    /// - no auto-reload, `status_timeout = 5s`
    fn default() -> Self {
        Self {
            workers: None,
            handle_signals: true,
            sigint_timeout: Duration::from_secs(5),
            sigterm_timeout: Duration::from_secs(5),
            sigkill_timeout: Duration::from_secs(5),
            bus_capacity: 1024,
            respawn_backoff: BackoffPolicy::default(),
            auto_reload: false,
            watch_paths: Vec::new(),
            master_file: None,
            status_timeout: Duration::from_secs(5),
        }
    }
}

/// True when the `CI` environment variable is set (to anything).
pub fn running_in_ci() -> bool {
    std::env::var_os(CI_ENV).is_some()
}
