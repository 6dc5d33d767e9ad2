//! Runtime core: the cluster master and its building blocks.
//!
//! The public entry point is [`ClusterMaster`], built with [`ClusterMasterBuilder`].
//!
//! Internal modules:
//! - [`master`]: fork/monitor/respawn loop, bus handlers, shutdown;
//! - [`escalation`]: SIGINT → SIGTERM → SIGKILL for one worker;
//! - [`pool`]: id → handle table;
//! - [`worker`]: per-worker handle and state machine;
//! - [`stats`]: `masterStatus` snapshot;
//! - [`death`] / [`log_relay`]: exit classification and worker log forwarding;
//! - [`shutdown`]: cross-platform SIGINT listener;
//! - [`hooks`]: `listen` / `on_exit` seam.

mod builder;
mod config;
mod death;
mod escalation;
mod hooks;
mod log_relay;
mod master;
mod pool;
mod shutdown;
mod stats;
mod worker;

pub use builder::ClusterMasterBuilder;
pub use config::{CI_ENV, CI_WORKERS, ClusterConfig, running_in_ci};
pub use death::{DeathSeverity, classify_death, log_master_death, log_worker_death};
pub use escalation::kill_worker;
pub use hooks::{ProcessExit, ProcessHooks};
pub use log_relay::{format_worker_log, relay_worker_log};
pub use master::ClusterMaster;
pub use stats::{ClusterStats, CpuInfo, MasterStats, OsInfo, OsStats, StatsCollector};
pub use worker::{WorkerHandle, WorkerState, WorkerStatus};
