//! # clustervisor
//!
//! **Clustervisor** is the master side of a multi-process service: it forks one
//! worker per CPU core, keeps the pool at size, stops workers with an escalating
//! signal sequence, reloads them when sources change and runs a named event bus
//! that spans the master and every worker.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   worker #1  │   │   worker #2  │   │   worker #N  │
//!     │ (WorkerLink) │   │ (WorkerLink) │   │ (WorkerLink) │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            │ stdin/stdout: newline-delimited JSON (log | event | listening)
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  ClusterMaster                                                    │
//! │  - WorkerPool (id → WorkerHandle)                                 │
//! │  - EventBus   (named events, "*" relay to workers, correlation)   │
//! │  - FileListener (optional, notify-backed)                         │
//! │  - kill escalation: SIGINT → SIGTERM → SIGKILL                    │
//! └──────┬────────────────────────────────────────────────────────────┘
//!        │ publish(Event): WorkerForked, WorkerExited, KillSignalSent, ...
//!        ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │               (capacity: ClusterConfig::bus_capacity)             │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │  subscriber_listener   │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                             SubscriberSet
//!                           (per-sub queues)
//!                        ┌──────────┼──────────┐
//!                        ▼          ▼          ▼
//!                    LogWriter    sub2       subN
//! ```
//!
//! ### Worker lifecycle
//! ```text
//! fork_worker ──► starting ──listening──► listening ──kill──► exiting ──exit──► dead
//!                     │                       │
//!                     └─exit─► StartupFailed  └─exit (crash)─► backoff ─► fork_worker
//! ```
//!
//! ## Features
//! | Area              | Description                                                     | Key types / traits                      |
//! |-------------------|-----------------------------------------------------------------|-----------------------------------------|
//! | **Master**        | Fork, monitor, respawn, reload and stop the worker pool.        | [`ClusterMaster`], [`ClusterConfig`]    |
//! | **Event bus**     | Named events with wildcard subscribers and cross-process relay. | [`EventBus`], [`RelayPolicy`]           |
//! | **Processes**     | Seam between the master and OS processes.                       | [`Spawn`], [`WorkerProcess`]            |
//! | **Worker side**   | Worker end of the channel protocol.                             | [`WorkerLink`]                          |
//! | **Auto-reload**   | File changes become restart requests.                           | [`FileListener`]                        |
//! | **Subscriber API**| Hook into lifecycle events.                                     | [`Subscribe`], [`LogWriter`]            |
//! | **Errors**        | Typed errors with stable labels.                                | [`ClusterError`]                        |
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use clustervisor::{ClusterConfig, ClusterMaster, CommandSpawner, LogWriter, Subscribe};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = ClusterConfig::default();
//!     let spawner = Arc::new(CommandSpawner::new("./my-service"));
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
//!
//!     let master = ClusterMaster::builder(cfg, spawner)
//!         .with_subscribers(subs)
//!         .build();
//!
//!     // Forks the pool, then waits for SIGINT.
//!     master.run().await?;
//!     Ok(())
//! }
//! ```
mod bus;
mod core;
mod error;
mod events;
mod policies;
mod process;
mod protocol;
mod subscribers;
mod watch;
mod worker;

// ---- Public re-exports ----

pub use bus::{
    BusEvent, EventBus, EventMeta, MASTER_STATUS, Origin, RelayPolicy, SYSTEM_RESTART_NEEDED,
    Sender, SubscriptionId, WILDCARD, WORKER_RESTART_NEEDED, decode_event_args,
    encode_event_args, response_name,
};
pub use self::core::{
    CI_ENV, CI_WORKERS, ClusterConfig, ClusterMaster, ClusterMasterBuilder, ClusterStats,
    CpuInfo, DeathSeverity, MasterStats, OsInfo, OsStats, ProcessExit, ProcessHooks,
    StatsCollector, WorkerHandle, WorkerState, WorkerStatus, classify_death, format_worker_log,
    kill_worker, log_master_death, log_worker_death, relay_worker_log, running_in_ci,
};
pub use error::ClusterError;
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use process::{
    CommandSpawner, ExitInfo, KillSignal, ROLE_ENV, Spawn, SpawnedWorker, WORKER_ID_ENV,
    WorkerEvent, WorkerId, WorkerProcess, signal_name,
};
pub use protocol::{MasterMessage, MessageError, WorkerMessage, encode_line, parse_line};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use watch::{FileEvent, FileEventKind, FileListener, classify as classify_file_event};
pub use worker::{WorkerLink, worker_id_from_env};
