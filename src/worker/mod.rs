//! # Worker side of the channel.
//!
//! A worker process owns one [`WorkerLink`]. The link gives the worker a local
//! [`EventBus`](crate::EventBus) and keeps it connected to the master's bus:
//!
//! ```text
//!   worker code ── emit ──► local EventBus ──(local origin)──► {type:'event'} ──► stdout
//!   stdin ──► {type:'event'} ──► receive_remote(Master) ──► local EventBus (relayed, not sent back)
//! ```
//!
//! [`WorkerLink::run_stdio`] pumps the process's stdin/stdout; tests drive the
//! link through [`WorkerLink::handle_master_line`] and the outbound receiver.

mod link;

pub use link::{WorkerLink, worker_id_from_env};
