//! # Lifecycle event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out
//! and the built-in [`LogWriter`].
//!
//! ## Architecture
//! ```text
//!   ClusterMaster ── publish(Event) ──► Bus ──► subscriber_listener
//!                                                      │
//!                                                      ▼
//!                                               SubscriberSet::emit
//!                                          ┌───────────┼───────────┐
//!                                          ▼           ▼           ▼
//!                                      LogWriter    Metrics      Custom
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use clustervisor::{Event, EventKind, Subscribe};
//! use async_trait::async_trait;
//!
//! struct CrashCounter;
//!
//! #[async_trait]
//! impl Subscribe for CrashCounter {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::WorkerExited && event.voluntary == Some(false) {
//!             // increment crash counter
//!         }
//!     }
//!     fn name(&self) -> &'static str { "crash-counter" }
//! }
//! ```

mod log;
mod subscribe;
mod subscriber_set;

pub use log::LogWriter;
pub use subscribe::Subscribe;
pub use subscriber_set::SubscriberSet;
