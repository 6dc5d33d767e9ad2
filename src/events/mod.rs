//! Lifecycle events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to lifecycle events emitted by the cluster master.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! These are distinct from the named cross-process [`EventBus`](crate::bus::EventBus):
//! lifecycle events never leave the master process.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
