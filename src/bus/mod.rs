//! Named publish/subscribe bus shared by the master and relayed to workers.
//!
//! This is the application-level bus: string event names, JSON payloads,
//! exact-name and wildcard (`*`) subscribers, synchronous delivery. It is
//! separate from the typed lifecycle stream in [`crate::events`], which only
//! carries supervision events for observability.
//!
//! ## Contents
//! - [`EventBus`] subscribe / emit / request-response
//! - [`BusEvent`], [`EventMeta`], [`Sender`], [`Origin`] event data model
//! - [`RelayPolicy`] which events cross the process boundary
//!
//! ## Cross-process path
//! ```text
//!  worker bus ──(origin=Local)──► {type:event} ──► master: cluster_event_handler
//!                                                      └─► emit locally (origin=Relayed)
//!                                                             └─► wildcard relay skips it
//!  master bus ──(origin=Local, not local-only)──► broadcast to every worker
//!                                                      └─► worker emits (origin=Relayed)
//! ```

mod event;
mod event_bus;
mod relay;

pub use event::{BusEvent, EventMeta, Origin, Sender};
pub use event_bus::{EventBus, SubscriptionId};
pub use relay::{
    MASTER_STATUS, RelayPolicy, SYSTEM_RESTART_NEEDED, WILDCARD, WORKER_RESTART_NEEDED,
    decode_event_args, encode_event_args, response_name,
};
