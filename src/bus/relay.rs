//! # Relay rules for crossing the process boundary.
//!
//! Echo suppression is an explicit rule, not a side effect of emission order:
//!
//! | origin    | name in `local_only` | relayed to workers |
//! |-----------|----------------------|--------------------|
//! | `Local`   | no                   | yes                |
//! | `Local`   | yes                  | no                 |
//! | `Relayed` | any                  | no                 |
//!
//! An event that came in from a worker is emitted locally and stops there.

use std::collections::HashSet;

use serde_json::Value;

use super::event::{EventMeta, Origin};

/// Wildcard subscription name.
pub const WILDCARD: &str = "*";
/// Request for master stats (`{ "id": <correlation id> }`).
pub const MASTER_STATUS: &str = "masterStatus";
/// Worker-affecting source change (payload: reason string).
pub const WORKER_RESTART_NEEDED: &str = "workerRestartNeeded";
/// Master-affecting source change (payload: reason string).
pub const SYSTEM_RESTART_NEEDED: &str = "systemRestartNeeded";

/// Name of the response event for a request called `request`.
pub fn response_name(request: &str) -> String {
    format!("{request}.response")
}

/// Decides which bus events are relayed to workers.
#[derive(Clone, Debug)]
pub struct RelayPolicy {
    local_only: HashSet<String>,
}

impl Default for RelayPolicy {
    /// Control events stay on the master: `masterStatus`,
    /// `workerRestartNeeded`, `systemRestartNeeded`.
    fn default() -> Self {
        Self::permissive()
            .with_local_only(MASTER_STATUS)
            .with_local_only(WORKER_RESTART_NEEDED)
            .with_local_only(SYSTEM_RESTART_NEEDED)
    }
}

impl RelayPolicy {
    /// Relays every locally emitted event.
    pub fn permissive() -> Self {
        Self {
            local_only: HashSet::new(),
        }
    }

    /// Marks `name` as never leaving this process.
    #[must_use]
    pub fn with_local_only(mut self, name: impl Into<String>) -> Self {
        self.local_only.insert(name.into());
        self
    }

    #[inline]
    pub fn is_local_only(&self, name: &str) -> bool {
        self.local_only.contains(name)
    }

    /// Applies the rule table.
    pub fn should_relay(&self, name: &str, meta: &EventMeta) -> bool {
        meta.origin == Origin::Local && !self.is_local_only(name)
    }
}

/// Wire form of an event: `[name, meta, payload]`.
pub fn encode_event_args(name: &str, meta: &EventMeta, payload: &Value) -> Vec<Value> {
    vec![
        Value::String(name.to_string()),
        serde_json::to_value(meta).unwrap_or(Value::Null),
        payload.clone(),
    ]
}

/// Reads `[name, meta?, payload?, ...]`. Extra trailing values are ignored.
///
/// Returns `None` when the first element is not a string. Metadata that does not
/// parse yields `None` in the second slot; a missing payload becomes `null`.
pub fn decode_event_args(args: &[Value]) -> Option<(String, Option<EventMeta>, Value)> {
    let name = args.first()?.as_str()?.to_string();
    let meta = args
        .get(1)
        .and_then(|m| serde_json::from_value::<EventMeta>(m.clone()).ok());
    let payload = args.get(2).cloned().unwrap_or(Value::Null);
    Some((name, meta, payload))
}
