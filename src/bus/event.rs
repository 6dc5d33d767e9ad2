//! # Bus event data model.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::process::WorkerId;

/// Process that emitted an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Master,
    Worker(WorkerId),
}

/// Whether an event was emitted in this process or arrived over the channel.
///
/// Origin is a per-process notion and never goes over the wire: the receiving
/// side always marks incoming events as [`Origin::Relayed`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Origin {
    #[default]
    Local,
    Relayed,
}

/// Metadata attached to every emission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub sender: Sender,
    #[serde(skip)]
    pub origin: Origin,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: u64,
    /// Correlation id for request/response pairs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl EventMeta {
    /// Local metadata stamped with the current time.
    pub fn now(sender: Sender) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            sender,
            origin: Origin::Local,
            timestamp,
            correlation_id: None,
        }
    }

    #[inline]
    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    #[inline]
    pub fn is_relayed(&self) -> bool {
        self.origin == Origin::Relayed
    }
}

/// One emission, as seen by a subscriber.
#[derive(Clone, Debug, PartialEq)]
pub struct BusEvent {
    pub name: String,
    pub meta: EventMeta,
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn origin_is_not_serialized() {
        let mut meta = EventMeta::now(Sender::Worker(4)).with_correlation("abc");
        meta.origin = Origin::Relayed;

        let wire = serde_json::to_value(&meta).unwrap();
        assert_eq!(wire["sender"], json!({"worker": 4}));
        assert_eq!(wire["correlationId"], json!("abc"));
        assert!(wire.get("origin").is_none());

        let back: EventMeta = serde_json::from_value(wire).unwrap();
        assert_eq!(back.origin, Origin::Local);
        assert_eq!(back.sender, Sender::Worker(4));
    }

    #[test]
    fn master_sender_is_a_plain_string() {
        let wire = serde_json::to_value(EventMeta::now(Sender::Master)).unwrap();
        assert_eq!(wire["sender"], json!("master"));
        assert!(wire.get("correlationId").is_none());
    }
}
