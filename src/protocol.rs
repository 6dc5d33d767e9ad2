//! # Master ⇄ worker channel protocol.
//!
//! Newline-delimited JSON. Worker → master travels over the worker's stdout,
//! master → worker over its stdin. Every message is an object tagged by `type`:
//!
//! ```text
//! {"type":"log","level":"info","args":["listening on", 3000]}
//! {"type":"event","args":["masterStatus", {meta}, {"id":"..."}]}
//! {"type":"listening","address":"0.0.0.0:3000"}
//! ```
//!
//! The master validates lazily: a line is first parsed as JSON, and only
//! dispatch looks at `type`. A line that is not JSON still reaches dispatch (as a
//! JSON string) so it is reported as malformed instead of disappearing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::bus::{EventMeta, encode_event_args};

/// Messages a worker sends to the master.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    /// Log line for the master's logging sink.
    Log {
        #[serde(default = "default_level")]
        level: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Bus event: `args = [name, meta, payload, ...]`.
    Event {
        #[serde(default)]
        args: Vec<Value>,
    },
    /// The worker bound its service socket.
    Listening {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<String>,
    },
}

/// Messages the master sends to a worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MasterMessage {
    /// Bus event relayed from the master: `args = [name, meta, payload]`.
    Event { args: Vec<Value> },
}

/// Why a worker message was rejected.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message has no 'type' field")]
    MissingType,
    #[error("unknown message type '{0}'")]
    UnknownType(String),
    #[error("invalid '{kind}' message: {source}")]
    Invalid {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

fn default_level() -> String {
    "debug".to_string()
}

impl WorkerMessage {
    /// Builds an `event` message.
    pub fn event(name: &str, meta: &EventMeta, payload: &Value) -> Self {
        WorkerMessage::Event {
            args: encode_event_args(name, meta, payload),
        }
    }

    /// Validates an already-parsed message.
    pub fn classify(data: &Value) -> Result<Self, MessageError> {
        let kind = data
            .get("type")
            .and_then(Value::as_str)
            .ok_or(MessageError::MissingType)?;
        if !matches!(kind, "log" | "event" | "listening") {
            return Err(MessageError::UnknownType(kind.to_string()));
        }
        serde_json::from_value(data.clone()).map_err(|source| MessageError::Invalid {
            kind: kind.to_string(),
            source,
        })
    }
}

impl MasterMessage {
    /// Builds an `event` message.
    pub fn event(name: &str, meta: &EventMeta, payload: &Value) -> Self {
        MasterMessage::Event {
            args: encode_event_args(name, meta, payload),
        }
    }
}

/// Encodes one message as a single line (trailing `\n` included).
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parses one received line. Blank lines yield `None`; non-JSON text is kept as a string.
pub fn parse_line(line: &str) -> Option<Value> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string())))
}
