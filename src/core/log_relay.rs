//! Forwards `{type:'log'}` worker messages to the master's tracing sink.

use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::process::WorkerId;

/// Logs `args` at the worker-supplied `level`, prefixed with `<Worker#id>`.
///
/// Levels: `error`, `warn`, `info`, `verbose`/`debug`, `silly`/`trace`.
/// Unknown levels log at `info` with the original level attached.
pub fn relay_worker_log(id: WorkerId, level: &str, args: &[Value]) {
    let message = format_worker_log(id, args);
    match level {
        "error" => error!(target: "worker", worker_id = id, "{message}"),
        "warn" | "warning" => warn!(target: "worker", worker_id = id, "{message}"),
        "info" => info!(target: "worker", worker_id = id, "{message}"),
        "verbose" | "debug" => debug!(target: "worker", worker_id = id, "{message}"),
        "silly" | "trace" => trace!(target: "worker", worker_id = id, "{message}"),
        other => info!(target: "worker", worker_id = id, level = other, "{message}"),
    }
}

/// Joins the log arguments the way a console logger would: strings verbatim,
/// everything else as JSON.
pub fn format_worker_log(id: WorkerId, args: &[Value]) -> String {
    let mut out = format!("<Worker#{id}>");
    for arg in args {
        out.push(' ');
        match arg {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
    }
    out
}
