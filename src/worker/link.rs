//! # WorkerLink: the worker end of the master channel.
//!
//! ```text
//!   up:   emit ─► local EventBus ─► "*" forwarder ─► not relayed? ─► outbound ─┐
//!         listening() / log() ─────────────────────────────────────► outbound ─┤
//!                                                               run(): stdout ◄┘
//!
//!   down: stdin ─► run() ─► handle_master_line ─► receive_remote(Master) ─► local EventBus
//! ```
//!
//! Events that came from the master are marked relayed and never go back up.
//! On stdin EOF `run` flushes whatever is still queued, then returns.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bus::{EventBus, Sender, SubscriptionId};
use crate::process::{WORKER_ID_ENV, WorkerId};
use crate::protocol::{self, MasterMessage, WorkerMessage};

/// Reads the worker id the master put in the environment.
pub fn worker_id_from_env() -> Option<WorkerId> {
    std::env::var(WORKER_ID_ENV).ok()?.trim().parse().ok()
}

/// Connects a worker's local bus to the master.
pub struct WorkerLink {
    id: WorkerId,
    bus: EventBus,
    outbound: mpsc::UnboundedSender<WorkerMessage>,
    forward: SubscriptionId,
}

impl WorkerLink {
    /// Creates the link and its bus. Messages for the master are queued on the
    /// returned receiver.
    pub fn new(id: WorkerId) -> (Self, mpsc::UnboundedReceiver<WorkerMessage>) {
        let bus = EventBus::new(Sender::Worker(id));
        let (outbound, rx) = mpsc::unbounded_channel();

        let tx = outbound.clone();
        let forward = bus.on_any(move |name, meta, payload| {
            if meta.is_relayed() {
                return;
            }
            let _ = tx.send(WorkerMessage::event(name, meta, payload));
        });

        (
            Self {
                id,
                bus,
                outbound,
                forward,
            },
            rx,
        )
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// The worker's local bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Tells the master this worker is ready to serve.
    pub fn listening(&self, address: Option<String>) {
        let _ = self.outbound.send(WorkerMessage::Listening { address });
    }

    /// Sends a log line to the master's logging sink.
    pub fn log(&self, level: &str, args: Vec<Value>) {
        let _ = self.outbound.send(WorkerMessage::Log {
            level: level.to_string(),
            args,
        });
    }

    /// Handles one line received from the master.
    ///
    /// Returns `false` when the line is not a master event message.
    pub fn handle_master_line(&self, line: &str) -> bool {
        let Some(value) = protocol::parse_line(line) else {
            return false;
        };
        match serde_json::from_value::<MasterMessage>(value) {
            Ok(MasterMessage::Event { args }) => self.bus.receive_remote(Sender::Master, &args),
            Err(e) => {
                debug!(worker_id = self.id, error = %e, "ignoring unknown master message");
                false
            }
        }
    }

    /// Pumps the channel until `input` reaches EOF.
    ///
    /// Outbound messages are written to `output` one per line.
    pub async fn run<R, W>(
        &self,
        input: R,
        mut output: W,
        mut outbound: mpsc::UnboundedReceiver<WorkerMessage>,
    ) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        self.handle_master_line(&line);
                    }
                    None => break,
                },
                Some(message) = outbound.recv() => {
                    let line = protocol::encode_line(&message)?;
                    output.write_all(line.as_bytes()).await?;
                    output.flush().await?;
                }
            }
        }
        // Drain whatever was queued before the master closed our stdin.
        while let Ok(message) = outbound.try_recv() {
            let line = protocol::encode_line(&message)?;
            if let Err(e) = output.write_all(line.as_bytes()).await {
                warn!(worker_id = self.id, error = %e, "dropping outbound message after EOF");
                break;
            }
        }
        output.flush().await
    }

    /// [`WorkerLink::run`] over the process's own stdin/stdout.
    pub async fn run_stdio(&self, outbound: mpsc::UnboundedReceiver<WorkerMessage>) -> std::io::Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        self.run(stdin, tokio::io::stdout(), outbound).await
    }
}

impl Drop for WorkerLink {
    fn drop(&mut self) {
        self.bus.off(self.forward);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventMeta, MASTER_STATUS};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn event_line(name: &str, payload: Value) -> String {
        let msg = MasterMessage::event(name, &EventMeta::now(Sender::Master), &payload);
        protocol::encode_line(&msg).unwrap()
    }

    #[tokio::test]
    async fn local_events_go_up_and_master_events_do_not_echo() {
        let (link, mut rx) = WorkerLink::new(3);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        link.bus().on("result.new", move |meta, payload| {
            s.lock().unwrap().push((meta.is_relayed(), payload.clone()));
        });

        link.bus().emit("result.new", json!({"n": 1}));
        match rx.try_recv().unwrap() {
            WorkerMessage::Event { args } => {
                assert_eq!(args[0], json!("result.new"));
                assert_eq!(args[1]["sender"], json!({"worker": 3}));
                assert_eq!(args[2], json!({"n": 1}));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(link.handle_master_line(&event_line("result.new", json!({"n": 2}))));
        assert!(rx.try_recv().is_err(), "relayed event must not be sent back");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(false, json!({"n": 1})), (true, json!({"n": 2}))]
        );
    }

    #[tokio::test]
    async fn non_event_lines_are_ignored() {
        let (link, _rx) = WorkerLink::new(1);
        assert!(!link.handle_master_line(""));
        assert!(!link.handle_master_line("not json"));
        assert!(!link.handle_master_line(r#"{"type":"chuaange"}"#));
    }

    #[tokio::test]
    async fn request_resolves_from_master_response() {
        let (link, mut rx) = WorkerLink::new(2);
        let bus = link.bus().clone();
        let pending = tokio::spawn(async move {
            bus.request(MASTER_STATUS, json!({}), Duration::from_secs(5)).await
        });

        let id = loop {
            match rx.recv().await.unwrap() {
                WorkerMessage::Event { args } if args[0] == json!(MASTER_STATUS) => {
                    break args[2]["id"].as_str().unwrap().to_string();
                }
                _ => continue,
            }
        };
        let meta = EventMeta::now(Sender::Master).with_correlation(id);
        let reply = MasterMessage::event("masterStatus.response", &meta, &json!({"hostname": "h"}));
        assert!(link.handle_master_line(&protocol::encode_line(&reply).unwrap()));

        let event = pending.await.unwrap().unwrap();
        assert_eq!(event.payload, json!({"hostname": "h"}));
    }

    #[tokio::test]
    async fn run_pumps_both_directions() {
        let (link, rx) = WorkerLink::new(5);
        link.listening(Some("0.0.0.0:3000".into()));
        link.log("info", vec![json!("ready")]);

        let input = tokio::io::BufReader::new(&b""[..]);
        let mut output = Vec::new();
        link.run(input, &mut output, rx).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines[0], json!({"type": "listening", "address": "0.0.0.0:3000"}));
        assert_eq!(lines[1], json!({"type": "log", "level": "info", "args": ["ready"]}));
    }
}
