//! # EventBus: synchronous named publish/subscribe.
//!
//! ```text
//! emit("testEvent", payload)
//!    │  snapshot handlers under the read lock, then release it
//!    ├─► exact "testEvent"  handler(meta, payload)          (registration order)
//!    └─► wildcard "*"       handler("testEvent", meta, payload)
//! ```
//!
//! ## Rules
//! - Delivery is synchronous and in registration order, exact and wildcard
//!   handlers interleaved as they were registered.
//! - A handler registered after an emission never sees it (no replay).
//! - Handlers may emit, subscribe or unsubscribe; the lock is not held while
//!   they run. A nested emission is fully delivered before the outer handler returns.
//! - A panicking handler is logged and skipped; the remaining handlers still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::error;

use super::event::{BusEvent, EventMeta, Origin, Sender};
use super::relay::{WILDCARD, decode_event_args, response_name};
use crate::error::ClusterError;
use crate::process::WorkerId;

/// Handle returned by subscriptions; pass it to [`EventBus::off`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type ExactHandler = Arc<dyn Fn(&EventMeta, &Value) + Send + Sync>;
type WildcardHandler = Arc<dyn Fn(&str, &EventMeta, &Value) + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Exact(String, ExactHandler),
    Wildcard(WildcardHandler),
}

struct Entry {
    id: SubscriptionId,
    handler: Handler,
}

struct Inner {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

/// Process-wide named event bus. Cheap to clone; clones share subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender,
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sender", &self.sender)
            .field("subscribers", &self.len())
            .finish()
    }
}

impl EventBus {
    /// Creates an empty bus whose local emissions are stamped with `sender`.
    pub fn new(sender: Sender) -> Self {
        Self {
            sender,
            inner: Arc::new(Inner {
                entries: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Identity stamped on local emissions.
    pub fn sender(&self) -> Sender {
        self.sender
    }

    /// Subscribes to one event name. The handler receives `(meta, payload)`.
    ///
    /// Subscribing to [`WILDCARD`] here registers an exact-name handler for the
    /// literal name `"*"`; use [`EventBus::on_any`] for wildcard delivery.
    pub fn on<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&EventMeta, &Value) + Send + Sync + 'static,
    {
        self.register(Handler::Exact(name.to_string(), Arc::new(handler)))
    }

    /// Subscribes to every event. The handler receives `(name, meta, payload)`.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &EventMeta, &Value) + Send + Sync + 'static,
    {
        self.register(Handler::Wildcard(Arc::new(handler)))
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Removes every subscription.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Number of subscribers that would receive an emission of `name`
    /// (wildcards included).
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.read()
            .iter()
            .filter(|e| match &e.handler {
                Handler::Exact(n, _) => n == name,
                Handler::Wildcard(_) => name != WILDCARD,
            })
            .count()
    }

    /// Total number of subscriptions.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Emits `name` with fresh local metadata.
    pub fn emit(&self, name: &str, payload: Value) {
        self.emit_with_meta(name, EventMeta::now(self.sender), payload);
    }

    /// Emits `name` with caller-supplied metadata.
    pub fn emit_with_meta(&self, name: &str, meta: EventMeta, payload: Value) {
        let handlers: Vec<Handler> = self
            .read()
            .iter()
            .filter(|e| match &e.handler {
                Handler::Exact(n, _) => n == name,
                Handler::Wildcard(_) => true,
            })
            .map(|e| e.handler.clone())
            .collect();

        for handler in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| match &handler {
                Handler::Exact(_, f) => f(&meta, &payload),
                Handler::Wildcard(f) => f(name, &meta, &payload),
            }));
            if outcome.is_err() {
                error!(event = name, "bus handler panicked; continuing with remaining handlers");
            }
        }
    }

    /// Re-emits an event that arrived over the process channel.
    ///
    /// `args` is the wire form `[name, meta, payload, ...]`. The event is marked
    /// [`Origin::Relayed`]; when it comes from a worker, the sender is taken from
    /// the channel rather than from the message. Returns `false` for args that
    /// do not name an event.
    pub fn receive_remote(&self, from: Sender, args: &[Value]) -> bool {
        let Some((name, meta, payload)) = decode_event_args(args) else {
            return false;
        };
        let mut meta = meta.unwrap_or_else(|| EventMeta::now(from));
        if matches!(from, Sender::Worker(_)) {
            meta.sender = from;
        }
        meta.origin = Origin::Relayed;
        self.emit_with_meta(&name, meta, payload);
        true
    }

    /// Master-side entry point for `{type:'event', args:[...]}` worker messages.
    pub fn cluster_event_handler(&self, worker: WorkerId, data: &Value) -> bool {
        match data.get("args").and_then(Value::as_array) {
            Some(args) => self.receive_remote(Sender::Worker(worker), args),
            None => false,
        }
    }

    /// Emits the correlated response to a request previously sent with
    /// [`EventBus::request`].
    pub fn respond(&self, request: &str, correlation_id: &str, payload: Value) {
        let meta = EventMeta::now(self.sender).with_correlation(correlation_id);
        self.emit_with_meta(&response_name(request), meta, payload);
    }

    /// Sends `request` and waits for the first response carrying the same
    /// correlation id.
    ///
    /// The request payload gets an `"id"` field (objects) or is wrapped as
    /// `{"id": .., "data": ..}`. The one-shot response subscription is removed
    /// when this future completes, times out or is dropped.
    pub async fn request(
        &self,
        request: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<BusEvent, ClusterError> {
        let id = uuid::Uuid::new_v4().to_string();
        let reply_name = response_name(request);
        let (tx, rx) = oneshot::channel::<BusEvent>();
        let slot = Mutex::new(Some(tx));
        let wanted = id.clone();
        let event_name = reply_name.clone();

        let sub = self.on(&reply_name, move |meta, payload| {
            if meta.correlation_id.as_deref() != Some(wanted.as_str()) {
                return;
            }
            let tx = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(tx) = tx {
                let _ = tx.send(BusEvent {
                    name: event_name.clone(),
                    meta: meta.clone(),
                    payload: payload.clone(),
                });
            }
        });
        let _guard = Unsubscribe { bus: self, id: sub };

        let meta = EventMeta::now(self.sender).with_correlation(id.clone());
        self.emit_with_meta(request, meta, with_request_id(payload, &id));

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(event)) => Ok(event),
            _ => Err(ClusterError::RequestTimeout {
                event: request.to_string(),
                timeout,
            }),
        }
    }

    fn register(&self, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.write().push(Entry { id, handler });
        id
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Entry>> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Entry>> {
        self.inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drops a subscription when it goes out of scope.
struct Unsubscribe<'a> {
    bus: &'a EventBus,
    id: SubscriptionId,
}

impl Drop for Unsubscribe<'_> {
    fn drop(&mut self) {
        self.bus.off(self.id);
    }
}

fn with_request_id(payload: Value, id: &str) -> Value {
    match payload {
        Value::Object(mut map) => {
            map.insert("id".to_string(), Value::String(id.to_string()));
            Value::Object(map)
        }
        Value::Null => {
            let mut map = Map::new();
            map.insert("id".to_string(), Value::String(id.to_string()));
            Value::Object(map)
        }
        other => {
            let mut map = Map::new();
            map.insert("id".to_string(), Value::String(id.to_string()));
            map.insert("data".to_string(), other);
            Value::Object(map)
        }
    }
}
