//! # ClusterMaster: forks, watches, reloads and stops the worker pool.
//!
//! ## High-level architecture
//! ```text
//! initialize(auto_reload):
//!   - bus handlers:  "*"                   ─► broadcast_handler   (relay to workers)
//!                    "masterStatus"        ─► status_handler      (correlated stats reply)
//!                    "workerRestartNeeded" ─► handle_worker_restart ─► reload_all_workers
//!                    "systemRestartNeeded" ─► graceful shutdown, exit code 0
//!   - SIGINT task:   InterruptListener ─► handle_sigint
//!   - file listener: (auto_reload only)
//!   - fork N workers concurrently ─► all `listening` ─► hooks.listen() ─► PoolReady
//!
//! per worker (monitor task, sole consumer of the worker's event stream):
//!   Listening  ─► state = listening, crash counter reset, fork resolves
//!   Message    ─► on_worker_message ─► event: EventBus::cluster_event_handler
//!                                      log:   relay_worker_log
//!                                      other: MalformedMessage, dropped
//!   Exit       ─► pool.remove ─► state = dead
//!                 ├─ before listening ─► fork rejects with StartupFailed (no retry)
//!                 └─ after listening  ─► handle_worker_exit
//!                                        ├─ voluntary or shutting down ─► log only
//!                                        └─ crash ─► backoff ─► fork one replacement
//!
//! reload_worker(id):
//!   mark_disconnecting ─► not first? AlreadyExiting (someone else owns the exit)
//!   ─► kill ─► fork_worker
//!
//! handle_sigint:
//!   shutting_down = true (under the fork gate) ─► kill every worker concurrently (SIGINT → SIGTERM → SIGKILL)
//!   ─► dispose() ─► hooks.on_exit(0 | 1)   (exactly once)
//! ```
//!
//! `fork_worker` checks the shutdown flag and inserts into the pool under the
//! same gate that `terminate` raises the flag under, so every worker forked
//! before shutdown is in the pool `terminate` kills and none is forked after.
//!
//! Bus handlers hold a `Weak` reference to the master, so the subscriptions never
//! keep it alive. Lifecycle events go to the broadcast [`Bus`] and from there to
//! the [`SubscriberSet`].

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::ClusterConfig;
use super::death::log_worker_death;
use super::escalation::kill_worker;
use super::hooks::ProcessHooks;
use super::log_relay::relay_worker_log;
use super::pool::WorkerPool;
use super::shutdown::InterruptListener;
use super::stats::{ClusterStats, StatsCollector};
use super::worker::WorkerHandle;
use crate::bus::{
    EventBus, EventMeta, MASTER_STATUS, RelayPolicy, SYSTEM_RESTART_NEEDED, SubscriptionId,
    WORKER_RESTART_NEEDED,
};
use crate::error::ClusterError;
use crate::events::{Bus, Event, EventKind};
use crate::process::{ExitInfo, Spawn, SpawnedWorker, WorkerEvent, WorkerId};
use crate::protocol::{MasterMessage, WorkerMessage};
use crate::subscribers::SubscriberSet;
use crate::watch::FileListener;

type Ready = oneshot::Sender<Result<(), ClusterError>>;

/// Owner of the worker pool.
pub struct ClusterMaster {
    cfg: ClusterConfig,
    bus: EventBus,
    events: Bus,
    subs: Arc<SubscriberSet>,
    pool: WorkerPool,
    spawner: Arc<dyn Spawn>,
    hooks: Arc<dyn ProcessHooks>,
    relay: RelayPolicy,
    stats: StatsCollector,

    next_id: AtomicU32,
    crashes: AtomicU32,
    target_workers: AtomicUsize,
    shutting_down: AtomicBool,
    exit_called: AtomicBool,
    fork_gate: Mutex<()>,
    token: CancellationToken,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    file_listener: Mutex<Option<Arc<FileListener>>>,
    me: Weak<ClusterMaster>,
}

pub(crate) struct MasterParts {
    pub cfg: ClusterConfig,
    pub bus: EventBus,
    pub events: Bus,
    pub subs: Arc<SubscriberSet>,
    pub spawner: Arc<dyn Spawn>,
    pub hooks: Arc<dyn ProcessHooks>,
    pub relay: RelayPolicy,
}

impl ClusterMaster {
    pub(crate) fn new_internal(parts: MasterParts) -> Arc<Self> {
        let target = parts.cfg.worker_count();
        Arc::new_cyclic(|me| Self {
            cfg: parts.cfg,
            bus: parts.bus,
            events: parts.events,
            subs: parts.subs,
            pool: WorkerPool::new(),
            spawner: parts.spawner,
            hooks: parts.hooks,
            relay: parts.relay,
            stats: StatsCollector::new(),
            next_id: AtomicU32::new(1),
            crashes: AtomicU32::new(0),
            target_workers: AtomicUsize::new(target),
            shutting_down: AtomicBool::new(false),
            exit_called: AtomicBool::new(false),
            fork_gate: Mutex::new(()),
            token: CancellationToken::new(),
            subscriptions: Mutex::new(Vec::new()),
            file_listener: Mutex::new(None),
            me: me.clone(),
        })
    }

    /// Initializes the cluster and runs until shutdown completes.
    ///
    /// If the pool cannot be brought up, the workers that did start are killed
    /// and the error is returned.
    pub async fn run(&self) -> Result<(), ClusterError> {
        if let Err(e) = self.initialize(self.cfg.auto_reload).await {
            error!(error = %e, label = e.as_label(), "cluster initialization failed");
            if let Err(kill_err) = self.kill_all_workers().await {
                error!(error = %kill_err, "failed to stop workers after initialization failure");
            }
            self.dispose();
            return Err(e);
        }
        self.token.cancelled().await;
        Ok(())
    }

    /// Registers handlers, forks the pool and waits until every worker listens.
    ///
    /// Resolves with the first fork error once every fork has settled.
    pub async fn initialize(&self, auto_reload: bool) -> Result<(), ClusterError> {
        self.register_bus_handlers();
        if self.cfg.handle_signals {
            self.spawn_signal_task()?;
        }
        if auto_reload {
            let listener = self.create_file_listener();
            self.activate_file_listener(&listener)?;
        }

        let count = self.cfg.worker_count();
        self.target_workers.store(count, Ordering::SeqCst);
        info!(workers = count, "forking workers");

        let results = join_all((0..count).map(|_| self.fork_worker())).await;
        for result in results {
            result?;
        }

        self.hooks.listen().await?;
        self.events
            .publish(Event::new(EventKind::PoolReady).with_reason(format!("workers={count}")));
        Ok(())
    }

    /// Spawns one worker and resolves with its id once it reports `listening`.
    ///
    /// An exit before `listening` rejects with [`ClusterError::StartupFailed`];
    /// such a worker is never replaced. Once shutdown has begun this refuses
    /// with [`ClusterError::ShuttingDown`] without spawning anything.
    pub async fn fork_worker(&self) -> Result<WorkerId, ClusterError> {
        let (handle, events) = self.spawn_tracked()?;
        let id = handle.id();
        self.events.publish(
            Event::new(EventKind::WorkerForked)
                .with_worker(id)
                .with_pid(handle.pid()),
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(Self::monitor(self.me.clone(), handle, events, ready_tx));

        match ready_rx.await {
            Ok(result) => result.map(|()| id),
            Err(_) => Err(ClusterError::StartupFailed {
                id,
                code: None,
                signal: None,
            }),
        }
    }

    /// Dispatches one channel message from worker `id`. Never fails.
    pub fn on_worker_message(&self, id: WorkerId, data: &Value) {
        match WorkerMessage::classify(data) {
            Ok(WorkerMessage::Event { .. }) => {
                if !self.bus.cluster_event_handler(id, data) {
                    self.malformed(id, "event message without an event name".to_string());
                }
            }
            Ok(WorkerMessage::Log { level, args }) => relay_worker_log(id, &level, &args),
            Ok(WorkerMessage::Listening { .. }) => {
                debug!(worker_id = id, "listening reported outside the readiness path");
            }
            Err(e) => self.malformed(id, e.to_string()),
        }
    }

    /// Exit handling for a worker that had reached `listening`.
    ///
    /// Always logs the death. An involuntary exit outside shutdown forks exactly
    /// one replacement after the respawn backoff.
    pub async fn handle_worker_exit(
        &self,
        worker: &WorkerHandle,
        code: Option<i32>,
        signal: Option<i32>,
    ) {
        let voluntary = worker.exited_after_disconnect();
        log_worker_death(worker.id(), worker.pid(), code, signal);
        self.events.publish(
            Event::new(EventKind::WorkerExited)
                .with_worker(worker.id())
                .with_pid(worker.pid())
                .with_code(code)
                .with_signal(signal)
                .with_voluntary(voluntary),
        );
        if voluntary || self.is_shutting_down() {
            return;
        }

        let crash = self.crashes.fetch_add(1, Ordering::SeqCst);
        let delay = self.cfg.respawn_backoff.next(crash);
        self.events.publish(
            Event::new(EventKind::WorkerRespawnScheduled)
                .with_worker(worker.id())
                .with_delay(delay),
        );
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.token.cancelled() => return,
            }
        }
        if self.is_shutting_down() {
            return;
        }
        match self.fork_worker().await {
            Ok(new_id) => info!(worker_id = worker.id(), replacement = new_id, "crashed worker replaced"),
            Err(ClusterError::ShuttingDown) => debug!(worker_id = worker.id(), "no replacement during shutdown"),
            Err(e) => error!(worker_id = worker.id(), error = %e, "replacement worker failed to start"),
        }
    }

    /// SIGINT path: kill every worker, then call `on_exit` exactly once.
    ///
    /// Exit code 0 when every worker stopped, 1 when any kill failed. A second
    /// call while shutdown is in progress returns immediately.
    pub async fn handle_sigint(&self) -> Result<(), ClusterError> {
        self.terminate("SIGINT received", true).await
    }

    /// Kills every worker and disposes the master without calling `on_exit`.
    pub async fn shutdown(&self) -> Result<(), ClusterError> {
        self.terminate("shutdown requested", false).await
    }

    /// Kills every tracked worker concurrently. Zero workers resolves at once.
    ///
    /// All kills settle before this returns; the first failure is reported.
    pub async fn kill_all_workers(&self) -> Result<(), ClusterError> {
        let workers = self.pool.snapshot();
        let timeouts = self.cfg.escalation_timeouts();
        let results = join_all(
            workers
                .iter()
                .map(|w| kill_worker(w, timeouts, &self.events)),
        )
        .await;
        results.into_iter().collect()
    }

    /// Kills worker `id` and forks a replacement. Resolves with the new id.
    ///
    /// Only one kill or reload owns a worker's exit: if another one already
    /// started it, this refuses with [`ClusterError::AlreadyExiting`] and forks
    /// nothing.
    pub async fn reload_worker(&self, id: WorkerId) -> Result<WorkerId, ClusterError> {
        let worker = self
            .pool
            .get(id)
            .ok_or(ClusterError::UnknownWorker { id })?;
        if !worker.mark_disconnecting() {
            return Err(ClusterError::AlreadyExiting { id });
        }
        kill_worker(&worker, self.cfg.escalation_timeouts(), &self.events).await?;
        self.fork_worker().await
    }

    /// Reloads every tracked worker concurrently.
    ///
    /// Workers that are already exiting, or gone by the time their turn comes,
    /// are skipped; overlapping reloads therefore keep the pool at its target.
    pub async fn reload_all_workers(&self) -> Result<(), ClusterError> {
        let ids = self.pool.ids();
        let results = join_all(ids.into_iter().map(|id| self.reload_worker(id))).await;
        results
            .into_iter()
            .map(|r| match r {
                Ok(_)
                | Err(ClusterError::AlreadyExiting { .. } | ClusterError::UnknownWorker { .. }) => {
                    Ok(())
                }
                Err(e) => Err(e),
            })
            .collect()
    }

    /// Snapshot of master, OS and worker statistics. Never fails.
    pub fn get_stats(&self) -> ClusterStats {
        self.stats.collect(
            self.target_workers.load(Ordering::SeqCst),
            self.pool.statuses(),
        )
    }

    /// `masterStatus` handler: replies with the stats, correlated to `data.id`.
    ///
    /// Without an id there is nobody to answer, so nothing happens.
    pub fn status_handler(&self, _meta: &EventMeta, data: &Value) {
        let id = match data.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                debug!("masterStatus request without id ignored");
                return;
            }
        };
        let payload = serde_json::to_value(self.get_stats()).unwrap_or(Value::Null);
        self.bus.respond(MASTER_STATUS, &id, payload);
    }

    /// Wildcard handler: relays local events to every live worker.
    ///
    /// Events that came in from a worker and local-only control events stay
    /// here. Send failures are logged; this never fails.
    pub fn broadcast_handler(&self, name: &str, meta: &EventMeta, payload: &Value) {
        if !self.relay.should_relay(name, meta) {
            return;
        }
        let message = MasterMessage::event(name, meta, payload);
        for worker in self.pool.snapshot() {
            if worker.is_dead() {
                continue;
            }
            if let Err(e) = worker.send(&message) {
                debug!(worker_id = worker.id(), event = name, error = %e, "relay to worker failed");
            }
        }
    }

    /// `workerRestartNeeded` handler: starts a rolling reload of every worker.
    pub fn handle_worker_restart(&self, _meta: &EventMeta, reason: &Value) {
        let reason = reason_text(reason);
        info!(reason = %reason, "worker restart needed");
        self.events
            .publish(Event::new(EventKind::ReloadRequested).with_reason(reason));

        let Some(me) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            match me.reload_all_workers().await {
                Ok(()) => {}
                Err(ClusterError::ShuttingDown) => debug!("worker reload cut short by shutdown"),
                Err(e) => error!(error = %e, label = e.as_label(), "worker reload failed"),
            }
        });
    }

    /// `systemRestartNeeded` handler: graceful shutdown with exit code 0.
    fn handle_system_restart(&self, reason: &Value) {
        let reason = reason_text(reason);
        warn!(reason = %reason, "system restart needed; shutting down");
        let Some(me) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = me.terminate(&reason, true).await {
                error!(error = %e, "shutdown after system restart request failed");
            }
        });
    }

    /// Creates an inactive file listener over the configured watch paths.
    pub fn create_file_listener(&self) -> Arc<FileListener> {
        Arc::new(FileListener::new(self.cfg.watch_paths.clone()).with_lifecycle(self.events.clone()))
    }

    /// Activates `listener` and keeps it until [`ClusterMaster::dispose`].
    pub fn activate_file_listener(&self, listener: &Arc<FileListener>) -> Result<(), ClusterError> {
        listener.activate(&self.bus, self.cfg.master_file.as_deref())?;
        let previous = lock(&self.file_listener).replace(Arc::clone(listener));
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, listener) {
                previous.deactivate();
            }
        }
        Ok(())
    }

    /// Deactivates the current file listener, if any.
    pub fn deactivate_file_listener(&self) {
        if let Some(listener) = lock(&self.file_listener).take() {
            listener.deactivate();
        }
    }

    /// Whether a file listener is attached and active.
    pub fn is_file_listener_active(&self) -> bool {
        lock(&self.file_listener)
            .as_ref()
            .is_some_and(|l| l.is_active())
    }

    /// Drops bus subscriptions, the file listener and the signal task. Idempotent.
    ///
    /// Workers are left alone; use [`ClusterMaster::shutdown`] to stop them too.
    pub fn dispose(&self) {
        let subscriptions: Vec<_> = lock(&self.subscriptions).drain(..).collect();
        for id in subscriptions {
            self.bus.off(id);
        }
        self.deactivate_file_listener();
        self.token.cancel();
    }

    /// Ids of tracked workers, sorted.
    pub fn workers(&self) -> Vec<WorkerId> {
        self.pool.ids()
    }

    pub fn worker(&self, id: WorkerId) -> Option<Arc<WorkerHandle>> {
        self.pool.get(id)
    }

    pub fn worker_count(&self) -> usize {
        self.pool.len()
    }

    /// The named cross-process bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.cfg
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    async fn terminate(&self, reason: &str, call_exit: bool) -> Result<(), ClusterError> {
        let already = {
            let _gate = lock(&self.fork_gate);
            self.shutting_down.swap(true, Ordering::SeqCst)
        };
        if already {
            return Ok(());
        }
        self.events
            .publish(Event::new(EventKind::ShutdownRequested).with_reason(reason));
        info!(reason, workers = self.pool.len(), "stopping workers");

        let result = self.kill_all_workers().await;
        let code = if result.is_ok() { 0 } else { 1 };
        if let Err(e) = &result {
            error!(error = %e, label = e.as_label(), "not every worker could be stopped");
        }
        self.events
            .publish(Event::new(EventKind::ShutdownCompleted).with_code(code));
        self.dispose();

        if call_exit && !self.exit_called.swap(true, Ordering::SeqCst) {
            self.hooks.on_exit(code);
        }
        result
    }

    /// Spawns a worker and puts it in the pool, unless shutdown has begun.
    fn spawn_tracked(
        &self,
    ) -> Result<(Arc<WorkerHandle>, mpsc::UnboundedReceiver<WorkerEvent>), ClusterError> {
        let _gate = lock(&self.fork_gate);
        if self.is_shutting_down() {
            return Err(ClusterError::ShuttingDown);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let SpawnedWorker { process, events } = self
            .spawner
            .spawn(id)
            .map_err(|source| ClusterError::Spawn { id, source })?;

        let handle = Arc::new(WorkerHandle::new(id, process));
        self.pool.insert(Arc::clone(&handle));
        Ok((handle, events))
    }

    fn register_bus_handlers(&self) {
        let mut subscriptions = lock(&self.subscriptions);
        if !subscriptions.is_empty() {
            return;
        }

        let me = self.me.clone();
        subscriptions.push(self.bus.on_any(move |name, meta, payload| {
            if let Some(m) = me.upgrade() {
                m.broadcast_handler(name, meta, payload);
            }
        }));
        let me = self.me.clone();
        subscriptions.push(self.bus.on(MASTER_STATUS, move |meta, payload| {
            if let Some(m) = me.upgrade() {
                m.status_handler(meta, payload);
            }
        }));
        let me = self.me.clone();
        subscriptions.push(self.bus.on(WORKER_RESTART_NEEDED, move |meta, payload| {
            if let Some(m) = me.upgrade() {
                m.handle_worker_restart(meta, payload);
            }
        }));
        let me = self.me.clone();
        subscriptions.push(self.bus.on(SYSTEM_RESTART_NEEDED, move |_, payload| {
            if let Some(m) = me.upgrade() {
                m.handle_system_restart(payload);
            }
        }));
    }

    fn spawn_signal_task(&self) -> Result<(), ClusterError> {
        let mut listener = InterruptListener::register().map_err(ClusterError::Signal)?;
        let me = self.me.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                received = listener.recv() => {
                    if !received {
                        return;
                    }
                    if let Some(m) = me.upgrade() {
                        if let Err(e) = m.handle_sigint().await {
                            error!(error = %e, "SIGINT shutdown finished with errors");
                        }
                    }
                }
            }
        });
        Ok(())
    }

    /// Forwards lifecycle events to the subscriber set (fire-and-forget).
    pub(crate) fn subscriber_listener(&self) {
        let mut rx = self.events.subscribe();
        let set = Arc::clone(&self.subs);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(&ev),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber listener lagged behind the event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn monitor(
        master: Weak<Self>,
        handle: Arc<WorkerHandle>,
        events: mpsc::UnboundedReceiver<WorkerEvent>,
        ready: Ready,
    ) -> BoxFuture<'static, ()> {
        Self::monitor_loop(master, handle, events, ready).boxed()
    }

    async fn monitor_loop(
        master: Weak<Self>,
        handle: Arc<WorkerHandle>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
        ready: Ready,
    ) {
        let mut ready = Some(ready);
        let exit = loop {
            let Some(event) = events.recv().await else {
                break ExitInfo::default();
            };
            match event {
                WorkerEvent::Exit(info) => break info,
                WorkerEvent::Listening { address } => {
                    if let Some(m) = master.upgrade() {
                        m.on_listening(&handle, address, &mut ready);
                    }
                }
                WorkerEvent::Message(data) => {
                    if let Some(m) = master.upgrade() {
                        m.on_worker_message(handle.id(), &data);
                    }
                }
            }
        };

        match master.upgrade() {
            Some(m) => m.on_exit_event(handle, exit, ready.take()).await,
            None => handle.mark_dead(),
        }
    }

    fn on_listening(&self, handle: &WorkerHandle, address: Option<String>, ready: &mut Option<Ready>) {
        if handle.mark_listening() {
            self.crashes.store(0, Ordering::SeqCst);
            let mut ev = Event::new(EventKind::WorkerListening)
                .with_worker(handle.id())
                .with_pid(handle.pid());
            if let Some(address) = address {
                ev = ev.with_reason(address);
            }
            self.events.publish(ev);
        }
        if let Some(tx) = ready.take() {
            let _ = tx.send(Ok(()));
        }
    }

    async fn on_exit_event(&self, handle: Arc<WorkerHandle>, info: ExitInfo, ready: Option<Ready>) {
        self.pool.remove(handle.id());
        handle.mark_dead();

        if let Some(tx) = ready {
            log_worker_death(handle.id(), handle.pid(), info.code, info.signal);
            self.events.publish(
                Event::new(EventKind::WorkerStartupFailed)
                    .with_worker(handle.id())
                    .with_pid(handle.pid())
                    .with_code(info.code)
                    .with_signal(info.signal),
            );
            let _ = tx.send(Err(ClusterError::StartupFailed {
                id: handle.id(),
                code: info.code,
                signal: info.signal,
            }));
            return;
        }
        self.handle_worker_exit(&handle, info.code, info.signal).await;
    }

    fn malformed(&self, id: WorkerId, reason: String) {
        warn!(worker_id = id, reason = %reason, "dropping malformed worker message");
        self.events.publish(
            Event::new(EventKind::MalformedMessage)
                .with_worker(id)
                .with_reason(reason),
        );
    }
}

fn reason_text(reason: &Value) -> String {
    match reason {
        Value::String(s) => s.clone(),
        Value::Null => "unspecified".to_string(),
        other => other.to_string(),
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
