//! In-memory workers for driving a `ClusterMaster` without real processes.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use clustervisor::{
    BackoffPolicy, ClusterConfig, ClusterError, ClusterMaster, ExitInfo, KillSignal,
    MasterMessage, ProcessHooks, Spawn, SpawnedWorker, WorkerEvent, WorkerId, WorkerProcess,
};

/// What a fake worker does right after it is spawned.
#[derive(Clone, Copy, Debug)]
pub enum Startup {
    /// Reports `listening` immediately.
    Listen,
    /// Exits with this code before listening.
    ExitEarly(i32),
}

/// One fake worker process.
pub struct FakeWorker {
    pub id: WorkerId,
    pub pid: u32,
    events: mpsc::UnboundedSender<WorkerEvent>,
    dies_on: Option<KillSignal>,
    exited: AtomicBool,
    signals: Mutex<Vec<KillSignal>>,
    inbox: Mutex<Vec<MasterMessage>>,
}

impl FakeWorker {
    pub fn signals(&self) -> Vec<KillSignal> {
        self.signals.lock().unwrap().clone()
    }

    /// Event messages the master relayed to this worker, as `(name, meta, payload)`.
    pub fn inbox(&self) -> Vec<(String, Value, Value)> {
        self.inbox
            .lock()
            .unwrap()
            .iter()
            .map(|MasterMessage::Event { args }| {
                (
                    args[0].as_str().unwrap_or_default().to_string(),
                    args.get(1).cloned().unwrap_or(Value::Null),
                    args.get(2).cloned().unwrap_or(Value::Null),
                )
            })
            .collect()
    }

    pub fn received(&self, name: &str) -> usize {
        self.inbox().iter().filter(|(n, _, _)| n == name).count()
    }

    /// Sends a raw channel message to the master.
    pub fn message(&self, data: Value) {
        let _ = self.events.send(WorkerEvent::Message(data));
    }

    /// Exits on its own, as a crash would.
    pub fn crash(&self, code: i32) {
        self.exit(ExitInfo::code(code));
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    fn exit(&self, info: ExitInfo) {
        if !self.exited.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(WorkerEvent::Exit(info));
        }
    }
}

struct FakeHandle(Arc<FakeWorker>);

impl WorkerProcess for FakeHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.0.pid)
    }

    fn kill(&self, signal: KillSignal) -> io::Result<()> {
        if self.0.has_exited() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "already exited"));
        }
        self.0.signals.lock().unwrap().push(signal);
        if self.0.dies_on.is_some_and(|d| d == signal) {
            self.0.exit(ExitInfo::signaled(signal.as_raw()));
        }
        Ok(())
    }

    fn send(&self, message: &MasterMessage) -> io::Result<()> {
        if self.0.has_exited() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "worker gone"));
        }
        self.0.inbox.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Spawner whose workers live in memory.
pub struct FakeSpawner {
    script: Mutex<VecDeque<Startup>>,
    dies_on: Mutex<Option<KillSignal>>,
    spawned: Mutex<Vec<Arc<FakeWorker>>>,
    next_pid: AtomicU32,
}

impl FakeSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            dies_on: Mutex::new(Some(KillSignal::Interrupt)),
            spawned: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(5000),
        })
    }

    /// Queues startup behaviours for the next spawns; later spawns listen.
    pub fn script(&self, steps: impl IntoIterator<Item = Startup>) {
        self.script.lock().unwrap().extend(steps);
    }

    /// Signal that kills workers spawned from now on (`None`: nothing does).
    pub fn dies_on(&self, signal: Option<KillSignal>) {
        *self.dies_on.lock().unwrap() = signal;
    }

    pub fn spawned(&self) -> Vec<Arc<FakeWorker>> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    pub fn worker(&self, id: WorkerId) -> Arc<FakeWorker> {
        self.spawned()
            .into_iter()
            .find(|w| w.id == id)
            .expect("worker was spawned")
    }
}

impl Spawn for FakeSpawner {
    fn spawn(&self, id: WorkerId) -> io::Result<SpawnedWorker> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Arc::new(FakeWorker {
            id,
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            events: tx,
            dies_on: *self.dies_on.lock().unwrap(),
            exited: AtomicBool::new(false),
            signals: Mutex::new(Vec::new()),
            inbox: Mutex::new(Vec::new()),
        });
        match self.script.lock().unwrap().pop_front().unwrap_or(Startup::Listen) {
            Startup::Listen => {
                let _ = worker.events.send(WorkerEvent::Listening { address: None });
            }
            Startup::ExitEarly(code) => worker.exit(ExitInfo::code(code)),
        }
        self.spawned.lock().unwrap().push(Arc::clone(&worker));
        Ok(SpawnedWorker {
            process: Box::new(FakeHandle(worker)),
            events: rx,
        })
    }
}

/// Records `listen` and `on_exit` calls instead of touching the process.
#[derive(Default)]
pub struct RecordingHooks {
    pub listens: AtomicUsize,
    pub exits: Mutex<Vec<i32>>,
}

impl RecordingHooks {
    pub fn exits(&self) -> Vec<i32> {
        self.exits.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ProcessHooks for RecordingHooks {
    async fn listen(&self) -> Result<(), ClusterError> {
        self.listens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_exit(&self, code: i32) {
        self.exits.lock().unwrap().push(code);
    }
}

pub fn config(workers: usize) -> ClusterConfig {
    ClusterConfig {
        workers: Some(workers),
        handle_signals: false,
        sigint_timeout: Duration::from_millis(200),
        sigterm_timeout: Duration::from_millis(200),
        sigkill_timeout: Duration::from_millis(200),
        respawn_backoff: BackoffPolicy::none(),
        ..ClusterConfig::default()
    }
}

pub struct Harness {
    pub master: Arc<ClusterMaster>,
    pub spawner: Arc<FakeSpawner>,
    pub hooks: Arc<RecordingHooks>,
}

pub fn harness(cfg: ClusterConfig) -> Harness {
    let spawner = FakeSpawner::new();
    let hooks = Arc::new(RecordingHooks::default());
    let master = ClusterMaster::builder(cfg, spawner.clone())
        .with_hooks(hooks.clone())
        .build();
    Harness {
        master,
        spawner,
        hooks,
    }
}

/// Polls `cond` until it holds, failing the test after five seconds.
pub async fn eventually<F>(what: &str, mut cond: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for: {what}");
}

/// Lets spawned tasks run for a moment.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("completed in time")
}
