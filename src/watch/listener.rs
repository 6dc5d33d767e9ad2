//! # File change listener.
//!
//! A [`FileListener`] is created inactive. [`FileListener::activate`] starts a
//! task that turns `change` events into restart requests on the [`EventBus`]
//! and, when watch paths were given, attaches an OS watcher (`notify`) that
//! feeds the same channel. [`FileListener::deactivate`] drops the OS handle and
//! stops the task. Events can also be injected with [`FileListener::emit`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use notify::event::ModifyKind;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::{EventBus, SYSTEM_RESTART_NEEDED, WORKER_RESTART_NEEDED};
use crate::error::ClusterError;
use crate::events::{Bus, Event, EventKind};

const CHANNEL_CAPACITY: usize = 256;

/// What happened to a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileEventKind {
    Change,
    Add,
    Unlink,
    Rename,
    Other,
}

impl FileEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileEventKind::Change => "change",
            FileEventKind::Add => "add",
            FileEventKind::Unlink => "unlink",
            FileEventKind::Rename => "rename",
            FileEventKind::Other => "other",
        }
    }

    /// Parses a watcher event name. Unknown names map to `Other`.
    pub fn parse(name: &str) -> Self {
        match name {
            "change" => FileEventKind::Change,
            "add" => FileEventKind::Add,
            "unlink" => FileEventKind::Unlink,
            "rename" => FileEventKind::Rename,
            _ => FileEventKind::Other,
        }
    }

    fn from_notify(kind: &notify::EventKind) -> Self {
        match kind {
            notify::EventKind::Modify(ModifyKind::Name(_)) => FileEventKind::Rename,
            notify::EventKind::Modify(ModifyKind::Metadata(_)) => FileEventKind::Other,
            notify::EventKind::Modify(_) => FileEventKind::Change,
            notify::EventKind::Create(_) => FileEventKind::Add,
            notify::EventKind::Remove(_) => FileEventKind::Unlink,
            _ => FileEventKind::Other,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Decides which restart, if any, a file event calls for.
///
/// Returns the bus event name and the reason (`file changed: <path>`).
///
/// # Example
/// ```
/// use std::path::Path;
/// use clustervisor::{FileEvent, FileEventKind, classify_file_event as classify};
///
/// let master = Path::new("app/master.rs");
/// let ev = FileEvent::new(FileEventKind::Change, "app/master.rs");
/// assert_eq!(classify(&ev, Some(master)).unwrap().0, "systemRestartNeeded");
///
/// let ev = FileEvent::new(FileEventKind::Add, "app/other.rs");
/// assert!(classify(&ev, Some(master)).is_none());
/// ```
pub fn classify(event: &FileEvent, master_file: Option<&Path>) -> Option<(&'static str, String)> {
    if event.kind != FileEventKind::Change {
        return None;
    }
    let reason = format!("file changed: {}", event.path.display());
    let is_master = master_file.is_some_and(|m| event.path == m || event.path.ends_with(m));
    let name = if is_master {
        SYSTEM_RESTART_NEEDED
    } else {
        WORKER_RESTART_NEEDED
    };
    Some((name, reason))
}

/// Watches files and turns changes into restart requests.
pub struct FileListener {
    paths: Vec<PathBuf>,
    tx: broadcast::Sender<FileEvent>,
    lifecycle: Option<Bus>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    task: Mutex<Option<JoinHandle<()>>>,
    active: AtomicBool,
}

impl FileListener {
    /// Creates an inactive listener. With no `paths`, only injected events are seen.
    pub fn new(paths: Vec<PathBuf>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            paths,
            tx,
            lifecycle: None,
            watcher: Mutex::new(None),
            task: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    /// Also publish a `FileChanged` lifecycle event for each change.
    #[must_use]
    pub fn with_lifecycle(mut self, bus: Bus) -> Self {
        self.lifecycle = Some(bus);
        self
    }

    /// Injects an event as if the OS watcher had produced it.
    pub fn emit(&self, event: FileEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FileEvent> {
        self.tx.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Starts routing change events to `bus`. Idempotent while active.
    pub fn activate(&self, bus: &EventBus, master_file: Option<&Path>) -> Result<(), ClusterError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Subscribe before anything can produce events.
        let rx = self.tx.subscribe();
        let task = tokio::spawn(route_changes(
            rx,
            bus.clone(),
            master_file.map(Path::to_path_buf),
            self.lifecycle.clone(),
        ));

        if !self.paths.is_empty() {
            match self.watch_paths() {
                Ok(watcher) => {
                    *lock(&self.watcher) = Some(watcher);
                }
                Err(e) => {
                    task.abort();
                    self.active.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }
        *lock(&self.task) = Some(task);
        debug!(paths = ?self.paths, "file listener active");
        Ok(())
    }

    /// Stops the OS watcher and the routing task. Idempotent.
    pub fn deactivate(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        drop(lock(&self.watcher).take());
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        debug!("file listener inactive");
    }

    fn watch_paths(&self) -> Result<RecommendedWatcher, ClusterError> {
        let tx = self.tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let kind = FileEventKind::from_notify(&event.kind);
                    for path in event.paths {
                        let _ = tx.send(FileEvent { kind, path });
                    }
                }
                Err(e) => warn!(error = %e, "file watcher error"),
            }
        })?;
        for path in &self.paths {
            watcher.watch(path, RecursiveMode::Recursive)?;
        }
        Ok(watcher)
    }
}

impl Drop for FileListener {
    fn drop(&mut self) {
        self.deactivate();
    }
}

async fn route_changes(
    mut rx: broadcast::Receiver<FileEvent>,
    bus: EventBus,
    master_file: Option<PathBuf>,
    lifecycle: Option<Bus>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(ev) => ev,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "file listener lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some((name, reason)) = classify(&event, master_file.as_deref()) else {
            continue;
        };
        if let Some(lifecycle) = &lifecycle {
            lifecycle.publish(Event::new(EventKind::FileChanged).with_reason(reason.as_str()));
        }
        bus.emit(name, Value::String(reason));
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Sender;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn record(bus: &EventBus) -> mpsc::UnboundedReceiver<(String, Value)> {
        let (tx, rx) = mpsc::unbounded_channel();
        for name in [WORKER_RESTART_NEEDED, SYSTEM_RESTART_NEEDED] {
            let tx = tx.clone();
            bus.on(name, move |_, payload| {
                let _ = tx.send((name.to_string(), payload.clone()));
            });
        }
        rx
    }

    #[tokio::test]
    async fn master_file_change_requests_system_restart() {
        let bus = EventBus::new(Sender::Master);
        let mut seen = record(&bus);
        let listener = FileListener::new(Vec::new());
        let master = Path::new("app").join("master.rs");
        listener.activate(&bus, Some(&master)).unwrap();

        listener.emit(FileEvent::new(FileEventKind::Change, &master));
        let (name, reason) = seen.recv().await.unwrap();
        assert_eq!(name, SYSTEM_RESTART_NEEDED);
        assert_eq!(reason, Value::String(format!("file changed: {}", master.display())));
    }

    #[tokio::test]
    async fn other_file_change_requests_worker_restart_and_other_kinds_are_ignored() {
        let bus = EventBus::new(Sender::Master);
        let mut seen = record(&bus);
        let listener = FileListener::new(Vec::new());
        listener.activate(&bus, Some(Path::new("app/master.rs"))).unwrap();

        listener.emit(FileEvent::new(FileEventKind::parse("chuaange"), "random-file.rs"));
        listener.emit(FileEvent::new(FileEventKind::Unlink, "random-file.rs"));
        listener.emit(FileEvent::new(FileEventKind::Change, "random-file.rs"));

        let (name, reason) = seen.recv().await.unwrap();
        assert_eq!(name, WORKER_RESTART_NEEDED);
        assert_eq!(reason, Value::from("file changed: random-file.rs"));
        assert!(seen.try_recv().is_err());
    }

    #[tokio::test]
    async fn deactivate_stops_routing() {
        let bus = EventBus::new(Sender::Master);
        let mut seen = record(&bus);
        let listener = Arc::new(FileListener::new(Vec::new()));
        listener.activate(&bus, None).unwrap();
        assert!(listener.is_active());

        listener.deactivate();
        assert!(!listener.is_active());
        listener.emit(FileEvent::new(FileEventKind::Change, "a.rs"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(seen.try_recv().is_err());
    }

    #[test]
    fn notify_kinds_map_to_listener_kinds() {
        use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};
        use notify::EventKind as N;

        assert_eq!(FileEventKind::from_notify(&N::Modify(ModifyKind::Data(DataChange::Content))), FileEventKind::Change);
        assert_eq!(FileEventKind::from_notify(&N::Modify(ModifyKind::Name(RenameMode::Both))), FileEventKind::Rename);
        assert_eq!(FileEventKind::from_notify(&N::Modify(ModifyKind::Metadata(MetadataKind::Any))), FileEventKind::Other);
        assert_eq!(FileEventKind::from_notify(&N::Create(CreateKind::File)), FileEventKind::Add);
        assert_eq!(FileEventKind::from_notify(&N::Remove(RemoveKind::File)), FileEventKind::Unlink);
    }

    #[tokio::test]
    async fn os_watcher_reports_content_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("handler.rs");
        std::fs::write(&file, "fn a() {}").unwrap();

        let bus = EventBus::new(Sender::Master);
        let mut seen = record(&bus);
        let listener = FileListener::new(vec![dir.path().to_path_buf()]);
        listener.activate(&bus, None).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(&file, "fn b() {}").unwrap();

        let (name, reason) = tokio::time::timeout(Duration::from_secs(5), seen.recv())
            .await
            .expect("change reported in time")
            .unwrap();
        assert_eq!(name, WORKER_RESTART_NEEDED);
        assert!(reason.as_str().unwrap().ends_with("handler.rs"));
        listener.deactivate();
    }

    #[tokio::test]
    async fn missing_watch_path_fails_activation() {
        let bus = EventBus::new(Sender::Master);
        let listener = FileListener::new(vec![PathBuf::from("/definitely/not/here")]);
        assert!(matches!(listener.activate(&bus, None), Err(ClusterError::Watch(_))));
        assert!(!listener.is_active());
    }
}
