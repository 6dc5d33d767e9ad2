//! Source file watching for auto-reload.
//!
//! ```text
//!  notify watcher ──┐
//!                   ├──► FileListener (broadcast<FileEvent>) ──► classify ──► EventBus
//!  emit(FileEvent) ─┘                                              │
//!                                            master file changed ──┼──► systemRestartNeeded
//!                                             any other file    ───┴──► workerRestartNeeded
//! ```
//!
//! Only `change` events trigger a restart; additions, removals and renames are
//! ignored.

mod listener;

pub use listener::{FileEvent, FileEventKind, FileListener, classify};
