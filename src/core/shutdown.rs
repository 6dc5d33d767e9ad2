//! # SIGINT listener for the master.
//!
//! [`InterruptListener`] is registered synchronously, so a registration failure
//! surfaces from `initialize` instead of inside a background task.
//!
//! **Unix:** `SIGINT` via [`tokio::signal::unix`].
//! **Other platforms:** `Ctrl-C` via [`tokio::signal::ctrl_c`].
//!
//! Only SIGINT is consumed. SIGTERM keeps its default disposition so an outer
//! process manager can still stop the master outright.

use std::io;

/// Registered SIGINT stream.
pub struct InterruptListener {
    #[cfg(unix)]
    inner: tokio::signal::unix::Signal,
}

impl InterruptListener {
    /// Installs the handler. Must be called inside a tokio runtime.
    #[cfg(unix)]
    pub fn register() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            inner: signal(SignalKind::interrupt())?,
        })
    }

    #[cfg(not(unix))]
    pub fn register() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Waits for the next SIGINT. Returns `false` if no more can arrive.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> bool {
        self.inner.recv().await.is_some()
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> bool {
        tokio::signal::ctrl_c().await.is_ok()
    }
}
