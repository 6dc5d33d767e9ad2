//! Process-level collaborators of the master.
//!
//! The master never calls `std::process::exit` itself and never binds a socket
//! itself. Both go through [`ProcessHooks`], so tests observe them and embedders
//! can replace them.

use async_trait::async_trait;

use super::death::log_master_death;
use crate::error::ClusterError;

/// Hooks called by the master at fixed points of its lifecycle.
#[async_trait]
pub trait ProcessHooks: Send + Sync + 'static {
    /// Called exactly once, after every initial worker reported `listening`.
    async fn listen(&self) -> Result<(), ClusterError> {
        Ok(())
    }

    /// Called exactly once per shutdown, after every worker is confirmed dead.
    fn on_exit(&self, code: i32);
}

/// Default hooks: no `listen` work; `on_exit` logs the master's death and
/// terminates the process.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessExit;

#[async_trait]
impl ProcessHooks for ProcessExit {
    fn on_exit(&self, code: i32) {
        log_master_death(Some(code), None);
        std::process::exit(code);
    }
}
