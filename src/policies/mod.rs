//! Respawn delay policies.
//!
//! When a worker crashes after it reached `listening`, the master forks exactly
//! one replacement. These policies decide **how long** to wait before that fork,
//! so a worker that crashes on every request does not turn into a fork loop.
//!
//! ## Contents
//! - [`BackoffPolicy`] how the respawn delay grows with consecutive crashes
//! - [`JitterPolicy`]  randomization so simultaneous crashes do not refork in lockstep
//!
//! ## Quick wiring
//! ```text
//! worker exit (involuntary) ──► crashes += 1
//!      └─► delay = cfg.respawn_backoff.next(crashes - 1)
//!      └─► sleep(delay) ──► fork_worker()
//! worker listening ──► crashes = 0
//! ```
//!
//! ## Defaults
//! `BackoffPolicy::default()` → first=100ms, factor=2.0, max=10s, jitter=Equal.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
