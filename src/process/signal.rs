//! # Escalation signals.
//!
//! [`KillSignal`] lists the signals the master sends to a worker, in escalation
//! order. The derived `Ord` follows that order:
//! `Interrupt < Terminate < Kill`.

use std::fmt;
use std::io;

/// Signal sent to a worker while shutting it down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KillSignal {
    /// `SIGINT`: ask the worker to drain and exit.
    Interrupt,
    /// `SIGTERM`: second chance.
    Terminate,
    /// `SIGKILL`: cannot be caught.
    Kill,
}

impl KillSignal {
    /// All signals in escalation order.
    pub const ESCALATION: [KillSignal; 3] =
        [KillSignal::Interrupt, KillSignal::Terminate, KillSignal::Kill];

    /// Conventional signal name (`"SIGINT"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            KillSignal::Interrupt => "SIGINT",
            KillSignal::Terminate => "SIGTERM",
            KillSignal::Kill => "SIGKILL",
        }
    }

    /// POSIX signal number.
    pub fn as_raw(&self) -> i32 {
        match self {
            KillSignal::Interrupt => 2,
            KillSignal::Terminate => 15,
            KillSignal::Kill => 9,
        }
    }

    /// Delivers the signal to `pid`.
    ///
    /// `ESRCH` (no such process) is reported as an error: the caller decides
    /// whether a vanished process is acceptable.
    #[cfg(unix)]
    pub fn deliver(&self, pid: u32) -> io::Result<()> {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        let sig = match self {
            KillSignal::Interrupt => Signal::SIGINT,
            KillSignal::Terminate => Signal::SIGTERM,
            KillSignal::Kill => Signal::SIGKILL,
        };
        signal::kill(Pid::from_raw(raw), sig).map_err(io::Error::from)
    }

    /// Delivers the signal to `pid`.
    #[cfg(not(unix))]
    pub fn deliver(&self, _pid: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "signal delivery is only implemented on unix",
        ))
    }
}

impl fmt::Display for KillSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable name for a raw signal number reported by an exit status.
pub fn signal_name(raw: i32) -> String {
    #[cfg(unix)]
    {
        if let Ok(sig) = nix::sys::signal::Signal::try_from(raw) {
            return sig.as_str().to_string();
        }
    }
    format!("signal {raw}")
}
