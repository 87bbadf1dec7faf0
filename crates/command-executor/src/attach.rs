//! Attach/detach control.
//!
//! An invocation ends in exactly one of two states. `Attached` couples the wrapper
//! to the child: the caller blocks and sees the output. `Detached` starts the
//! backing resource and returns at once with a handle for later reattachment.
//! Keep-alive is orthogonal and only affects teardown.

use std::fmt;
use std::io::IsTerminal;

use crate::error::{Error, Result};
use crate::isolation::Backend;

/// Requested relationship between the wrapper and the child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachMode {
    /// Block and stream output
    #[default]
    Attached,
    /// Start in the background and return a handle
    Detached,
}

impl AttachMode {
    /// Resolve the mode from the two CLI flags; asking for both is rejected
    pub fn from_flags(attached: bool, detached: bool) -> Result<Self> {
        match (attached, detached) {
            (true, true) => Err(Error::configuration(
                "Cannot use both --attached and --detached at the same time. Please choose only one mode.",
            )),
            (_, true) => Ok(AttachMode::Detached),
            _ => Ok(AttachMode::Attached),
        }
    }

    /// Lowercase name used in logs and records
    pub fn as_str(self) -> &'static str {
        match self {
            AttachMode::Attached => "attached",
            AttachMode::Detached => "detached",
        }
    }
}

impl fmt::Display for AttachMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of the wrapper's standard streams are connected to a terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Terminal {
    /// stdin is a terminal
    pub stdin: bool,
    /// stdout is a terminal
    pub stdout: bool,
}

impl Terminal {
    /// Inspect the current process
    pub fn detect() -> Self {
        Self {
            stdin: std::io::stdin().is_terminal(),
            stdout: std::io::stdout().is_terminal(),
        }
    }

    /// No terminal at all, as under CI or a pipe
    pub fn none() -> Self {
        Self::default()
    }
}

/// How a driver carries out the requested mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Spawn a local process and stream both channels live
    Stream,
    /// Start a detached session with logging, poll until it ends, replay the log
    PollSession,
    /// Start in the background and return without waiting
    Background,
}

/// Decide how `backend` runs in `mode`.
///
/// Multiplexers never start attached: an attached session needs a controlling
/// terminal the wrapper cannot guarantee, so attached mode polls a detached session.
pub fn strategy(backend: Backend, mode: AttachMode) -> Result<Strategy> {
    match (backend, mode) {
        (Backend::Local, AttachMode::Attached) => Ok(Strategy::Stream),
        (Backend::Local, AttachMode::Detached) => Err(Error::configuration(
            "--detached requires an isolation backend (screen, tmux, docker or ssh)",
        )),
        (Backend::Screen | Backend::Tmux, AttachMode::Attached) => Ok(Strategy::PollSession),
        (Backend::Docker | Backend::Ssh, AttachMode::Attached) => Ok(Strategy::Stream),
        (_, AttachMode::Detached) => Ok(Strategy::Background),
    }
}
