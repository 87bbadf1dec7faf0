//! Teardown of backend resources.
//!
//! Every resource an invocation creates is registered in a [`ResourceLedger`] the
//! moment it exists. At completion, or from a signal handler, the [`Janitor`]
//! removes whatever is still owned. Teardown failures are warnings only; they never
//! change the invocation's exit code.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::command::{Command, StdinMode, shell_escape};
use crate::drivers::ssh::remote_log;
use crate::error::{Error, Result};
use crate::isolation::Backend;
use crate::probe::{PROBE_TIMEOUT, run_bounded};

/// A backend resource that may need teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceHandle {
    /// screen or tmux session
    Session {
        /// Which multiplexer owns it
        backend: Backend,
        /// Session name
        name: String,
    },
    /// Docker container
    Container {
        /// Container name
        name: String,
    },
    /// Background process on a remote host, identified by its log name
    Remote {
        /// ssh endpoint
        endpoint: String,
        /// Session label (log file stem)
        name: String,
    },
    /// Local child process
    Process {
        /// OS process id
        pid: u32,
    },
    /// Ephemeral OS user
    User {
        /// Login name
        name: String,
    },
}

impl ResourceHandle {
    /// The name a user needs to find this resource out-of-band
    pub fn name(&self) -> String {
        match self {
            ResourceHandle::Session { name, .. }
            | ResourceHandle::Container { name }
            | ResourceHandle::Remote { name, .. }
            | ResourceHandle::User { name } => name.clone(),
            ResourceHandle::Process { pid } => pid.to_string(),
        }
    }

    /// Command that reattaches to or inspects the resource
    pub fn reattach_hint(&self) -> Option<String> {
        match self {
            ResourceHandle::Session {
                backend: Backend::Screen,
                name,
            } => Some(format!("screen -r {}", name)),
            ResourceHandle::Session {
                backend: Backend::Tmux,
                name,
            } => Some(format!("tmux attach -t {}", name)),
            ResourceHandle::Container { name } => {
                Some(format!("docker attach {name}  (or: docker logs {name})"))
            }
            ResourceHandle::Remote { endpoint, name } => Some(format!(
                "ssh {} {}",
                shell_escape(endpoint),
                shell_escape(&format!("cat {}", remote_log(name)))
            )),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceHandle::Session { backend, name } => write!(f, "{} session {}", backend, name),
            ResourceHandle::Container { name } => write!(f, "container {}", name),
            ResourceHandle::Remote { endpoint, name } => write!(f, "remote {} on {}", name, endpoint),
            ResourceHandle::Process { pid } => write!(f, "process {}", pid),
            ResourceHandle::User { name } => write!(f, "user {}", name),
        }
    }
}

/// Resources currently owned by this invocation.
///
/// Cloning shares the same ledger, so a signal handler thread sees what the
/// drivers registered.
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    owned: Arc<Mutex<Vec<ResourceHandle>>>,
}

impl ResourceLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that this invocation owns `handle`
    pub fn register(&self, handle: ResourceHandle) {
        debug!("Owning {}", handle);
        let mut owned = self.owned.lock().unwrap_or_else(PoisonError::into_inner);
        if !owned.contains(&handle) {
            owned.push(handle);
        }
    }

    /// Give up ownership, either because it is gone or because it was handed to the user
    pub fn release(&self, handle: &ResourceHandle) {
        self.owned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|h| h != handle);
    }

    /// Currently owned resources, oldest first
    pub fn snapshot(&self) -> Vec<ResourceHandle> {
        self.owned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return everything owned, newest first
    pub fn take_all(&self) -> Vec<ResourceHandle> {
        let mut owned = self.owned.lock().unwrap_or_else(PoisonError::into_inner);
        let mut taken: Vec<_> = owned.drain(..).collect();
        taken.reverse();
        taken
    }
}

/// Removes backend resources; each teardown command is bounded by [`PROBE_TIMEOUT`]
#[derive(Debug, Clone, Copy, Default)]
pub struct Janitor;

impl Janitor {
    /// Tear down one resource
    pub async fn teardown(&self, handle: &ResourceHandle) -> Result<()> {
        let command = match handle {
            ResourceHandle::Session {
                backend: Backend::Screen,
                name,
            } => Command::builder("screen")
                .args(["-S", name.as_str(), "-X", "quit"])
                .build(),
            ResourceHandle::Session { name, .. } => Command::builder("tmux")
                .args(["kill-session", "-t"])
                .arg(format!("={}", name))
                .build(),
            ResourceHandle::Container { name } => Command::builder("docker")
                .args(["rm", "-f", name.as_str()])
                .build(),
            ResourceHandle::User { name } => Command::builder("sudo")
                .args(["-n", "userdel", "-r", name.as_str()])
                .build(),
            ResourceHandle::Process { pid } => return terminate_process(*pid),
            ResourceHandle::Remote { .. } => {
                debug!("{} is left running on the remote host", handle);
                return Ok(());
            }
        };

        let mut command = command;
        command.stdin(StdinMode::Null);
        let output = run_bounded(&command, PROBE_TIMEOUT).await?;
        if output.status.success() {
            debug!("Removed {}", handle);
            Ok(())
        } else {
            Err(Error::spawn_failed(format!(
                "could not remove {}: {}",
                handle,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Tear down everything still in the ledger, newest first.
    ///
    /// Failures are logged and returned; they are never fatal.
    pub async fn sweep(&self, ledger: &ResourceLedger) -> Vec<(ResourceHandle, Error)> {
        let mut failures = Vec::new();
        for handle in ledger.take_all() {
            if let Err(e) = self.teardown(&handle).await {
                warn!("Failed to clean up {}: {}", handle, e);
                failures.push((handle, e));
            }
        }
        failures
    }

    /// Blocking variant of [`Janitor::sweep`] for signal handler threads
    pub fn sweep_blocking(&self, ledger: &ResourceLedger) -> Vec<(ResourceHandle, Error)> {
        futures_lite::future::block_on(self.sweep(ledger))
    }
}

#[cfg(unix)]
fn terminate_process(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(Error::signal_failed(Signal::SIGTERM as i32, e.to_string())),
    }
}

#[cfg(not(unix))]
fn terminate_process(pid: u32) -> Result<()> {
    Err(Error::signal_failed(-1, format!("cannot signal process {pid} on this platform")))
}
