//! Environment drivers.
//!
//! Each backend kind has one driver implementing [`Driver::run`]. The closed
//! [`EnvironmentDriver`] enum selects the driver for a [`Backend`]; adding a backend
//! means adding a variant here, not matching on names elsewhere.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::attach::{AttachMode, Terminal};
use crate::command::Command;
use crate::error::Result;
use crate::isolation::{Backend, IsolationLevel};
use crate::janitor::{ResourceHandle, ResourceLedger};
use crate::probe::CapabilityProbe;
use crate::reconcile::OutputSink;
use crate::users;

pub mod docker;
pub mod local;
pub mod multiplexer;
pub mod ssh;

pub use docker::{DockerDriver, default_docker_image};
pub use local::LocalDriver;
pub use multiplexer::{Multiplexer, MultiplexerDriver};
pub use ssh::SshDriver;

/// Per-invocation settings shared by all drivers
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Attached or detached
    pub mode: AttachMode,
    /// Leave the backing resource running after the command exits
    pub keep_alive: bool,
    /// Remove detached containers when they exit
    pub auto_remove: bool,
    /// Terminal availability of the wrapper
    pub terminal: Terminal,
    /// Directory for session capture files
    pub capture_dir: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: AttachMode::Attached,
            keep_alive: false,
            auto_remove: false,
            terminal: Terminal::none(),
            capture_dir: std::env::temp_dir(),
        }
    }
}

/// What a driver needs besides the command
pub struct RunContext<'a> {
    /// Invocation settings
    pub options: &'a RunOptions,
    /// Tool capability source
    pub probe: &'a dyn CapabilityProbe,
    /// Ownership of created resources
    pub ledger: &'a ResourceLedger,
    /// Called with the pid of the local process a driver spawns
    pub on_spawn: &'a (dyn Fn(u32) + Send + Sync),
}

/// Result of running one level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOutcome {
    /// Whether the command succeeded (or, detached, started)
    pub success: bool,
    /// Exit code of the command; 0 for a successful detached start
    pub exit_code: i32,
    /// Human readable summary, including reattach hints
    pub message: String,
    /// The backing resource, surfaced so the user can find it
    pub resource: Option<ResourceHandle>,
}

impl DriverOutcome {
    /// Outcome for a command that ran to completion
    pub fn finished(exit_code: i32, resource: Option<ResourceHandle>) -> Self {
        let message = if exit_code == 0 {
            "Command completed".to_string()
        } else {
            format!("Command exited with code {}", exit_code)
        };
        Self {
            success: exit_code == 0,
            exit_code,
            message,
            resource,
        }
    }

    /// Outcome for a resource started in the background
    pub fn started(resource: ResourceHandle, message: String) -> Self {
        Self {
            success: true,
            exit_code: 0,
            message,
            resource: Some(resource),
        }
    }

    /// Append a line to the message
    pub fn with_note(mut self, note: impl AsRef<str>) -> Self {
        if !self.message.is_empty() {
            self.message.push('\n');
        }
        self.message.push_str(note.as_ref());
        self
    }
}

/// Runs a command inside one kind of environment
#[async_trait]
pub trait Driver: Send + Sync {
    /// The backend this driver implements
    fn backend(&self) -> Backend;

    /// Run `command` inside this environment, configured by `level`
    async fn run(
        &self,
        command: Command,
        level: &IsolationLevel,
        ctx: &RunContext<'_>,
        sink: &mut dyn OutputSink,
    ) -> Result<DriverOutcome>;
}

/// Driver selection by backend kind
#[derive(Debug, Clone, Copy)]
pub enum EnvironmentDriver {
    /// Platform shell
    Local(LocalDriver),
    /// screen or tmux
    Multiplexer(MultiplexerDriver),
    /// Docker
    Docker(DockerDriver),
    /// ssh
    Ssh(SshDriver),
}

impl EnvironmentDriver {
    /// The driver for `backend`
    pub fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::Local => EnvironmentDriver::Local(LocalDriver),
            Backend::Screen => EnvironmentDriver::Multiplexer(MultiplexerDriver::new(Multiplexer::Screen)),
            Backend::Tmux => EnvironmentDriver::Multiplexer(MultiplexerDriver::new(Multiplexer::Tmux)),
            Backend::Docker => EnvironmentDriver::Docker(DockerDriver),
            Backend::Ssh => EnvironmentDriver::Ssh(SshDriver),
        }
    }

    fn as_driver(&self) -> &dyn Driver {
        match self {
            EnvironmentDriver::Local(d) => d,
            EnvironmentDriver::Multiplexer(d) => d,
            EnvironmentDriver::Docker(d) => d,
            EnvironmentDriver::Ssh(d) => d,
        }
    }
}

#[async_trait]
impl Driver for EnvironmentDriver {
    fn backend(&self) -> Backend {
        self.as_driver().backend()
    }

    async fn run(
        &self,
        command: Command,
        level: &IsolationLevel,
        ctx: &RunContext<'_>,
        sink: &mut dyn OutputSink,
    ) -> Result<DriverOutcome> {
        // Run-as-user levels need the account on this host before anything starts.
        if let Some(user) = &level.user {
            users::ensure_user(user, ctx.ledger).await?;
        }
        self.as_driver().run(command, level, ctx, sink).await
    }
}

/// A session handle of the form `<backend>-<unix-millis>-<6 alphanumerics>`
pub fn session_name(backend: Backend) -> String {
    format!(
        "{}-{}-{}",
        backend,
        chrono::Utc::now().timestamp_millis(),
        users::random_suffix(6)
    )
}
