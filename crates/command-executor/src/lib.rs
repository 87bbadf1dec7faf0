//! Isolation orchestration engine
//!
//! Runs a command inside a stack of execution environments: the local shell,
//! screen or tmux sessions, docker containers and remote hosts over ssh. The
//! outermost level is run here; deeper levels are re-invocations of the wrapper
//! composed by [`StackComposer`].
//!
//! Process spawning is runtime-agnostic (async-process/async-io), so the crate
//! works under smol, tokio or a plain `block_on`.

#![warn(missing_docs)]

pub mod attach;
pub mod backends;
pub mod command;
pub mod drivers;
pub mod error;
pub mod event;
pub mod isolation;
pub mod janitor;
pub mod launcher;
pub mod probe;
pub mod process;
pub mod reconcile;
pub mod shell;
pub mod stack;
pub mod users;

pub use attach::{AttachMode, Strategy, Terminal};
pub use backends::LocalLauncher;
pub use command::{Command, StdinMode, shell_escape};
pub use drivers::{Driver, DriverOutcome, EnvironmentDriver, RunContext, RunOptions};
pub use error::{Error, Result};
pub use event::{LogSource, ProcessEvent};
pub use isolation::{
    Backend, IsolationLevel, IsolationRequest, IsolationSpec, LevelOption, MAX_DEPTH,
};
pub use janitor::{Janitor, ResourceHandle, ResourceLedger};
pub use launcher::Launcher;
pub use probe::{CapabilityProbe, Feature, SystemProbe, Tool, ToolInfo, Version};
pub use process::{ExitResult, ExitStatus, ProcessHandle};
pub use reconcile::{Console, OutputSink, Tee, Transcript, reconcile};
pub use shell::Shell;
pub use stack::{ComposedLevel, ForwardedFlags, StackComposer};
