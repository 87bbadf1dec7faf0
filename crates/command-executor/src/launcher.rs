//! Launcher trait for spawning commands with observable output

use async_trait::async_trait;
use futures::stream::Stream;

use crate::command::Command;
use crate::error::Result;
use crate::event::ProcessEvent;
use crate::process::{ExitResult, ProcessHandle};
use crate::reconcile::{Transcript, reconcile};

/// A launcher that can start commands and expose their output as events
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    /// The event stream type this launcher produces
    type EventStream: Stream<Item = ProcessEvent> + Send + Unpin;

    /// The process handle type this launcher produces
    type Handle: ProcessHandle;

    /// Launch a command, returning its event stream and control handle
    async fn launch(&self, command: Command) -> Result<(Self::EventStream, Self::Handle)>;

    /// Execute a command and wait for it to complete, capturing output
    async fn execute(&self, command: Command) -> Result<ExitResult> {
        let (events, mut handle) = self.launch(command).await?;
        let mut transcript = Transcript::default();
        let status = reconcile(events, &mut handle, &mut transcript).await?;
        Ok(ExitResult {
            status,
            output: transcript.into_string(),
        })
    }
}
