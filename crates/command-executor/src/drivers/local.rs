//! Direct execution on the current host.

use async_trait::async_trait;

use super::{Driver, DriverOutcome, RunContext};
use crate::attach::strategy;
use crate::backends::LocalLauncher;
use crate::command::Command;
use crate::error::Result;
use crate::isolation::{Backend, IsolationLevel};
use crate::janitor::ResourceHandle;
use crate::launcher::Launcher;
use crate::process::ProcessHandle;
use crate::reconcile::{OutputSink, reconcile};
use crate::users::run_as;

/// Spawns the command directly and streams both channels live.
///
/// There is no fallback capture path here, so completeness of output rests entirely
/// on [`reconcile`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDriver;

#[async_trait]
impl Driver for LocalDriver {
    fn backend(&self) -> Backend {
        Backend::Local
    }

    async fn run(
        &self,
        command: Command,
        level: &IsolationLevel,
        ctx: &RunContext<'_>,
        sink: &mut dyn OutputSink,
    ) -> Result<DriverOutcome> {
        strategy(Backend::Local, ctx.options.mode)?;
        let command = run_as(command, level.user.as_deref());
        let (events, mut handle) = LocalLauncher.launch(command).await?;

        let process = handle.pid().map(|pid| {
            (ctx.on_spawn)(pid);
            let resource = ResourceHandle::Process { pid };
            ctx.ledger.register(resource.clone());
            resource
        });

        let status = reconcile(events, &mut handle, sink).await?;
        if let Some(process) = &process {
            ctx.ledger.release(process);
        }

        Ok(DriverOutcome::finished(status.exit_code(), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::StdinMode;
    use crate::drivers::RunOptions;
    use crate::janitor::ResourceLedger;
    use crate::probe::SystemProbe;
    use crate::reconcile::Transcript;
    use std::sync::Mutex;

    fn sh(script: &str) -> Command {
        Command::builder("sh")
            .arg("-c")
            .arg(script)
            .stdin(StdinMode::Null)
            .build()
    }

    #[smol_potat::test]
    async fn test_echo_hi() {
        let options = RunOptions::default();
        let probe = SystemProbe::default();
        let ledger = ResourceLedger::new();
        let spawned = Mutex::new(None);
        let on_spawn = |pid: u32| *spawned.lock().unwrap() = Some(pid);
        let ctx = RunContext {
            options: &options,
            probe: &probe,
            ledger: &ledger,
            on_spawn: &on_spawn,
        };

        let mut transcript = Transcript::default();
        let outcome = LocalDriver
            .run(sh("echo hi"), &IsolationLevel::new(Backend::Local), &ctx, &mut transcript)
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(transcript.as_str(), "hi\n");
        assert!(spawned.lock().unwrap().is_some());
        assert!(ledger.snapshot().is_empty());
    }

    #[smol_potat::test]
    async fn test_exit_code_and_quoting_are_preserved() {
        let options = RunOptions::default();
        let probe = SystemProbe::default();
        let ledger = ResourceLedger::new();
        let ctx = RunContext {
            options: &options,
            probe: &probe,
            ledger: &ledger,
            on_spawn: &|_| {},
        };

        let script = r#"echo "it's a \"quote\" | not a pipe" | cat; exit 5"#;
        let mut transcript = Transcript::default();
        let outcome = LocalDriver
            .run(sh(script), &IsolationLevel::new(Backend::Local), &ctx, &mut transcript)
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 5);
        assert!(!outcome.success);
        assert_eq!(transcript.as_str(), "it's a \"quote\" | not a pipe\n");
    }
}
