//! Shared helpers for driver integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use command_executor::{
    CapabilityProbe, Command, Driver, DriverOutcome, IsolationLevel, OutputSink, ResourceLedger,
    Result, RunContext, RunOptions, StdinMode, SystemProbe, Tool, ToolInfo, Transcript,
};

/// A probe that reports every tool as missing
pub struct NothingInstalled;

#[async_trait]
impl CapabilityProbe for NothingInstalled {
    async fn probe(&self, tool: Tool) -> ToolInfo {
        ToolInfo::missing(tool)
    }
}

/// `sh -c <script>` with stdin closed
pub fn sh(script: &str) -> Command {
    Command::builder("sh")
        .arg("-c")
        .arg(script)
        .stdin(StdinMode::Null)
        .build()
}

/// Everything one driver run produced
pub struct Run {
    pub outcome: Result<DriverOutcome>,
    pub output: String,
    pub ledger: ResourceLedger,
}

/// Run `command` at `level` with the real system probe
pub async fn run_level(
    driver: &dyn Driver,
    command: Command,
    level: &IsolationLevel,
    options: &RunOptions,
) -> Run {
    run_level_with(driver, command, level, options, &SystemProbe::default()).await
}

/// Run `command` at `level` with the given probe
pub async fn run_level_with(
    driver: &dyn Driver,
    command: Command,
    level: &IsolationLevel,
    options: &RunOptions,
    probe: &dyn CapabilityProbe,
) -> Run {
    let ledger = ResourceLedger::new();
    let ctx = RunContext {
        options,
        probe,
        ledger: &ledger,
        on_spawn: &|_| {},
    };
    let mut transcript = Transcript::default();
    let outcome = driver
        .run(command, level, &ctx, &mut transcript as &mut dyn OutputSink)
        .await;
    Run {
        outcome,
        output: transcript.into_string(),
        ledger,
    }
}
