//! Running a command through its isolation stack

use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use command_executor::{
    AttachMode, Console, Driver, DriverOutcome, EnvironmentDriver, Janitor, LevelOption,
    ResourceHandle, ResourceLedger, RunContext, RunOptions, StackComposer, SystemProbe, Tee,
    Terminal,
};
use execution_tracker::{ActiveExecution, ExecutionRecord, ExecutionStore, Outcome, SignalHandler};
use tracing::{debug, warn};

use super::exit_code_for;
use crate::cli::Cli;
use crate::collaborators::{CommandRewriter, FailureReporter};
use crate::config::Config;
use crate::log_file::{LogHeader, LogWriter, SharedLog, log_path};
use crate::output::{StartBlock, finish_block};
use crate::request::RunRequest;

/// The external behavior a run is wired to
pub struct Collaborators<'a> {
    /// Rewrites the typed command before it runs
    pub rewriter: &'a dyn CommandRewriter,
    /// Told about non-zero exits
    pub reporter: &'a dyn FailureReporter,
}

/// Run the command `cli` describes. Returns the process exit code.
pub async fn run(cli: &Cli, config: &Config, collaborators: &Collaborators<'_>) -> i32 {
    // Nothing is recorded or spawned for an invalid request.
    let request = match RunRequest::from_cli(cli) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_code_for(&e);
        }
    };
    let command = collaborators.rewriter.rewrite(&request.command);
    if command != request.command {
        debug!("Rewrote {:?} to {:?}", request.command, command);
    }

    let log = SharedLog::new(LogWriter::create(log_path(
        &config.log_dir,
        &request.environment_label(),
    )));
    let record = log.with(|l| new_record(&request, &command, l.path()));
    let store = open_store(config);
    if let Some(store) = &store {
        if let Err(e) = store.create(&record) {
            if matches!(e, execution_tracker::Error::Duplicate(_)) {
                eprintln!("Error: execution {} already exists", record.uuid);
                return 2;
            }
            warn!("Could not record execution {}: {}", record.uuid, e);
        }
    }

    let ledger = ResourceLedger::new();
    let active = ActiveExecution::new();
    active.track(record.clone(), store.clone());
    {
        let ledger = ledger.clone();
        let log = log.clone();
        let flags = request.flags;
        active.on_teardown(move |code| {
            log.with(|l| l.footer(code));
            disown(&ledger, flags.keep_alive, flags.keep_user);
            Janitor.sweep_blocking(&ledger);
        });
    }
    let signals = match SignalHandler::install(active.clone()) {
        Ok(handler) => Some(handler),
        Err(e) => {
            warn!("Signal handling unavailable: {}", e);
            None
        }
    };

    let started = Instant::now();
    let code = execute(&request, &command, config, &record, &log, &ledger, &active).await;
    let elapsed = started.elapsed();

    // A signal may have finalized the record while the command was being torn down.
    let exit_code = match active.finish(Outcome::Exited(code)) {
        Some(_) => code,
        None => active.interrupted().map_or(code, Outcome::exit_code),
    };
    if let Some(signals) = signals {
        signals.close();
    }
    disown(&ledger, request.flags.keep_alive, request.flags.keep_user);
    Janitor.sweep(&ledger).await;

    println!();
    println!(
        "{}",
        finish_block(exit_code, Utc::now(), elapsed, Path::new(&record.log_path))
    );

    if exit_code != 0 {
        collaborators
            .reporter
            .report_failure(&command, exit_code, Path::new(&record.log_path));
    }
    exit_code
}

async fn execute(
    request: &RunRequest,
    command: &str,
    config: &Config,
    record: &ExecutionRecord,
    log: &SharedLog,
    ledger: &ResourceLedger,
    active: &ActiveExecution,
) -> i32 {
    let header = LogHeader {
        uuid: record.uuid.clone(),
        command: command.to_string(),
        environment: if request.isolated {
            request.spec.to_string()
        } else {
            "direct".to_string()
        },
        mode: request.mode.to_string(),
        session: request.first(LevelOption::Session),
        image: request.first(LevelOption::Image),
        endpoint: request.first(LevelOption::Endpoint),
        user: request.first(LevelOption::User),
        shell: record.shell.clone(),
        platform: record.platform.clone(),
        working_directory: record.working_directory.clone(),
    };
    log.with(|l| l.header(&header));

    println!(
        "{}",
        StartBlock {
            uuid: record.uuid.clone(),
            start: record.start_time,
            isolation: request.isolated.then(|| request.spec.to_string()),
            mode: request.mode.to_string(),
            container: request.first(LevelOption::Image),
            endpoint: request.first(LevelOption::Endpoint),
            user: request.first(LevelOption::User),
            command: command.to_string(),
        }
        .render()
    );
    println!();

    let composed = StackComposer::new(&config.self_program)
        .forwarding(request.flags)
        .environment(config.forwarded_env())
        .compose(&request.spec, command);
    debug!(
        "Level {} ({}) runs: {}",
        composed.depth, composed.level.backend, composed.command
    );

    let options = RunOptions {
        mode: request.mode,
        keep_alive: request.flags.keep_alive,
        auto_remove: request.flags.auto_remove,
        terminal: Terminal::detect(),
        capture_dir: config.log_dir.clone(),
    };
    let probe = SystemProbe::default();
    let on_spawn = |pid: u32| {
        debug!("Spawned process {}", pid);
        active.update(|r| {
            r.options.insert("childPid".to_string(), pid.into());
        });
    };
    let ctx = RunContext {
        options: &options,
        probe: &probe,
        ledger,
        on_spawn: &on_spawn,
    };

    let driver = EnvironmentDriver::for_backend(composed.level.backend);
    let mut sink = Tee(Console, log.clone());
    let result = driver
        .run(composed.command, &composed.level, &ctx, &mut sink)
        .await;

    let exit_code = match result {
        Ok(outcome) => {
            log.with(|l| report_outcome(&outcome, request.mode, l));
            outcome.exit_code
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            log.with(|l| l.note(&format!("Error: {}", e)));
            exit_code_for(&e)
        }
    };
    log.with(|l| l.footer(exit_code));
    exit_code
}

fn report_outcome(outcome: &DriverOutcome, mode: AttachMode, log: &mut LogWriter) {
    // Detached starts carry the reattach hint; attached runs only print notes.
    if mode == AttachMode::Detached || outcome.message.lines().count() > 1 {
        println!();
        println!("{}", outcome.message);
    }
    log.note(&outcome.message);
}

fn new_record(request: &RunRequest, command: &str, log: &Path) -> ExecutionRecord {
    let mut record = ExecutionRecord::new(command);
    if let Some(id) = &request.session_id {
        record = record.with_uuid(id.clone());
    }
    record.pid = Some(std::process::id());
    record.log_path = log.to_string_lossy().into_owned();

    let mut record = record
        .with_option("mode", request.mode.as_str())
        .with_option("keepAlive", request.flags.keep_alive)
        .with_option("autoRemoveDockerContainer", request.flags.auto_remove)
        .with_option("keepUser", request.flags.keep_user);
    if request.isolated {
        record = record.with_option("isolated", request.spec.to_string());
    }
    for (key, option) in [
        ("session", LevelOption::Session),
        ("image", LevelOption::Image),
        ("endpoint", LevelOption::Endpoint),
        ("user", LevelOption::User),
    ] {
        if let Some(value) = request.first(option) {
            record = record.with_option(key, value);
        }
    }
    record
}

fn open_store(config: &Config) -> Option<ExecutionStore> {
    if !config.tracking_enabled {
        debug!("Execution tracking disabled");
        return None;
    }
    match ExecutionStore::open(&config.app_folder) {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(
                "Execution tracking unavailable at {}: {}",
                config.app_folder.display(),
                e
            );
            None
        }
    }
}

/// Hand resources the user asked to keep over to them before a sweep
fn disown(ledger: &ResourceLedger, keep_alive: bool, keep_user: bool) {
    for handle in ledger.snapshot() {
        let kept = match handle {
            ResourceHandle::Session { .. }
            | ResourceHandle::Container { .. }
            | ResourceHandle::Remote { .. } => keep_alive,
            ResourceHandle::User { .. } => keep_user,
            ResourceHandle::Process { .. } => false,
        };
        if kept {
            debug!("Leaving {} in place", handle);
            ledger.release(&handle);
        }
    }
}
