//! Seams for behavior that lives outside the wrapper

use std::path::Path;

use tracing::debug;

/// Turns user input into the command that actually runs
pub trait CommandRewriter {
    /// The command to execute for `input`
    fn rewrite(&self, input: &str) -> String;
}

/// Runs the command exactly as given
#[derive(Debug, Clone, Copy, Default)]
pub struct Verbatim;

impl CommandRewriter for Verbatim {
    fn rewrite(&self, input: &str) -> String {
        input.to_string()
    }
}

/// Told about executions that finished with a non-zero exit code
pub trait FailureReporter {
    /// Report one failed execution
    fn report_failure(&self, command: &str, exit_code: i32, log_path: &Path);
}

/// Reports nowhere
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReport;

impl FailureReporter for NoReport {
    fn report_failure(&self, command: &str, exit_code: i32, log_path: &Path) {
        debug!(
            "{} failed with exit code {} (log: {})",
            command,
            exit_code,
            log_path.display()
        );
    }
}
