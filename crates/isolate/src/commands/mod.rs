pub mod cleanup;
pub mod run;
pub mod status;

use anyhow::{Context, Result};
use command_executor::Error;
use execution_tracker::ExecutionStore;

use crate::config::Config;

/// Exit code for a wrapper failure that kept the command from completing
pub fn exit_code_for(error: &Error) -> i32 {
    match error {
        Error::Configuration(_) => 2,
        Error::ToolUnavailable { .. } => 127,
        _ => 1,
    }
}

/// The store queries read from; an error when tracking is off
fn query_store(config: &Config) -> Result<ExecutionStore> {
    if !config.tracking_enabled {
        anyhow::bail!("Execution tracking is disabled (ISOLATE_DISABLE_TRACKING)");
    }
    ExecutionStore::open(&config.app_folder).with_context(|| {
        format!(
            "Failed to open execution store at {}",
            config.app_folder.display()
        )
    })
}
