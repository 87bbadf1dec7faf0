//! Spine-style terminal blocks printed around a run

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// What the start block shows
#[derive(Debug, Clone, Default)]
pub struct StartBlock {
    /// Execution UUID
    pub uuid: String,
    /// Start time
    pub start: DateTime<Utc>,
    /// Isolation stack; absent for direct runs
    pub isolation: Option<String>,
    /// attached or detached
    pub mode: String,
    /// Container image of the outermost docker level
    pub container: Option<String>,
    /// Endpoint of the outermost ssh level
    pub endpoint: Option<String>,
    /// Run-as-user
    pub user: Option<String>,
    /// The command as typed
    pub command: String,
}

impl StartBlock {
    /// Render the block
    pub fn render(&self) -> String {
        let mut lines = vec![
            spine("session", &self.uuid),
            spine("start", &self.start.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
        ];
        if let Some(stack) = &self.isolation {
            lines.push(spine("isolation", stack));
            lines.push(spine("mode", &self.mode));
        }
        for (key, value) in [
            ("container", &self.container),
            ("endpoint", &self.endpoint),
            ("user", &self.user),
        ] {
            if let Some(value) = value {
                lines.push(spine(key, value));
            }
        }
        lines.push("│".to_string());
        lines.push(format!("$ {}", self.command));
        lines.join("\n")
    }
}

/// The block printed once the run is over
pub fn finish_block(exit_code: i32, end: DateTime<Utc>, elapsed: Duration, log: &Path) -> String {
    let mark = if exit_code == 0 { "✓" } else { "✗" };
    [
        mark.to_string(),
        spine("finish", &end.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
        spine("duration", &format_duration(elapsed)),
        spine("exit", &exit_code.to_string()),
        spine("log", &log.display().to_string()),
    ]
    .join("\n")
}

/// `<ms>ms` below one second, `<s.sss>s` above
pub fn format_duration(elapsed: Duration) -> String {
    if elapsed < Duration::from_secs(1) {
        format!("{}ms", elapsed.as_millis())
    } else {
        format!("{:.3}s", elapsed.as_secs_f64())
    }
}

fn spine(key: &str, value: &str) -> String {
    format!("│ {:<9} {}", key, value)
}
