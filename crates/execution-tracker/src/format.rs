//! Status output formats

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::notation;
use crate::record::ExecutionRecord;

/// How `--status` prints a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Link doublets, as stored
    #[default]
    LinksNotation,
    /// Pretty-printed JSON
    Json,
    /// Human-readable report
    Text,
}

impl OutputFormat {
    /// Name accepted on the command line
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::LinksNotation => "links-notation",
            OutputFormat::Json => "json",
            OutputFormat::Text => "text",
        }
    }

    /// Render `record`
    pub fn render(self, record: &ExecutionRecord) -> Result<String> {
        match self {
            OutputFormat::LinksNotation => Ok(notation::encode_record(record)),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(record)?),
            OutputFormat::Text => Ok(text_report(record)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "links-notation" => Ok(OutputFormat::LinksNotation),
            "json" => Ok(OutputFormat::Json),
            "text" => Ok(OutputFormat::Text),
            other => Err(Error::UnknownFormat(other.to_string())),
        }
    }
}

fn text_report(record: &ExecutionRecord) -> String {
    let na = || "N/A".to_string();
    let mut lines = vec![
        "Execution Status".to_string(),
        "=".repeat(50),
        format!("UUID:              {}", record.uuid),
        format!("Status:            {}", record.status),
        format!(
            "Exit Code:         {}",
            record.exit_code.map(|c| c.to_string()).unwrap_or_else(na)
        ),
        format!("Command:           {}", record.command),
        format!(
            "PID:               {}",
            record.pid.map(|p| p.to_string()).unwrap_or_else(na)
        ),
        format!("Log Path:          {}", record.log_path),
        format!("Start Time:        {}", record.start_time.to_rfc3339()),
        format!(
            "End Time:          {}",
            record.end_time.map(|t| t.to_rfc3339()).unwrap_or_else(na)
        ),
        format!("Working Directory: {}", record.working_directory),
        format!("Shell:             {}", record.shell),
        format!("Platform:          {}", record.platform),
    ];
    if !record.options.is_empty() {
        lines.push("Options:".to_string());
        for (key, value) in &record.options {
            lines.push(format!("  {}: {}", key, value));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Outcome;

    fn record() -> ExecutionRecord {
        let mut record = ExecutionRecord::new("echo hello")
            .with_uuid("test-uuid-1234")
            .with_option("isolated", "screen");
        record.pid = Some(12345);
        record.finalize(Outcome::Exited(0));
        record
    }

    #[test]
    fn test_links_notation_is_the_default() {
        let out = OutputFormat::default().render(&record()).unwrap();
        assert!(out.contains(r#"(test-uuid-1234.status: status "executed")"#));
        assert!(out.contains(r#"(test-uuid-1234.command: command "echo hello")"#));
    }

    #[test]
    fn test_json() {
        let out = OutputFormat::Json.render(&record()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["uuid"], "test-uuid-1234");
        assert_eq!(parsed["exitCode"], 0);
        assert_eq!(parsed["options"]["isolated"], "screen");
    }

    #[test]
    fn test_text() {
        let out = OutputFormat::Text.render(&record()).unwrap();
        assert!(out.starts_with("Execution Status\n"));
        assert!(out.contains("Status:            executed"));
        assert!(out.contains("Exit Code:         0"));
        assert!(out.contains("PID:               12345"));
        assert!(out.contains("  isolated: \"screen\""));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!(matches!(
            "yaml".parse::<OutputFormat>(),
            Err(Error::UnknownFormat(_))
        ));
    }
}
