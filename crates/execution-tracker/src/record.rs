//! Execution records and their lifecycle

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Exit code recorded for executions that never reported their own
pub const STALE_EXIT_CODE: i32 = -1;

/// Lifecycle state of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Started and not yet finalized
    Executing,
    /// Finalized with an exit code
    Executed,
}

impl ExecutionStatus {
    /// Lowercase name as stored
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Executing => "executing",
            ExecutionStatus::Executed => "executed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "executing" => Ok(ExecutionStatus::Executing),
            "executed" => Ok(ExecutionStatus::Executed),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// How an execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The command exited with this code
    Exited(i32),
    /// The wrapper received this signal number
    Signalled(i32),
    /// The execution was found abandoned
    Stale,
}

impl Outcome {
    /// Exit code recorded for this outcome
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Exited(code) => code,
            Outcome::Signalled(signal) => 128 + signal,
            Outcome::Stale => STALE_EXIT_CODE,
        }
    }
}

/// Lifecycle record of one wrapper invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Identity of the invocation
    pub uuid: String,
    /// PID of the spawned child, once known
    pub pid: Option<u32>,
    /// Lifecycle state
    pub status: ExecutionStatus,
    /// Exit code, once executed
    pub exit_code: Option<i32>,
    /// The command as the user gave it
    pub command: String,
    /// Log artifact path
    pub log_path: String,
    /// When the invocation started
    pub start_time: DateTime<Utc>,
    /// When the record was finalized
    pub end_time: Option<DateTime<Utc>>,
    /// Working directory of the wrapper
    pub working_directory: String,
    /// Shell used for the command
    pub shell: String,
    /// Host platform
    pub platform: String,
    /// Invocation options, opaque to the store
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

impl ExecutionRecord {
    /// A fresh `executing` record with a new UUID
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            pid: None,
            status: ExecutionStatus::Executing,
            exit_code: None,
            command: command.into(),
            log_path: String::new(),
            start_time: Utc::now(),
            end_time: None,
            working_directory: std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            shell: std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()),
            platform: std::env::consts::OS.to_string(),
            options: BTreeMap::new(),
        }
    }

    /// Use a caller-chosen UUID
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    /// Set an option value
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Whether the record is still `executing`
    pub fn is_executing(&self) -> bool {
        self.status == ExecutionStatus::Executing
    }

    /// Move to `executed` with the outcome's exit code.
    ///
    /// This is the only transition a record makes. Returns `false` if the record
    /// was already executed, in which case nothing changes.
    pub fn finalize(&mut self, outcome: Outcome) -> bool {
        if !self.is_executing() {
            return false;
        }
        self.status = ExecutionStatus::Executed;
        self.exit_code = Some(outcome.exit_code());
        self.end_time = Some(Utc::now());
        true
    }

    /// Fields in storage order, as `(key, value)` text pairs. Absent values are omitted.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("uuid", self.uuid.clone())];
        if let Some(pid) = self.pid {
            fields.push(("pid", pid.to_string()));
        }
        fields.push(("status", self.status.to_string()));
        if let Some(code) = self.exit_code {
            fields.push(("exitCode", code.to_string()));
        }
        fields.push(("command", self.command.clone()));
        fields.push(("logPath", self.log_path.clone()));
        fields.push(("startTime", self.start_time.to_rfc3339()));
        if let Some(end) = self.end_time {
            fields.push(("endTime", end.to_rfc3339()));
        }
        fields.push(("workingDirectory", self.working_directory.clone()));
        fields.push(("shell", self.shell.clone()));
        fields.push(("platform", self.platform.clone()));
        if !self.options.is_empty() {
            // BTreeMap serialization cannot fail.
            let options = serde_json::to_string(&self.options).unwrap_or_default();
            fields.push(("options", options));
        }
        fields
    }

    /// Rebuild a record from `(key, value)` pairs; `line` locates errors.
    ///
    /// Unknown keys are ignored so older binaries can read newer stores.
    pub fn from_fields<'a, I>(fields: I, line: usize) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut uuid = None;
        let mut pid: Option<u32> = None;
        let mut status: Option<ExecutionStatus> = None;
        let mut exit_code: Option<i32> = None;
        let mut command = None;
        let mut log_path = String::new();
        let mut start_time = None;
        let mut end_time = None;
        let mut working_directory = String::new();
        let mut shell = String::new();
        let mut platform = String::new();
        let mut options = BTreeMap::new();

        for (key, value) in fields {
            match key {
                "uuid" => uuid = Some(value.to_string()),
                "pid" => pid = Some(parse_number(key, value, line)?),
                "status" => {
                    status = Some(value.parse::<ExecutionStatus>().map_err(|e: String| Error::parse(line, e))?)
                }
                "exitCode" => exit_code = Some(parse_number(key, value, line)?),
                "command" => command = Some(value.to_string()),
                "logPath" => log_path = value.to_string(),
                "startTime" => start_time = Some(parse_time(key, value, line)?),
                "endTime" => end_time = Some(parse_time(key, value, line)?),
                "workingDirectory" => working_directory = value.to_string(),
                "shell" => shell = value.to_string(),
                "platform" => platform = value.to_string(),
                "options" => {
                    options = serde_json::from_str(value)
                        .map_err(|e| Error::parse(line, format!("options: {}", e)))?
                }
                _ => {}
            }
        }

        let missing = |key: &str| Error::parse(line, format!("record is missing {}", key));
        Ok(Self {
            uuid: uuid.ok_or_else(|| missing("uuid"))?,
            pid,
            status: status.ok_or_else(|| missing("status"))?,
            exit_code,
            command: command.ok_or_else(|| missing("command"))?,
            log_path,
            start_time: start_time.ok_or_else(|| missing("startTime"))?,
            end_time,
            working_directory,
            shell,
            platform,
            options,
        })
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str, line: usize) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::parse(line, format!("{} is not a number: {}", key, value)))
}

fn parse_time(key: &str, value: &str, line: usize) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::parse(line, format!("{}: {}", key, e)))
}
