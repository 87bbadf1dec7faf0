//! Per-execution log artifact.
//!
//! Every run writes one file holding a header describing the invocation, the
//! complete interleaved output, and a footer with the exit code. Failing to
//! write it is logged and otherwise ignored.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use command_executor::{LogSource, OutputSink};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::warn;

const RULE_WIDTH: usize = 50;

/// `<dir>/isolate-<label>-<unix-millis>-<6 alphanumerics>.log`
pub fn log_path(dir: &Path, label: &str) -> PathBuf {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    dir.join(format!(
        "isolate-{}-{}-{}.log",
        label,
        Utc::now().timestamp_millis(),
        suffix
    ))
}

/// What the header records about an invocation
#[derive(Debug, Clone, Default)]
pub struct LogHeader {
    /// Execution UUID
    pub uuid: String,
    /// The command as typed
    pub command: String,
    /// Isolation stack, or `direct`
    pub environment: String,
    /// attached or detached
    pub mode: String,
    /// Requested session name
    pub session: Option<String>,
    /// Requested container image
    pub image: Option<String>,
    /// Requested ssh endpoint
    pub endpoint: Option<String>,
    /// Run-as-user
    pub user: Option<String>,
    /// Shell of the invoking user
    pub shell: String,
    /// Host platform
    pub platform: String,
    /// Working directory of the wrapper
    pub working_directory: String,
}

impl LogHeader {
    fn render(&self) -> String {
        let optional = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        let mut out = String::from("=== Start Command Log ===\n");
        let fields = [
            ("Timestamp", Utc::now().to_rfc3339()),
            ("UUID", self.uuid.clone()),
            ("Command", self.command.clone()),
            ("Environment", self.environment.clone()),
            ("Mode", self.mode.clone()),
            ("Session", optional(&self.session)),
            ("Image", optional(&self.image)),
            ("Endpoint", optional(&self.endpoint)),
            ("User", optional(&self.user)),
            ("Shell", self.shell.clone()),
            ("Platform", self.platform.clone()),
            ("Runtime", format!("isolate {}", env!("CARGO_PKG_VERSION"))),
            ("Working Directory", self.working_directory.clone()),
        ];
        for (key, value) in fields {
            out.push_str(&format!("{}: {}\n", key, value));
        }
        out.push_str(&"=".repeat(RULE_WIDTH));
        out.push('\n');
        out
    }
}

/// The open log artifact; also an [`OutputSink`] for the command's output
#[derive(Debug)]
pub struct LogWriter {
    path: PathBuf,
    file: Option<File>,
    /// Whether the last byte written ended a line
    line_start: bool,
}

impl LogWriter {
    /// Create the file at `path`. On failure the writer discards everything.
    pub fn create(path: PathBuf) -> Self {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = match File::create(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Could not create log file {}: {}", path.display(), e);
                None
            }
        };
        Self {
            path,
            file,
            line_start: true,
        }
    }

    /// Where the log lives
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the header block
    pub fn header(&mut self, header: &LogHeader) {
        self.write(&header.render());
    }

    /// Write the footer block, on a fresh line, and close the file.
    ///
    /// Only the first footer is written; anything after it is discarded.
    pub fn footer(&mut self, exit_code: i32) {
        if !self.line_start {
            self.write("\n");
        }
        self.write(&format!(
            "{}\nFinished: {}\nExit Code: {}\n",
            "=".repeat(RULE_WIDTH),
            Utc::now().to_rfc3339(),
            exit_code
        ));
        self.file = None;
    }

    /// Append a free-form line
    pub fn note(&mut self, text: &str) {
        if !self.line_start {
            self.write("\n");
        }
        self.write(&format!("{}\n", text));
    }

    fn write(&mut self, text: &str) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if let Some(last) = text.chars().last() {
            self.line_start = last == '\n';
        }
        if let Err(e) = file.write_all(text.as_bytes()).and_then(|_| file.flush()) {
            warn!("Could not write log file {}: {}", self.path.display(), e);
            self.file = None;
        }
    }
}

impl OutputSink for LogWriter {
    fn output(&mut self, _source: LogSource, text: &str) {
        self.write(text);
    }
}

/// A [`LogWriter`] shared between the run and the signal thread
#[derive(Debug, Clone)]
pub struct SharedLog(Arc<Mutex<LogWriter>>);

impl SharedLog {
    /// Share `writer`
    pub fn new(writer: LogWriter) -> Self {
        Self(Arc::new(Mutex::new(writer)))
    }

    /// Run `f` with exclusive access to the writer
    pub fn with<T>(&self, f: impl FnOnce(&mut LogWriter) -> T) -> T {
        let mut writer = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut writer)
    }
}

impl OutputSink for SharedLog {
    fn output(&mut self, source: LogSource, text: &str) {
        self.with(|log| log.output(source, text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path_shape() {
        let path = log_path(Path::new("/tmp"), "docker");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("isolate-docker-"));
        assert!(name.ends_with(".log"));
        let stem = name.trim_end_matches(".log");
        assert_eq!(stem.rsplit('-').next().unwrap().len(), 6);
    }

    #[test]
    fn test_header_output_and_footer() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = LogWriter::create(log_path(dir.path(), "direct"));
        log.header(&LogHeader {
            uuid: "u-1".into(),
            command: "echo hi".into(),
            environment: "direct".into(),
            mode: "attached".into(),
            image: Some("alpine".into()),
            ..Default::default()
        });
        log.output(LogSource::Stdout, "hi\n");
        log.output(LogSource::Stderr, "warning\n");
        log.footer(0);

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "=== Start Command Log ===");
        assert!(lines.contains(&"UUID: u-1"));
        assert!(lines.contains(&"Command: echo hi"));
        assert!(lines.contains(&"Image: alpine"));
        assert!(lines.contains(&"Session: -"));
        assert!(text.contains("\nhi\nwarning\n"));
        assert!(text.ends_with("Exit Code: 0\n"));
    }

    #[test]
    fn test_footer_starts_on_its_own_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = LogWriter::create(log_path(dir.path(), "direct"));
        log.output(LogSource::Stdout, "no newline");
        log.footer(4);

        let text = std::fs::read_to_string(log.path()).unwrap();
        assert!(text.starts_with(&format!("no newline\n{}\n", "=".repeat(RULE_WIDTH))));
        assert!(text.ends_with("Exit Code: 4\n"));
    }

    #[test]
    fn test_only_the_first_footer_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let log = SharedLog::new(LogWriter::create(log_path(dir.path(), "direct")));
        let mut sink = log.clone();
        sink.output(LogSource::Stdout, "before\n");
        log.with(|l| l.footer(130));
        sink.output(LogSource::Stdout, "late\n");
        log.with(|l| l.footer(0));

        let text = std::fs::read_to_string(log.with(|l| l.path().to_path_buf())).unwrap();
        assert!(text.contains("before\n"));
        assert!(!text.contains("late"));
        assert!(text.ends_with("Exit Code: 130\n"));
        assert_eq!(text.matches("Exit Code:").count(), 1);
    }

    #[test]
    fn test_unwritable_path_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();
        let mut log = LogWriter::create(blocker.join("nested").join("x.log"));
        log.output(LogSource::Stdout, "dropped\n");
        log.footer(1);
        assert!(!log.path().exists());
    }
}
