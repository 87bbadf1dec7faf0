//! Capability probing for external tools.
//!
//! Drivers never parse versions themselves; they ask whether a tool is installed
//! and whether it supports a [`Feature`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_io::Timer;
use async_process::Stdio;
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::command::{Command, StdinMode};
use crate::error::{Error, Result};

/// Upper bound for any auxiliary command (version checks, liveness checks, teardown)
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// External tools the drivers depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// GNU screen
    Screen,
    /// tmux
    Tmux,
    /// Docker CLI
    Docker,
    /// OpenSSH client
    Ssh,
    /// sudo, for run-as-user and isolated users
    Sudo,
}

impl Tool {
    /// Executable name
    pub fn binary(self) -> &'static str {
        match self {
            Tool::Screen => "screen",
            Tool::Tmux => "tmux",
            Tool::Docker => "docker",
            Tool::Ssh => "ssh",
            Tool::Sudo => "sudo",
        }
    }

    fn version_args(self) -> &'static [&'static str] {
        match self {
            Tool::Screen => &["-v"],
            Tool::Tmux => &["-V"],
            Tool::Docker => &["--version"],
            // OpenSSH prints its version on stderr
            Tool::Ssh => &["-V"],
            Tool::Sudo => &["--version"],
        }
    }

    /// How to install the tool
    pub fn install_hint(self) -> &'static str {
        match self {
            Tool::Screen => {
                "sudo apt-get install screen (Debian/Ubuntu) or brew install screen (macOS)"
            }
            Tool::Tmux => "sudo apt-get install tmux (Debian/Ubuntu) or brew install tmux (macOS)",
            Tool::Docker => "https://docs.docker.com/get-docker/",
            Tool::Ssh => {
                "sudo apt-get install openssh-client (Debian/Ubuntu); ships with macOS"
            }
            Tool::Sudo => "sudo apt-get install sudo (Debian/Ubuntu)",
        }
    }

    /// The error reported when this tool is missing
    pub fn unavailable(self) -> Error {
        Error::ToolUnavailable {
            binary: self.binary().to_string(),
            hint: self.install_hint().to_string(),
        }
    }
}

/// A numeric (major, minor, patch) version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major component
    pub major: u64,
    /// Minor component
    pub minor: u64,
    /// Patch component, 0 when the tool omits it
    pub patch: u64,
}

impl Version {
    /// Construct a version triple
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Extract the first version triple from free-form version output.
    ///
    /// Accepts zero padded components (`4.09.01`) and a missing patch (`3.3a`).
    pub fn parse(text: &str) -> Option<Self> {
        let re = Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").ok()?;
        let caps = re.captures(text)?;
        let component = |i: usize| {
            caps.get(i)
                .map(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(Some(0))
        };
        Some(Self::new(component(1)?, component(2)?, component(3)?))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Version-gated tool capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// screen's `-L -Logfile <path>` session-creation logging
    NativeLogFile,
    /// tmux `new-session` passing a multi-argument command straight to exec
    /// instead of joining it into one shell string
    ArgvSessionCommand,
}

impl Feature {
    /// Tool and minimum version providing this feature
    pub fn requirement(self) -> (Tool, Version) {
        match self {
            Feature::NativeLogFile => (Tool::Screen, Version::new(4, 5, 1)),
            Feature::ArgvSessionCommand => (Tool::Tmux, Version::new(3, 0, 0)),
        }
    }
}

/// What the probe learned about a tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInfo {
    /// The probed tool
    pub tool: Tool,
    /// Whether the binary was found
    pub installed: bool,
    /// Parsed version, if the tool reported one
    pub version: Option<Version>,
    /// First line of the version output
    pub version_line: Option<String>,
}

impl ToolInfo {
    /// Info for a tool that is not installed
    pub fn missing(tool: Tool) -> Self {
        Self {
            tool,
            installed: false,
            version: None,
            version_line: None,
        }
    }

    /// Whether the installed version provides `feature`
    pub fn supports(&self, feature: Feature) -> bool {
        let (tool, minimum) = feature.requirement();
        self.installed && tool == self.tool && self.version.is_some_and(|v| v >= minimum)
    }

    /// Fail with an actionable error unless the tool is installed
    pub fn require(self) -> Result<Self> {
        if self.installed {
            Ok(self)
        } else {
            Err(self.tool.unavailable())
        }
    }
}

/// Detects installed tools and their capabilities
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// Probe a single tool
    async fn probe(&self, tool: Tool) -> ToolInfo;
}

/// Probe backed by PATH lookup and the tools' own version output
#[derive(Debug)]
pub struct SystemProbe {
    timeout: Duration,
    cache: Mutex<HashMap<Tool, ToolInfo>>,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new(PROBE_TIMEOUT)
    }
}

impl SystemProbe {
    /// Create a probe whose version commands are bounded by `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn detect(&self, tool: Tool) -> ToolInfo {
        if which::which(tool.binary()).is_err() {
            debug!("{} not found on PATH", tool.binary());
            return ToolInfo::missing(tool);
        }

        let command = Command::builder(tool.binary())
            .args(tool.version_args())
            .stdin(StdinMode::Null)
            .build();

        // Exit status is ignored: several tools print their version and exit non-zero.
        let version_line = match run_bounded(&command, self.timeout).await {
            Ok(output) => first_line(&output.stdout, &output.stderr),
            Err(e) => {
                debug!("Version check for {} failed: {}", tool.binary(), e);
                None
            }
        };

        let version = version_line.as_deref().and_then(Version::parse);
        debug!(
            "Probed {}: version line {:?}, parsed {:?}",
            tool.binary(),
            version_line,
            version
        );

        ToolInfo {
            tool,
            installed: true,
            version,
            version_line,
        }
    }
}

#[async_trait]
impl CapabilityProbe for SystemProbe {
    async fn probe(&self, tool: Tool) -> ToolInfo {
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tool)
            .cloned();
        if let Some(info) = cached {
            return info;
        }

        let info = self.detect(tool).await;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tool, info.clone());
        info
    }
}

/// First non-empty line of the combined output streams
fn first_line(stdout: &[u8], stderr: &[u8]) -> Option<String> {
    let mut combined = String::from_utf8_lossy(stdout).into_owned();
    combined.push('\n');
    combined.push_str(&String::from_utf8_lossy(stderr));
    combined
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Run an auxiliary command to completion, capturing both streams, within `timeout`.
///
/// The child is killed if the deadline passes first.
pub async fn run_bounded(command: &Command, timeout: Duration) -> Result<std::process::Output> {
    let mut cmd = command.prepare();
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let program = command.get_program().to_string_lossy().into_owned();
    let output = async { cmd.output().await.map_err(Error::from) };
    let deadline = async {
        Timer::after(timeout).await;
        Err(Error::ProbeTimeout {
            program: program.clone(),
            seconds: timeout.as_secs(),
        })
    };

    futures_lite::future::or(output, deadline).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing_tolerates_tool_formats() {
        assert_eq!(
            Version::parse("Screen version 4.09.01 (GNU) 20-Aug-23"),
            Some(Version::new(4, 9, 1))
        );
        assert_eq!(
            Version::parse("Screen version 4.00.03 (FAU) 23-Oct-06"),
            Some(Version::new(4, 0, 3))
        );
        assert_eq!(Version::parse("tmux 3.3a"), Some(Version::new(3, 3, 0)));
        assert_eq!(
            Version::parse("OpenSSH_9.6p1 Ubuntu-3ubuntu13, OpenSSL 3.0.13"),
            Some(Version::new(9, 6, 0))
        );
        assert_eq!(Version::parse("no digits here"), None);
    }

    #[test]
    fn test_native_log_threshold() {
        let mut info = ToolInfo {
            tool: Tool::Screen,
            installed: true,
            version: Some(Version::new(4, 5, 1)),
            version_line: None,
        };
        assert!(info.supports(Feature::NativeLogFile));

        info.version = Some(Version::new(4, 5, 0));
        assert!(!info.supports(Feature::NativeLogFile));

        info.version = None;
        assert!(!info.supports(Feature::NativeLogFile));

        let tmux = ToolInfo {
            tool: Tool::Tmux,
            installed: true,
            version: Some(Version::new(9, 9, 9)),
            version_line: None,
        };
        assert!(!tmux.supports(Feature::NativeLogFile));
        assert!(tmux.supports(Feature::ArgvSessionCommand));
    }

    #[test]
    fn test_first_line_prefers_any_stream() {
        assert_eq!(
            first_line(b"", b"\nOpenSSH_9.6p1\nmore\n"),
            Some("OpenSSH_9.6p1".to_string())
        );
        assert_eq!(
            first_line(b"tmux 3.4\n", b"warning"),
            Some("tmux 3.4".to_string())
        );
        assert_eq!(first_line(b"  \n", b""), None);
    }

    #[test]
    fn test_missing_tool_is_actionable() {
        let err = ToolInfo::missing(Tool::Docker).require().unwrap_err();
        assert!(matches!(err, Error::ToolUnavailable { ref binary, .. } if binary == "docker"));
        assert!(err.to_string().contains("docs.docker.com"));
    }

    #[smol_potat::test]
    async fn test_probe_captures_output_despite_failing_exit() {
        // `sh -c` prints to stderr and exits non-zero, like some version commands do.
        let command = Command::builder("sh")
            .arg("-c")
            .arg("echo 'Tool version 4.09.01' >&2; exit 1")
            .stdin(StdinMode::Null)
            .build();
        let output = run_bounded(&command, PROBE_TIMEOUT).await.unwrap();
        let line = first_line(&output.stdout, &output.stderr).unwrap();
        assert_eq!(Version::parse(&line), Some(Version::new(4, 9, 1)));
    }

    #[smol_potat::test]
    async fn test_bounded_run_times_out() {
        let command = Command::builder("sleep").arg("5").stdin(StdinMode::Null).build();
        let err = run_bounded(&command, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProbeTimeout { .. }));
    }
}
