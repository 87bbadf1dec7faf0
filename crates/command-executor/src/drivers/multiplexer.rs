//! screen and tmux sessions.
//!
//! Sessions are always created detached. Attached mode then polls the session
//! until it is gone and replays what was captured. The user command runs under a
//! small POSIX `sh` script that receives the capture paths and the command itself
//! as positional parameters, so the user's argv is never re-quoted. The script
//! records the command's exit status next to the log; with the `tee` fallback the
//! status file only appears once `tee` has finished writing.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_io::Timer;
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Driver, DriverOutcome, RunContext, session_name};
use crate::attach::{Strategy, strategy};
use crate::command::{Command, StdinMode};
use crate::error::{Error, Result};
use crate::isolation::{Backend, IsolationLevel};
use crate::janitor::{Janitor, ResourceHandle};
use crate::probe::{Feature, PROBE_TIMEOUT, Tool, ToolInfo, run_bounded};
use crate::reconcile::{OutputSink, replay};
use crate::users::run_as;

/// Interval between session liveness checks
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// `$0` of the capture script, visible in process listings
const SCRIPT_NAME: &str = "isolate-session";

/// Supported terminal multiplexers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplexer {
    /// GNU screen
    Screen,
    /// tmux
    Tmux,
}

impl Multiplexer {
    /// Backend kind for this multiplexer
    pub fn backend(self) -> Backend {
        match self {
            Multiplexer::Screen => Backend::Screen,
            Multiplexer::Tmux => Backend::Tmux,
        }
    }

    fn tool(self) -> Tool {
        match self {
            Multiplexer::Screen => Tool::Screen,
            Multiplexer::Tmux => Tool::Tmux,
        }
    }
}

/// Driver for screen and tmux
#[derive(Debug, Clone, Copy)]
pub struct MultiplexerDriver {
    kind: Multiplexer,
}

/// Files a session writes its transcript and exit status to
#[derive(Debug, Clone)]
struct CaptureFiles {
    log: PathBuf,
    exit: PathBuf,
}

impl CaptureFiles {
    fn new(dir: &Path, session: &str) -> Self {
        Self {
            log: dir.join(format!("{}.log", session)),
            exit: dir.join(format!("{}.exit", session)),
        }
    }

    fn exit_tmp(&self) -> PathBuf {
        let mut tmp = self.exit.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    async fn exit_code(&self) -> Option<i32> {
        let text = async_fs::read_to_string(&self.exit).await.ok()?;
        text.trim().parse().ok()
    }

    async fn transcript(&self) -> String {
        match async_fs::read(&self.log).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!("No session output captured at {}: {}", self.log.display(), e);
                String::new()
            }
        }
    }

    async fn remove(&self) {
        for path in [self.log.clone(), self.exit.clone(), self.exit_tmp()] {
            let _ = async_fs::remove_file(path).await;
        }
    }
}

/// The capture script run inside the session.
///
/// Positional parameters: `$1` exit-status file, `$2` log file, the rest is the
/// command to run.
fn capture_script(duplicate_output: bool, keep_alive: bool) -> String {
    let mut script = if duplicate_output {
        concat!(
            r#"exit_file=$1; log_file=$2; shift 2; "#,
            r#"{ "$@"; echo $? > "$exit_file.tmp"; } 2>&1 | tee "$log_file"; "#,
            r#"mv "$exit_file.tmp" "$exit_file""#
        )
        .to_string()
    } else {
        r#"exit_file=$1; shift 2; "$@"; echo $? > "$exit_file""#.to_string()
    };
    if keep_alive {
        script.push_str(r#"; exec "${SHELL:-/bin/sh}""#);
    }
    script
}

impl MultiplexerDriver {
    /// Driver for the given multiplexer
    pub fn new(kind: Multiplexer) -> Self {
        Self { kind }
    }

    /// Command that runs `command` under the capture script
    fn captured(
        command: &Command,
        files: &CaptureFiles,
        duplicate_output: bool,
        keep_alive: bool,
    ) -> Command {
        let prefix: Vec<OsString> = vec![
            "-c".into(),
            capture_script(duplicate_output, keep_alive).into(),
            SCRIPT_NAME.into(),
            files.exit.clone().into_os_string(),
            files.log.clone().into_os_string(),
        ];
        command.wrapped_in("sh", prefix)
    }

    /// Command that creates the detached session
    fn session_command(
        &self,
        session: &str,
        inner: &Command,
        files: &CaptureFiles,
        native_log: bool,
        info: &ToolInfo,
    ) -> Command {
        let mut create = match self.kind {
            Multiplexer::Screen => {
                let mut cmd = Command::new("screen");
                if native_log {
                    cmd.arg("-L").arg("-Logfile").arg(&files.log);
                }
                cmd.arg("-dmS").arg(session);
                cmd.args(inner.argv());
                cmd
            }
            Multiplexer::Tmux => {
                let mut cmd = Command::new("tmux");
                cmd.args(["new-session", "-d", "-s", session]);
                if let Ok(dir) = std::env::current_dir() {
                    cmd.arg("-c").arg(dir);
                }
                if info.supports(Feature::ArgvSessionCommand) {
                    cmd.args(inner.argv());
                } else {
                    // Older tmux joins its arguments and hands them to a shell.
                    cmd.arg(inner.to_shell_string());
                }
                cmd
            }
        };
        create.stdin(StdinMode::Null);
        create
    }

    /// Whether the named session still exists.
    ///
    /// A failing check counts as alive so a transient error never cuts output short.
    async fn is_alive(&self, session: &str) -> bool {
        let check = match self.kind {
            Multiplexer::Screen => Command::builder("screen").arg("-ls"),
            Multiplexer::Tmux => Command::builder("tmux")
                .args(["has-session", "-t"])
                .arg(format!("={}", session)),
        }
        .stdin(StdinMode::Null)
        .build();

        match run_bounded(&check, PROBE_TIMEOUT).await {
            Ok(output) => match self.kind {
                Multiplexer::Screen => {
                    screen_lists_session(&String::from_utf8_lossy(&output.stdout), session)
                }
                Multiplexer::Tmux => output.status.success(),
            },
            Err(e) => {
                warn!("Liveness check for session {} failed: {}", session, e);
                true
            }
        }
    }

    async fn wait_for_completion(&self, session: &str, files: &CaptureFiles, keep_alive: bool) {
        loop {
            Timer::after(POLL_INTERVAL).await;
            // A kept-alive session outlives the command; its status file marks the end.
            if keep_alive && files.exit.exists() {
                break;
            }
            if !self.is_alive(session).await {
                break;
            }
        }
        debug!("Session {} finished", session);
    }
}

/// Whether `screen -ls` output lists exactly this session (`<pid>.<name>`)
fn screen_lists_session(listing: &str, session: &str) -> bool {
    let suffix = format!(".{}", session);
    listing.lines().any(|line| {
        line.split_whitespace()
            .next()
            .is_some_and(|entry| entry.ends_with(&suffix))
    })
}

#[async_trait]
impl Driver for MultiplexerDriver {
    fn backend(&self) -> Backend {
        self.kind.backend()
    }

    async fn run(
        &self,
        command: Command,
        level: &IsolationLevel,
        ctx: &RunContext<'_>,
        sink: &mut dyn OutputSink,
    ) -> Result<DriverOutcome> {
        let backend = self.backend();
        let info = ctx.probe.probe(self.kind.tool()).await.require()?;
        let strategy = strategy(backend, ctx.options.mode)?;
        let keep_alive = ctx.options.keep_alive;

        let session = level
            .session
            .clone()
            .unwrap_or_else(|| session_name(backend));
        let files = CaptureFiles::new(&ctx.options.capture_dir, &session);

        // A kept-alive session never closes, and screen only flushes its own log on close.
        let native_log = info.supports(Feature::NativeLogFile) && !keep_alive;
        if self.kind == Multiplexer::Screen && !native_log {
            debug!(
                "screen {:?} without usable native logging; duplicating output with tee",
                info.version
            );
        }

        let inner = Self::captured(
            &run_as(command, level.user.as_deref()),
            &files,
            !native_log,
            keep_alive,
        );
        let create = self.session_command(&session, &inner, &files, native_log, &info);
        debug!("Creating {} session {}: {}", backend, session, create);

        let resource = ResourceHandle::Session {
            backend,
            name: session.clone(),
        };

        let created = run_bounded(&create, PROBE_TIMEOUT).await;
        let failure = match created {
            Ok(output) if output.status.success() => None,
            Ok(output) => Some(Error::spawn_failed(format!(
                "could not create session {}: {}",
                session,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Err(e) => Some(e),
        };
        if let Some(error) = failure {
            // Remove anything that did come up before reporting.
            if self.is_alive(&session).await {
                if let Err(e) = Janitor.teardown(&resource).await {
                    warn!("Partial cleanup of {} failed: {}", resource, e);
                }
            }
            files.remove().await;
            return Err(error.with_backend_context(backend.as_str()));
        }

        let hint = resource.reattach_hint().unwrap_or_default();

        if strategy == Strategy::Background {
            // Ownership passes to the user.
            let lifetime = if keep_alive {
                "Session will stay alive after the command completes."
            } else {
                "Session will exit automatically when the command completes."
            };
            let message = format!(
                "Command started in detached {} session: {}\nReattach with: {}\nOutput is captured to {}\n{}",
                backend,
                session,
                hint,
                files.log.display(),
                lifetime
            );
            return Ok(DriverOutcome::started(resource, message));
        }

        ctx.ledger.register(resource.clone());
        self.wait_for_completion(&session, &files, keep_alive).await;

        let transcript = files.transcript().await;
        replay(&transcript, sink);
        let exit_code = files.exit_code().await;
        files.remove().await;

        // Either the session has ended or it now belongs to the user.
        ctx.ledger.release(&resource);

        let mut outcome = match exit_code {
            Some(code) => DriverOutcome::finished(code, Some(resource)),
            None => DriverOutcome::finished(1, Some(resource))
                .with_note("Exit status unavailable: the session ended before recording it"),
        };
        if keep_alive {
            outcome = outcome.with_note(format!(
                "Session {} kept alive. Reattach with: {}",
                session, hint
            ));
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_listing_matches_exact_session() {
        let listing = "There are screens on:\n\t12345.screen-1-abc\t(Detached)\n\t999.other\t(Attached)\n2 Sockets in /run/screen/S-me.\n";
        assert!(screen_lists_session(listing, "screen-1-abc"));
        assert!(screen_lists_session(listing, "other"));
        assert!(!screen_lists_session(listing, "abc"));
        assert!(!screen_lists_session(listing, "screen-1"));
        assert!(!screen_lists_session("No Sockets found in /run/screen/S-me.\n", "x"));
    }

    #[test]
    fn test_capture_script_variants() {
        let tee = capture_script(true, false);
        assert!(tee.contains("| tee \"$log_file\""));
        assert!(tee.ends_with(r#"mv "$exit_file.tmp" "$exit_file""#));

        let native = capture_script(false, false);
        assert!(!native.contains("tee"));

        assert!(capture_script(true, true).ends_with(r#"exec "${SHELL:-/bin/sh}""#));
    }

    #[test]
    fn test_user_command_stays_an_argument_vector() {
        let files = CaptureFiles::new(Path::new("/tmp"), "screen-1-abc");
        let user = Command::builder("sh")
            .arg("-c")
            .arg(r#"echo "a 'b'" | tr a A"#)
            .build();
        let inner = MultiplexerDriver::captured(&user, &files, true, false);
        let info = ToolInfo {
            tool: Tool::Screen,
            installed: true,
            version: Some(crate::probe::Version::new(4, 9, 1)),
            version_line: None,
        };
        let create = MultiplexerDriver::new(Multiplexer::Screen).session_command(
            "screen-1-abc",
            &inner,
            &files,
            true,
            &info,
        );

        let args = create.get_args();
        assert_eq!(&args[..3], &["-L", "-Logfile", "/tmp/screen-1-abc.log"]);
        assert_eq!(&args[3..5], &["-dmS", "screen-1-abc"]);
        assert_eq!(args[5], "sh");
        // The user's script arrives untouched as the final element.
        assert_eq!(args.last().unwrap(), r#"echo "a 'b'" | tr a A"#);
        assert!(args.iter().any(|a| a == "/tmp/screen-1-abc.exit"));
    }

    #[test]
    fn test_old_tmux_gets_a_quoted_string() {
        let files = CaptureFiles::new(Path::new("/tmp"), "t");
        let inner = Command::builder("echo").arg("a b").build();
        let old = ToolInfo {
            tool: Tool::Tmux,
            installed: true,
            version: Some(crate::probe::Version::new(2, 9, 0)),
            version_line: None,
        };
        let create = MultiplexerDriver::new(Multiplexer::Tmux)
            .session_command("t", &inner, &files, false, &old);
        assert_eq!(create.get_args().last().unwrap(), "echo 'a b'");
    }
}
