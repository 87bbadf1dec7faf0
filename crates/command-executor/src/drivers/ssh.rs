//! Remote hosts over ssh.

use async_trait::async_trait;
use tracing::debug;

use super::{Driver, DriverOutcome, RunContext, session_name};
use crate::attach::{Strategy, strategy};
use crate::backends::LocalLauncher;
use crate::command::{Command, StdinMode, shell_escape};
use crate::error::{Error, Result};
use crate::isolation::{Backend, IsolationLevel};
use crate::janitor::ResourceHandle;
use crate::launcher::Launcher;
use crate::probe::Tool;
use crate::process::ProcessHandle;
use crate::reconcile::{OutputSink, reconcile};

/// Where a backgrounded remote session writes its output, quoted for the remote shell
pub(crate) fn remote_log(session: &str) -> String {
    shell_escape(&format!("/tmp/{}.log", session))
}

/// Driver for remote execution through the system ssh client
#[derive(Debug, Clone, Copy, Default)]
pub struct SshDriver;

impl SshDriver {
    /// The ssh invocation for `command` on `endpoint`.
    ///
    /// ssh only carries a single command string, so the argv is quoted once here.
    fn ssh_command(endpoint: &str, command: &Command, session: Option<&str>) -> Command {
        let remote = match session {
            Some(session) => format!(
                "nohup {} > {} 2>&1 &",
                command.to_shell_string(),
                remote_log(session)
            ),
            None => command.to_shell_string(),
        };

        let mut ssh = Command::new("ssh");
        ssh.arg(endpoint).arg(remote);
        ssh
    }
}

#[async_trait]
impl Driver for SshDriver {
    fn backend(&self) -> Backend {
        Backend::Ssh
    }

    async fn run(
        &self,
        command: Command,
        level: &IsolationLevel,
        ctx: &RunContext<'_>,
        sink: &mut dyn OutputSink,
    ) -> Result<DriverOutcome> {
        ctx.probe.probe(Tool::Ssh).await.require()?;
        let strategy = strategy(Backend::Ssh, ctx.options.mode)?;
        let endpoint = level.endpoint.as_deref().ok_or_else(|| {
            Error::configuration("SSH isolation requires --endpoint to specify the remote server")
        })?;

        if strategy == Strategy::Background {
            let session = level
                .session
                .clone()
                .unwrap_or_else(|| session_name(Backend::Ssh));
            let mut ssh = Self::ssh_command(endpoint, &command, Some(&session));
            ssh.stdin(StdinMode::Null);
            debug!("Backgrounding on {}: {}", endpoint, ssh);

            let result = LocalLauncher.execute(ssh).await?;
            if !result.status.success() {
                return Err(Error::spawn_failed(format!(
                    "could not start background command on {}: {}",
                    endpoint,
                    result.output.trim()
                ))
                .with_backend_context("ssh"));
            }

            let resource = ResourceHandle::Remote {
                endpoint: endpoint.to_string(),
                name: session.clone(),
            };
            let message = format!(
                "Command started in background on {}\nSession: {}\nView logs: {}",
                endpoint,
                session,
                resource.reattach_hint().unwrap_or_default()
            );
            return Ok(DriverOutcome::started(resource, message));
        }

        let mut ssh = Self::ssh_command(endpoint, &command, None);
        ssh.stdin(if ctx.options.terminal.stdin {
            StdinMode::Inherit
        } else {
            StdinMode::Null
        });
        debug!("Running on {}: {}", endpoint, ssh);

        let (events, mut handle) = LocalLauncher.launch(ssh).await?;
        if let Some(pid) = handle.pid() {
            (ctx.on_spawn)(pid);
        }
        let status = reconcile(events, &mut handle, sink).await?;

        // ssh itself reports 255 for connection failures.
        let outcome = DriverOutcome::finished(status.exit_code(), None);
        Ok(if status.exit_code() == 255 {
            outcome.with_note(format!("ssh to {} may have failed to connect", endpoint))
        } else {
            outcome
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attached_command_is_quoted_once() {
        let cmd = Command::builder("sh")
            .args(["-c", r#"echo "hi there" | cat"#])
            .build();
        let ssh = SshDriver::ssh_command("me@box", &cmd, None);
        assert_eq!(ssh.get_program(), "ssh");
        assert_eq!(
            ssh.get_args(),
            &["me@box", r#"sh -c 'echo "hi there" | cat'"#]
        );
    }

    #[test]
    fn test_detached_command_backgrounds_with_log() {
        let cmd = Command::builder("sleep").arg("10").build();
        let ssh = SshDriver::ssh_command("box", &cmd, Some("ssh-1-abcdef"));
        assert_eq!(
            ssh.get_args()[1],
            "nohup sleep 10 > /tmp/ssh-1-abcdef.log 2>&1 &"
        );
    }

    #[test]
    fn test_session_name_is_quoted_in_remote_log_path() {
        let cmd = Command::builder("true").build();
        let ssh = SshDriver::ssh_command("box", &cmd, Some("a b;rm -rf x"));
        assert_eq!(
            ssh.get_args()[1],
            "nohup true > '/tmp/a b;rm -rf x.log' 2>&1 &"
        );
    }
}
