//! Docker containers.
//!
//! Attach and detach map directly onto `docker run` with and without `-d`.

use std::ffi::OsString;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Driver, DriverOutcome, RunContext, session_name};
use crate::attach::{Strategy, strategy};
use crate::backends::LocalLauncher;
use crate::command::{Command, StdinMode};
use crate::error::{Error, Result};
use crate::isolation::{Backend, IsolationLevel};
use crate::janitor::{Janitor, ResourceHandle};
use crate::launcher::Launcher;
use crate::probe::Tool;
use crate::process::ProcessHandle;
use crate::reconcile::{OutputSink, reconcile};

/// Driver for `docker run`
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerDriver;

/// Image used when none is given, matching the host's OS family
pub fn default_docker_image() -> String {
    let os_release = std::fs::read_to_string("/etc/os-release").unwrap_or_default();
    image_for_os_release(std::env::consts::OS, &os_release).to_string()
}

fn image_for_os_release(os: &str, os_release: &str) -> &'static str {
    if os != "linux" {
        return "alpine:latest";
    }

    let ids: Vec<String> = os_release
        .lines()
        .filter_map(|line| {
            line.strip_prefix("ID=")
                .or_else(|| line.strip_prefix("ID_LIKE="))
        })
        .flat_map(|value| {
            value
                .trim_matches('"')
                .split_whitespace()
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
        })
        .collect();

    const FAMILIES: [(&str, &str); 6] = [
        ("alpine", "alpine:latest"),
        ("ubuntu", "ubuntu:latest"),
        ("debian", "debian:latest"),
        ("arch", "archlinux:latest"),
        ("fedora", "fedora:latest"),
        ("centos", "centos:latest"),
    ];
    ids.iter()
        .find_map(|id| {
            FAMILIES
                .iter()
                .find(|(family, _)| id == family)
                .map(|(_, image)| *image)
        })
        .unwrap_or("alpine:latest")
}

impl DockerDriver {
    fn run_command(
        name: &str,
        image: &str,
        command: &Command,
        detached: bool,
        keep_alive: bool,
        auto_remove: bool,
        interactive: bool,
    ) -> Command {
        let mut docker = Command::new("docker");
        docker.arg("run");
        if detached {
            // A kept-alive shell in a detached container needs stdin and a tty to stay up.
            docker.arg(if keep_alive { "-dit" } else { "-d" });
            if auto_remove {
                docker.arg("--rm");
            }
        } else {
            if !keep_alive {
                docker.arg("--rm");
            }
            if interactive {
                docker.arg("-i");
            }
        }
        docker.arg("--name").arg(name).arg(image);

        if detached && keep_alive {
            let mut argv: Vec<OsString> = vec![
                "/bin/sh".into(),
                "-c".into(),
                r#""$@"; exec /bin/sh"#.into(),
                "sh".into(),
            ];
            argv.extend(command.argv());
            docker.args(argv);
        } else {
            docker.args(command.argv());
        }

        docker.stdin(if interactive && !detached {
            StdinMode::Inherit
        } else {
            StdinMode::Null
        });
        docker
    }
}

#[async_trait]
impl Driver for DockerDriver {
    fn backend(&self) -> Backend {
        Backend::Docker
    }

    async fn run(
        &self,
        command: Command,
        level: &IsolationLevel,
        ctx: &RunContext<'_>,
        sink: &mut dyn OutputSink,
    ) -> Result<DriverOutcome> {
        ctx.probe.probe(Tool::Docker).await.require()?;
        let strategy = strategy(Backend::Docker, ctx.options.mode)?;
        let options = ctx.options;

        let image = level.image.clone().unwrap_or_else(default_docker_image);
        let name = level
            .session
            .clone()
            .unwrap_or_else(|| session_name(Backend::Docker));
        let resource = ResourceHandle::Container { name: name.clone() };
        let detached = strategy == Strategy::Background;

        let docker = Self::run_command(
            &name,
            &image,
            &command,
            detached,
            options.keep_alive,
            options.auto_remove,
            options.terminal.stdin,
        );
        debug!("Starting container {} from {}: {}", name, image, docker);

        if detached {
            // Pulling the image can take arbitrarily long; no deadline here.
            let result = LocalLauncher.execute(docker).await?;
            if !result.status.success() {
                // `docker run` can fail after the container was created.
                if let Err(e) = Janitor.teardown(&resource).await {
                    debug!("No container {} to clean up: {}", name, e);
                }
                return Err(Error::spawn_failed(format!(
                    "could not start container {}: {}",
                    name,
                    result.output.trim()
                ))
                .with_backend_context("docker"));
            }

            let id = result.output.lines().last().unwrap_or_default().trim().to_string();
            let mut message = format!(
                "Command started in detached docker container: {}\nContainer ID: {}\nAttach with: docker attach {}\nView logs: docker logs {}",
                name, id, name, name
            );
            if options.auto_remove {
                message.push_str("\nContainer will be removed automatically when it exits.");
            } else {
                message.push_str(&format!(
                    "\nContainer will remain after exit; remove with: docker rm {}",
                    name
                ));
            }
            return Ok(DriverOutcome::started(resource, message));
        }

        let (events, mut handle) = LocalLauncher.launch(docker).await?;
        if let Some(pid) = handle.pid() {
            (ctx.on_spawn)(pid);
        }
        ctx.ledger.register(resource.clone());

        let status = reconcile(events, &mut handle, sink).await?;

        // `--rm` removed the container unless it is being kept.
        ctx.ledger.release(&resource);
        let mut outcome = DriverOutcome::finished(status.exit_code(), Some(resource));
        if options.keep_alive {
            outcome = outcome.with_note(format!(
                "Container {} kept. Restart it with: docker start -ai {}",
                name, name
            ));
        }
        if status.exit_code() == 125 {
            warn!("docker could not run the container (exit 125)");
        }
        Ok(outcome)
    }
}
