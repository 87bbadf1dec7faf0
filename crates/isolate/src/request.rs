//! Turning parsed arguments into a validated run

use command_executor::users::generate_username;
use command_executor::{
    AttachMode, Backend, Error, ForwardedFlags, IsolationLevel, IsolationRequest, IsolationSpec,
    LevelOption, Result,
};

use crate::cli::Cli;

/// A fully validated invocation. Building one never spawns anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Environments to run in; a single local level when `--isolated` is absent
    pub spec: IsolationSpec,
    /// Whether `--isolated` was given
    pub isolated: bool,
    /// Mode of the outermost level
    pub mode: AttachMode,
    /// Flags nested levels inherit
    pub flags: ForwardedFlags,
    /// Caller-chosen execution UUID
    pub session_id: Option<String>,
    /// The command as typed
    pub command: String,
}

impl RunRequest {
    /// Validate `cli`. Every error is a configuration error.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mode = AttachMode::from_flags(cli.attached, cli.detached)?;

        let spec = match &cli.isolated {
            Some(stack) => IsolationSpec::from_request(&isolation_request(stack, cli))?,
            None => direct_spec(cli)?,
        };

        // Fails here rather than in the driver so nothing gets recorded.
        command_executor::attach::strategy(spec.levels()[0].backend, mode)?;

        if cli.keep_user && !spec.levels().iter().any(|l| l.user.is_some()) {
            return Err(Error::configuration(
                "--keep-user option requires --isolated-user to be specified",
            ));
        }

        if let Some(id) = &cli.session_id {
            uuid::Uuid::parse_str(id).map_err(|e| {
                Error::configuration(format!("--session-id must be a UUID, got \"{}\": {}", id, e))
            })?;
        }

        let command = cli.command_line();
        if command.trim().is_empty() {
            return Err(Error::configuration("No command provided"));
        }

        Ok(Self {
            spec,
            isolated: cli.isolated.is_some(),
            mode,
            flags: ForwardedFlags {
                keep_alive: cli.keep_alive,
                auto_remove: cli.auto_remove_docker_container,
                keep_user: cli.keep_user,
            },
            session_id: cli.session_id.clone(),
            command,
        })
    }

    /// Label for the log artifact name
    pub fn environment_label(&self) -> String {
        if self.isolated {
            self.outer().backend.to_string()
        } else {
            "direct".to_string()
        }
    }

    /// The outermost level
    pub fn outer(&self) -> &IsolationLevel {
        &self.spec.levels()[0]
    }

    /// First value of `option` across the stack
    pub fn first(&self, option: LevelOption) -> Option<String> {
        self.spec
            .levels()
            .iter()
            .find_map(|l| l.get(option))
            .map(str::to_string)
    }
}

fn isolation_request(stack: &str, cli: &Cli) -> IsolationRequest {
    IsolationRequest {
        stack: stack.to_string(),
        session: cli.session.clone(),
        image: cli.image.clone(),
        endpoint: cli.endpoint.clone(),
        user: users(&cli.isolated_user),
    }
}

/// Without `--isolated` the command runs in the local shell, possibly as another user
fn direct_spec(cli: &Cli) -> Result<IsolationSpec> {
    for (option, values) in [
        (LevelOption::Session, &cli.session),
        (LevelOption::Image, &cli.image),
        (LevelOption::Endpoint, &cli.endpoint),
    ] {
        if !values.is_empty() {
            return Err(Error::configuration(format!(
                "{} option is only valid with --isolated {}",
                option.flag(),
                option.applicable_backends()
            )));
        }
    }
    let request = IsolationRequest {
        stack: Backend::Local.to_string(),
        user: users(&cli.isolated_user),
        ..Default::default()
    };
    IsolationSpec::from_request(&request)
}

/// `-u` without a value asks for a generated name
fn users(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| {
            if v.trim().is_empty() {
                generate_username()
            } else {
                v.clone()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use command_executor::{MAX_DEPTH, StackComposer};

    fn parse(args: &[&str]) -> Result<RunRequest> {
        let cli = Cli::try_from_args(std::iter::once("isolate").chain(args.iter().copied()))
            .expect("arguments parse");
        RunRequest::from_cli(&cli)
    }

    #[test]
    fn test_direct_run() {
        let request = parse(&["echo", "hi"]).unwrap();
        assert!(!request.isolated);
        assert_eq!(request.spec.depth(), 1);
        assert_eq!(request.outer().backend, Backend::Local);
        assert_eq!(request.mode, AttachMode::Attached);
        assert_eq!(request.environment_label(), "direct");
        assert_eq!(request.command, "echo hi");
    }

    #[test]
    fn test_configuration_errors() {
        for args in [
            vec!["-i", "bogus", "--", "true"],
            vec!["-a", "-d", "-i", "screen", "--", "true"],
            vec!["-i", "docker docker", "--image", "a b c", "--", "true"],
            vec!["-i", "local local local local local local local local", "--", "true"],
            vec!["-i", "screen", "--keep-user", "--", "true"],
            vec!["--session-id", "not-a-uuid", "true"],
            vec!["--image", "alpine", "true"],
            vec!["-i", "ssh", "--", "true"],
            vec!["-i", "docker", "-u", "--", "true"],
            vec!["-i", "screen", "--image", "a", "--image", "b", "--", "true"],
            vec!["-i", "screen"],
            vec!["-d", "true"],
            vec!["-d", "-i", "local", "--", "true"],
        ] {
            let err = parse(&args).unwrap_err();
            assert!(err.is_configuration(), "{:?} gave {}", args, err);
        }
    }

    #[test]
    fn test_generated_user() {
        let request = parse(&["-i", "screen", "-u", "--keep-user", "--", "whoami"]).unwrap();
        let user = request.outer().user.clone().unwrap();
        assert!(user.starts_with("isolate-"));
        assert!(request.flags.keep_user);

        let direct = parse(&["--isolated-user=ci", "whoami"]).unwrap();
        assert_eq!(direct.outer().user.as_deref(), Some("ci"));
    }

    #[test]
    fn test_nested_invocations_decode_to_the_residual() {
        let command = "printf '%s\\n' \"a b\" | wc -l";
        let backends = ["screen", "tmux", "docker", "ssh", "local"];
        for depth in 1..=MAX_DEPTH {
            let names: Vec<&str> = (0..depth).map(|i| backends[i % backends.len()]).collect();
            let endpoints: Vec<&str> = names
                .iter()
                .map(|n| if *n == "ssh" { "ci@build" } else { "_" })
                .collect();
            let stack = names.join(" ");
            let endpoint = endpoints.join(" ");
            let mut args = vec!["-d", "-k", "--auto-remove-docker-container", "-i", stack.as_str()];
            if names.contains(&"ssh") {
                args.extend(["--endpoint", endpoint.as_str()]);
            }
            args.extend(["--", command]);
            let request = parse(&args).unwrap();

            let plan = StackComposer::new("isolate")
                .forwarding(request.flags)
                .plan(&request.spec, &request.command);
            assert_eq!(plan.len(), depth);

            for composed in &plan {
                let Some(residual) = &composed.residual else {
                    assert_eq!(composed.depth, depth - 1);
                    continue;
                };
                let cli = Cli::try_from_args(composed.command.argv()).unwrap();
                let nested = RunRequest::from_cli(&cli).unwrap();
                assert_eq!(&nested.spec, residual);
                assert_eq!(nested.command, command);
                assert_eq!(nested.mode, AttachMode::Attached);
                assert!(nested.flags.keep_alive);
                assert_eq!(nested.flags.auto_remove, residual.uses(Backend::Docker));
            }
        }
    }

    #[test]
    fn test_depth_beyond_maximum_is_rejected() {
        let stack = vec!["tmux"; MAX_DEPTH + 1].join(" ");
        let err = parse(&["-i", stack.as_str(), "--", "true"]).unwrap_err();
        assert!(err.to_string().contains("maximum supported depth"));
    }
}
