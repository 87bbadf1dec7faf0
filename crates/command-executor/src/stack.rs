//! Stack composition.
//!
//! A spec with N levels runs as N nested invocations. Level `i` hands its driver
//! either the user command (when it is the last level) or a re-invocation of the
//! wrapper carrying the remaining `N - i - 1` levels. The next invocation is built
//! as a [`Command`] value, one argv element per flag, never as a shell string.

use std::ffi::{OsStr, OsString};

use crate::command::Command;
use crate::isolation::{Backend, IsolationLevel, IsolationSpec, LevelOption};
use crate::shell::Shell;

/// Flags every nested invocation inherits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardedFlags {
    /// `--keep-alive`
    pub keep_alive: bool,
    /// `--auto-remove-docker-container`
    pub auto_remove: bool,
    /// `--keep-user`
    pub keep_user: bool,
}

/// One level of the expanded stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedLevel {
    /// 0 for the outermost level
    pub depth: usize,
    /// The environment to run in
    pub level: IsolationLevel,
    /// What the level's driver runs
    pub command: Command,
    /// Levels the nested invocation will handle, if any
    pub residual: Option<IsolationSpec>,
}

impl ComposedLevel {
    /// Whether this level runs the user command itself
    pub fn is_terminal(&self) -> bool {
        self.residual.is_none()
    }
}

/// Expands an [`IsolationSpec`] into nested invocations
#[derive(Debug, Clone)]
pub struct StackComposer {
    program: OsString,
    flags: ForwardedFlags,
    environment: Vec<(String, OsString)>,
}

impl StackComposer {
    /// Composer whose nested levels invoke `program`
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            flags: ForwardedFlags::default(),
            environment: Vec::new(),
        }
    }

    /// Set the flags nested invocations inherit
    pub fn forwarding(mut self, flags: ForwardedFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set variables nested invocations on the same host are started with.
    ///
    /// Multiplexer sessions take their environment from the multiplexer server,
    /// not from the wrapper, so the variables are passed through `env` on the argv.
    /// Docker and ssh levels run on another filesystem and do not receive them.
    pub fn environment<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<OsString>,
    {
        self.environment = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// The outermost level of `spec`, with the command its driver should run
    pub fn compose(&self, spec: &IsolationSpec, user_command: &str) -> ComposedLevel {
        let (first, residual) = spec.split_first();
        let command = match &residual {
            Some(rest) => {
                let invocation = self.invocation(rest, user_command);
                if self.environment.is_empty() || !shares_host(first.backend) {
                    invocation
                } else {
                    invocation.wrapped_in("env", self.environment.iter().map(|(k, v)| {
                        let mut pair = OsString::from(k);
                        pair.push("=");
                        pair.push(v);
                        pair
                    }))
                }
            }
            None => Self::terminal_command(first.backend, user_command),
        };
        ComposedLevel {
            depth: 0,
            level: first.clone(),
            command,
            residual,
        }
    }

    /// Every level of `spec`, outermost first.
    ///
    /// Nested invocations compose their own level the same way; this fold is what
    /// the whole chain amounts to.
    pub fn plan(&self, spec: &IsolationSpec, user_command: &str) -> Vec<ComposedLevel> {
        let mut levels = Vec::with_capacity(spec.depth());
        let mut remaining = Some(spec.clone());
        while let Some(current) = remaining {
            let mut composed = self.compose(&current, user_command);
            composed.depth = levels.len();
            remaining = composed.residual.clone();
            levels.push(composed);
        }
        levels
    }

    /// The wrapper re-invocation that runs `residual` around `user_command`.
    ///
    /// Nested levels always run attached: they already live inside the outer
    /// environment, which is what carries the requested mode.
    pub fn invocation(&self, residual: &IsolationSpec, user_command: &str) -> Command {
        let request = residual.to_request();
        let mut cmd = Command::new(&self.program);
        cmd.arg(format!("--isolated={}", request.stack));
        for option in LevelOption::ALL {
            for value in request.values(option) {
                cmd.arg(format!("{}={}", option.flag(), value));
            }
        }
        cmd.arg("--attached");
        if self.flags.keep_alive {
            cmd.arg("--keep-alive");
        }
        if self.flags.auto_remove && residual.uses(Backend::Docker) {
            cmd.arg("--auto-remove-docker-container");
        }
        if self.flags.keep_user && residual.levels().iter().any(|l| l.user.is_some()) {
            cmd.arg("--keep-user");
        }
        cmd.arg("--").arg(user_command);
        cmd
    }

    /// The user command wrapped in the shell of the environment it runs in
    pub fn terminal_command(backend: Backend, user_command: &str) -> Command {
        let shell = match backend {
            Backend::Local | Backend::Screen | Backend::Tmux => Shell::host(),
            Backend::Docker => Shell::posix(),
            Backend::Ssh => Shell::portable(),
        };
        shell.command(user_command)
    }
}

fn shares_host(backend: Backend) -> bool {
    matches!(backend, Backend::Local | Backend::Screen | Backend::Tmux)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::{IsolationRequest, MAX_DEPTH};

    fn spec(request: IsolationRequest) -> IsolationSpec {
        IsolationSpec::from_request(&request).unwrap()
    }

    #[test]
    fn test_single_level_runs_user_command() {
        let composed = StackComposer::new("isolate").compose(
            &spec(IsolationRequest::new("docker").with(LevelOption::Image, "alpine")),
            "echo hi",
        );
        assert!(composed.is_terminal());
        assert_eq!(composed.command.get_program(), "/bin/sh");
        assert_eq!(composed.command.get_args(), &["-c", "echo hi"]);
        assert_eq!(composed.level.image.as_deref(), Some("alpine"));
    }

    #[test]
    fn test_screen_then_docker() {
        let s = spec(IsolationRequest::new("screen docker").with(LevelOption::Image, "_ alpine"));
        let plan = StackComposer::new("isolate").plan(&s, "echo hi");

        assert_eq!(plan.len(), 2);
        let outer = &plan[0];
        assert_eq!(outer.level.backend, Backend::Screen);
        assert_eq!(outer.command.get_program(), "isolate");
        assert_eq!(
            outer.command.get_args(),
            &["--isolated=docker", "--image=alpine", "--attached", "--", "echo hi"]
        );

        let inner = &plan[1];
        assert_eq!(inner.depth, 1);
        assert!(inner.is_terminal());
        assert_eq!(inner.level.image.as_deref(), Some("alpine"));
        assert_eq!(inner.command.get_args(), &["-c", "echo hi"]);
    }

    #[test]
    fn test_user_command_only_at_deepest_level() {
        let command = r#"echo "it's" | grep -c "'""#;
        for depth in 1..=MAX_DEPTH {
            let stack = vec!["tmux"; depth].join(" ");
            let plan = StackComposer::new("isolate").plan(&spec(IsolationRequest::new(stack)), command);
            assert_eq!(plan.len(), depth);
            for (i, level) in plan.iter().enumerate() {
                assert_eq!(level.depth, i);
                let args = level.command.get_args();
                if i + 1 == depth {
                    assert_eq!(args, &["-c", command]);
                } else {
                    assert_eq!(level.command.get_program(), "isolate");
                    let remaining = format!("--isolated={}", vec!["tmux"; depth - i - 1].join(" "));
                    assert_eq!(args[0], remaining.as_str());
                    // The user command travels as one untouched argv element.
                    assert_eq!(args.last().unwrap(), command);
                }
            }
        }
    }

    #[test]
    fn test_flags_are_forwarded_only_where_valid() {
        let s = spec(
            IsolationRequest::new("tmux screen docker")
                .with(LevelOption::User, "alice")
                .with(LevelOption::Session, "a b c"),
        );
        let composer = StackComposer::new("isolate").forwarding(ForwardedFlags {
            keep_alive: true,
            auto_remove: true,
            keep_user: true,
        });

        let outer = composer.compose(&s, "true");
        let args = outer.command.get_args();
        assert!(args.iter().any(|a| a == "--isolated-user=alice _"));
        assert!(args.iter().any(|a| a == "--session=b c"));
        assert!(args.iter().any(|a| a == "--keep-alive"));
        assert!(args.iter().any(|a| a == "--auto-remove-docker-container"));
        assert!(args.iter().any(|a| a == "--keep-user"));

        let plan = composer.plan(&s, "true");
        let last_hop = plan[1].command.get_args();
        assert!(!last_hop.iter().any(|a| a == "--keep-user"));
        assert!(last_hop.iter().any(|a| a == "--auto-remove-docker-container"));
    }

    #[test]
    fn test_environment_reaches_same_host_levels() {
        let s = spec(IsolationRequest::new("tmux local docker").with(LevelOption::Image, "_ _ alpine"));
        let composer = StackComposer::new("/opt/isolate").environment([
            ("ISOLATE_LOG_DIR", "/var/log/isolate"),
            ("ISOLATE_SELF", "/opt/isolate"),
        ]);
        let plan = composer.plan(&s, "echo hi");

        // tmux runs the next invocation through env
        assert_eq!(plan[0].command.get_program(), "env");
        assert_eq!(
            &plan[0].command.get_args()[..3],
            &["ISOLATE_LOG_DIR=/var/log/isolate", "ISOLATE_SELF=/opt/isolate", "/opt/isolate"]
        );
        assert_eq!(plan[0].command.get_args()[3], "--isolated=local docker");
        assert_eq!(plan[1].command.get_program(), "env");

        // the container level runs the user command directly
        assert_eq!(plan[2].command.get_args(), &["-c", "echo hi"]);

        let s = spec(IsolationRequest::new("docker local").with(LevelOption::Image, "alpine _"));
        let outer = composer.compose(&s, "true");
        assert_eq!(outer.command.get_program(), "/opt/isolate");
    }
}
