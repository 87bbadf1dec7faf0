//! Command type for building executable commands

use async_process::{Command as AsyncCommand, Stdio};
use std::ffi::{OsStr, OsString};

/// What the spawned process reads as standard input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdinMode {
    /// Share the wrapper's own stdin (interactive commands)
    #[default]
    Inherit,
    /// Read from the null device
    Null,
}

/// A command to be executed
///
/// This is a builder for creating commands that can be converted to `async_process::Command`
/// when needed. Unlike `AsyncCommand`, this type is `Clone` and can be reused multiple times,
/// which is what lets one isolation level hand the next level's invocation around as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The program to execute
    program: OsString,
    /// The arguments to pass to the program
    args: Vec<OsString>,
    /// Standard input handling
    stdin: StdinMode,
}

impl Command {
    /// Create a new command for the given program
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
            stdin: StdinMode::default(),
        }
    }

    /// Add an argument to the command
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Add multiple arguments to the command
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    /// Choose how the process receives standard input
    pub fn stdin(&mut self, mode: StdinMode) -> &mut Self {
        self.stdin = mode;
        self
    }

    /// Get the program name
    pub fn get_program(&self) -> &OsStr {
        &self.program
    }

    /// Get the arguments
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// The full argument vector, program first
    pub fn argv(&self) -> Vec<OsString> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Build a new command that runs `program prefix... <this argv>`.
    ///
    /// Stdin handling carries over to the wrapper.
    pub fn wrapped_in<S, I, A>(&self, program: S, prefix: I) -> Command
    where
        S: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        let mut wrapper = Command::new(program);
        wrapper.args(prefix);
        wrapper.args(self.argv());
        wrapper.stdin = self.stdin;
        wrapper
    }

    /// Render this command as a single line for a remote shell.
    ///
    /// Only used where an external boundary accepts nothing but a string (ssh); every
    /// element is quoted so the remote shell reproduces the same argv.
    pub fn to_shell_string(&self) -> String {
        self.argv()
            .iter()
            .map(|part| shell_escape(&part.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Prepare this command for execution by converting to an `async_process::Command`
    pub fn prepare(&self) -> AsyncCommand {
        let mut cmd = AsyncCommand::new(&self.program);

        cmd.args(&self.args);
        match self.stdin {
            StdinMode::Inherit => cmd.stdin(Stdio::inherit()),
            StdinMode::Null => cmd.stdin(Stdio::null()),
        };

        cmd
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_shell_string())
    }
}

/// Builder pattern helper
impl Command {
    /// Create a builder for this command (for chaining)
    pub fn builder<S: AsRef<OsStr>>(program: S) -> CommandBuilder {
        CommandBuilder(Command::new(program))
    }
}

/// Builder wrapper for more ergonomic command construction
pub struct CommandBuilder(Command);

impl CommandBuilder {
    /// Add an argument
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.0.arg(arg);
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.0.args(args);
        self
    }

    /// Set stdin handling
    pub fn stdin(mut self, mode: StdinMode) -> Self {
        self.0.stdin(mode);
        self
    }

    /// Build the command
    pub fn build(self) -> Command {
        self.0
    }
}

/// Quote a string for a POSIX shell
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.contains(|c: char| c.is_whitespace() || "\"'\\$`!*?<>|&;()[]{}#~=%".contains(c)) {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    } else {
        s.to_string()
    }
}
