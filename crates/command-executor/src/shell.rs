//! Host shell and platform detection.

use std::path::Path;

use crate::command::Command;

/// A shell that runs a command string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    /// Shell executable
    pub program: String,
    /// Flag that introduces the command string
    pub flag: &'static str,
}

impl Shell {
    /// POSIX sh at a fixed path, as found in any container image
    pub fn posix() -> Self {
        Self {
            program: "/bin/sh".to_string(),
            flag: "-c",
        }
    }

    /// `sh` resolved through PATH, for hosts whose layout is unknown
    pub fn portable() -> Self {
        Self {
            program: "sh".to_string(),
            flag: "-c",
        }
    }

    /// The user's login shell on this host
    pub fn host() -> Self {
        if cfg!(windows) {
            return Self {
                program: "cmd.exe".to_string(),
                flag: "/C",
            };
        }
        match std::env::var("SHELL") {
            Ok(shell) if Path::new(&shell).is_absolute() && Path::new(&shell).exists() => Self {
                program: shell,
                flag: "-c",
            },
            _ => Self::posix(),
        }
    }

    /// Command that runs `script` in this shell
    pub fn command(&self, script: &str) -> Command {
        Command::builder(&self.program)
            .arg(self.flag)
            .arg(script)
            .build()
    }
}

/// Platform identifier recorded with each execution
pub fn platform() -> &'static str {
    std::env::consts::OS
}
