//! Command line surface

use std::ffi::OsString;

use clap::{ArgAction, Parser};
use command_executor::isolation::validate_username;

/// Run a command inside stacked isolation environments
#[derive(Parser, Debug, Clone)]
#[command(name = "isolate")]
#[command(about = "Run a command inside stacked isolation environments")]
#[command(version)]
pub struct Cli {
    /// Isolation stack, outermost first (local, screen, tmux, docker, ssh)
    #[arg(short = 'i', long = "isolated", value_name = "STACK")]
    pub isolated: Option<String>,

    /// Block and stream output (default)
    #[arg(short, long)]
    pub attached: bool,

    /// Start in the background and print how to reattach
    #[arg(short, long)]
    pub detached: bool,

    /// Session or container name, or a sequence with `_` per level
    #[arg(short, long, value_name = "NAME|SEQUENCE", action = ArgAction::Append)]
    pub session: Vec<String>,

    /// Container image, or a sequence with `_` per level
    #[arg(long, value_name = "IMAGE|SEQUENCE", action = ArgAction::Append)]
    pub image: Vec<String>,

    /// ssh endpoint (user@host), or a sequence with `_` per level
    #[arg(long, value_name = "ENDPOINT|SEQUENCE", action = ArgAction::Append)]
    pub endpoint: Vec<String>,

    /// Run as an ephemeral user; a name is generated when omitted
    #[arg(
        short = 'u',
        long = "isolated-user",
        value_name = "NAME",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "",
        action = ArgAction::Append
    )]
    pub isolated_user: Vec<String>,

    /// Keep the ephemeral user after the command finishes
    #[arg(long)]
    pub keep_user: bool,

    /// Leave sessions and containers running after the command exits
    #[arg(short = 'k', long)]
    pub keep_alive: bool,

    /// Remove detached containers when they exit
    #[arg(long = "auto-remove-docker-container")]
    pub auto_remove_docker_container: bool,

    /// Use this UUID for the execution record
    #[arg(long, value_name = "UUID")]
    pub session_id: Option<String>,

    /// Print the record of an execution
    #[arg(long, value_name = "UUID")]
    pub status: Option<String>,

    /// Format for --status: links-notation, json or text
    #[arg(long, value_name = "FORMAT", default_value = "links-notation")]
    pub output_format: String,

    /// List recent executions
    #[arg(long)]
    pub list: bool,

    /// How many executions --list shows
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Finalize executions whose process is gone or that are older than a day
    #[arg(long)]
    pub cleanup: bool,

    /// Show what --cleanup would change
    #[arg(long)]
    pub cleanup_dry_run: bool,

    /// Debug logging on stderr
    #[arg(long)]
    pub verbose: bool,

    /// The command to run
    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

impl Cli {
    /// Parse `std::env::args_os`, exiting on usage errors
    pub fn from_env() -> Self {
        Self::parse_from(join_user_values(std::env::args_os()))
    }

    /// Parse `args`, accepting `-u NAME` as well as `--isolated-user=NAME`
    pub fn try_from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        Self::try_parse_from(join_user_values(args))
    }

    /// The command as one line, as a shell would receive it
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    /// Whether this invocation queries the store instead of running anything
    pub fn is_query(&self) -> bool {
        self.status.is_some() || self.list || self.cleanup || self.cleanup_dry_run
    }
}

/// Fold a separate user name into `--isolated-user=NAME`.
///
/// The name is optional, so clap alone cannot tell `-u alice -- cmd` from
/// `-u cmd`. A following argument counts as the name when it is a valid user
/// name. Nothing after `--` is touched.
fn join_user_values<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut out = Vec::new();
    let mut args = args.into_iter().map(Into::into).peekable();
    while let Some(arg) = args.next() {
        if arg == "--" {
            out.push(arg);
            out.extend(args);
            break;
        }
        if arg == "-u" || arg == "--isolated-user" {
            let name = args
                .peek()
                .and_then(|next| next.to_str())
                .filter(|next| !next.starts_with('-') && validate_username(next).is_ok())
                .map(str::to_string);
            if let Some(name) = name {
                args.next();
                out.push(OsString::from(format!("--isolated-user={}", name)));
                continue;
            }
        }
        out.push(arg);
    }
    out
}
