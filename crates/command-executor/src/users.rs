//! Ephemeral OS users for `--isolated-user`.

use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{debug, info};

use crate::command::{Command, StdinMode};
use crate::error::{Error, Result};
use crate::janitor::{ResourceHandle, ResourceLedger};
use crate::launcher::Launcher;
use crate::backends::LocalLauncher;
use crate::probe::{PROBE_TIMEOUT, run_bounded};

/// Groups an isolated user inherits when the invoking user belongs to them
const INHERITED_GROUPS: [&str; 4] = ["sudo", "docker", "wheel", "admin"];

/// A fresh name of the form `isolate-xxxxxx`
pub fn generate_username() -> String {
    format!("isolate-{}", random_suffix(6))
}

/// Lowercase alphanumeric suffix for generated names
pub(crate) fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Whether an account with this login name exists
#[cfg(unix)]
pub fn user_exists(name: &str) -> bool {
    matches!(nix::unistd::User::from_name(name), Ok(Some(_)))
}

/// Whether an account with this login name exists
#[cfg(not(unix))]
pub fn user_exists(_name: &str) -> bool {
    false
}

/// Whether sudo can run without prompting for a password
pub async fn has_sudo_access() -> bool {
    let command = Command::builder("sudo")
        .args(["-n", "true"])
        .stdin(StdinMode::Null)
        .build();
    matches!(run_bounded(&command, PROBE_TIMEOUT).await, Ok(out) if out.status.success())
}

/// Groups of the invoking user that an isolated user should also join
async fn inherited_groups() -> Vec<String> {
    let command = Command::builder("id").arg("-Gn").stdin(StdinMode::Null).build();
    match run_bounded(&command, PROBE_TIMEOUT).await {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .split_whitespace()
            .filter(|g| INHERITED_GROUPS.contains(g))
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Make sure `name` exists, creating it if needed.
///
/// A user this call creates is registered in the ledger so it is deleted at the end
/// of the invocation (unless the caller keeps it). Existing users are never owned.
pub async fn ensure_user(name: &str, ledger: &ResourceLedger) -> Result<()> {
    if user_exists(name) {
        debug!("User {} already exists", name);
        return Ok(());
    }
    if !has_sudo_access().await {
        return Err(sudo_denied(name));
    }

    let groups = inherited_groups().await;
    let mut command = Command::builder("sudo")
        .args(["-n", "useradd", "-m", "-s", "/bin/bash"])
        .stdin(StdinMode::Null)
        .build();
    if !groups.is_empty() {
        command.arg("-G").arg(groups.join(","));
    }
    command.arg(name);

    // useradd can be slow on hosts with large group databases; no deadline.
    let result = LocalLauncher.execute(command).await?;
    if !result.status.success() {
        return Err(Error::spawn_failed(format!(
            "useradd {} failed: {}",
            name,
            result.output.trim()
        )));
    }

    info!("Created isolated user {} (groups: {})", name, groups.join(","));
    ledger.register(ResourceHandle::User {
        name: name.to_string(),
    });
    Ok(())
}

/// Error for a host where the invoking user lacks passwordless sudo
fn sudo_denied(name: &str) -> Error {
    Error::spawn_failed(format!(
        "creating isolated user {} requires passwordless sudo (sudo -n)",
        name
    ))
}

/// Wrap a command so it runs as `user` through non-interactive sudo
pub fn run_as(command: Command, user: Option<&str>) -> Command {
    match user {
        Some(user) => command.wrapped_in("sudo", ["-n", "-u", user]),
        None => command,
    }
}
