//! Error types for isolated command execution

use thiserror::Error;

/// Unified error type for the isolation engine
#[derive(Error, Debug)]
pub enum Error {
    /// The isolation request is invalid; always detected before anything is spawned
    #[error("{0}")]
    Configuration(String),

    /// A backend binary is not installed
    #[error("{binary} is not installed. Install it with: {hint}")]
    ToolUnavailable {
        /// The binary that could not be found
        binary: String,
        /// How to install it
        hint: String,
    },

    /// Failed to spawn a process
    #[error("failed to spawn process: {reason}")]
    SpawnFailed {
        /// The reason for the spawn failure
        reason: String,
    },

    /// Failed to send signal to process
    #[error("failed to send signal {signal}: {reason}")]
    SignalFailed {
        /// The signal number that failed to send
        signal: i32,
        /// The reason for the signal failure
        reason: String,
    },

    /// An auxiliary probe command did not finish in time
    #[error("{program} did not respond within {seconds}s")]
    ProbeTimeout {
        /// The program that was probed
        program: String,
        /// The timeout that elapsed
        seconds: u64,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Nix error (Unix signal handling)
    #[cfg(unix)]
    #[error(transparent)]
    Nix(#[from] nix::Error),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a spawn failed error
    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            reason: reason.into(),
        }
    }

    /// Create a signal failed error
    pub fn signal_failed(signal: i32, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            signal,
            reason: reason.into(),
        }
    }

    /// Whether this error was raised before any process could have been spawned
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    /// Add backend context to a spawn failure
    pub fn with_backend_context(self, backend: impl Into<String>) -> Self {
        match self {
            Error::SpawnFailed { reason } => Error::SpawnFailed {
                reason: format!("{} backend: {}", backend.into(), reason),
            },
            other => other,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
