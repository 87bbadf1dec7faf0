//! Error types for the execution tracker

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Execution tracker error type
#[derive(Error, Debug)]
pub enum Error {
    /// Another invocation held the store lock for too long
    #[error("Timed out after {waited:?} waiting for store lock {path}")]
    LockTimeout {
        /// Lock file
        path: PathBuf,
        /// How long acquisition was retried
        waited: Duration,
    },

    /// A record with this UUID already exists
    #[error("Execution record already exists: {0}")]
    Duplicate(String),

    /// No record with this UUID
    #[error("No execution found with UUID: {0}")]
    NotFound(String),

    /// The store file could not be decoded
    #[error("Malformed store at line {line}: {message}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// What was wrong
        message: String,
    },

    /// Unknown status output format
    #[error("Unknown output format: {0} (expected links-notation, json or text)")]
    UnknownFormat(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            line,
            message: message.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
