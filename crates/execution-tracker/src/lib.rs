//! Execution tracking for isolated commands
//!
//! Every wrapper invocation owns one [`ExecutionRecord`], created `executing` and
//! finalized exactly once: on completion, on a terminating signal, or by a stale
//! sweep. Records live in an [`ExecutionStore`] shared by all invocations on the
//! host and guarded by an exclusive file lock.

#![warn(missing_docs)]

pub mod error;
pub mod format;
pub mod lock;
pub mod notation;
pub mod record;
pub mod signal;
pub mod store;

pub use error::{Error, Result};
pub use format::OutputFormat;
pub use record::{ExecutionRecord, ExecutionStatus, Outcome, STALE_EXIT_CODE};
pub use signal::{ActiveExecution, SignalHandler};
pub use store::{
    CleanupOptions, CleanupReport, ConsistencyReport, ExecutionStats, ExecutionStore,
    StaleReason,
};
