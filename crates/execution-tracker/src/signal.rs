//! Signal-driven finalization
//!
//! Interrupt, terminate and hangup are fed into the same [`ExecutionRecord::finalize`]
//! transition normal completion uses. Whichever happens first wins; the other
//! finds nothing left to finalize.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::error::Result;
use crate::record::{ExecutionRecord, Outcome};
use crate::store::ExecutionStore;

/// Cleanup run after the record is finalized on a signal; receives the exit code
pub type Teardown = Box<dyn FnOnce(i32) + Send>;

#[derive(Default)]
struct Slot {
    record: Option<ExecutionRecord>,
    store: Option<ExecutionStore>,
    teardown: Option<Teardown>,
    signalled: Option<Outcome>,
}

/// The execution this process is currently running, shared with the signal thread
#[derive(Clone, Default)]
pub struct ActiveExecution {
    slot: Arc<Mutex<Slot>>,
}

impl std::fmt::Debug for ActiveExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.lock();
        f.debug_struct("ActiveExecution")
            .field("record", &slot.record.as_ref().map(|r| &r.uuid))
            .field("teardown", &slot.teardown.is_some())
            .finish()
    }
}

impl ActiveExecution {
    /// Nothing tracked yet
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking `record`, persisting transitions to `store` when given
    pub fn track(&self, record: ExecutionRecord, store: Option<ExecutionStore>) {
        let mut slot = self.lock();
        slot.record = Some(record);
        slot.store = store;
    }

    /// Modify the tracked record and persist it. Does nothing once finalized.
    pub fn update(&self, f: impl FnOnce(&mut ExecutionRecord)) {
        let mut slot = self.lock();
        let Slot { record, store, .. } = &mut *slot;
        if let Some(record) = record.as_mut() {
            f(record);
            persist(store.as_ref(), record);
        }
    }

    /// Register cleanup to run if a signal arrives
    pub fn on_teardown(&self, teardown: impl FnOnce(i32) + Send + 'static) {
        self.lock().teardown = Some(Box::new(teardown));
    }

    /// Copy of the tracked record
    pub fn snapshot(&self) -> Option<ExecutionRecord> {
        self.lock().record.clone()
    }

    /// Finalize with `outcome` on normal completion.
    ///
    /// The teardown is dropped unrun. Returns the finalized record, or `None`
    /// if a signal got there first.
    pub fn finish(&self, outcome: Outcome) -> Option<ExecutionRecord> {
        let mut slot = self.lock();
        slot.teardown = None;
        let mut record = slot.record.take()?;
        record.finalize(outcome);
        persist(slot.store.as_ref(), &record);
        Some(record)
    }

    /// The signal outcome, if a signal finalized the execution
    pub fn interrupted(&self) -> Option<Outcome> {
        self.lock().signalled
    }

    /// Finalize for `signal` and run the teardown. Returns the exit code to use.
    pub fn handle_signal(&self, signal: i32) -> i32 {
        let outcome = Outcome::Signalled(signal);
        let teardown = {
            let mut slot = self.lock();
            slot.signalled.get_or_insert(outcome);
            if let Some(mut record) = slot.record.take() {
                record.finalize(outcome);
                persist(slot.store.as_ref(), &record);
                debug!("Finalized {} on signal {}", record.uuid, signal);
            }
            slot.teardown.take()
        };
        if let Some(teardown) = teardown {
            teardown(outcome.exit_code());
        }
        outcome.exit_code()
    }
}

fn persist(store: Option<&ExecutionStore>, record: &ExecutionRecord) {
    if let Some(store) = store {
        if let Err(e) = store.save(record) {
            warn!("Could not save execution record {}: {}", record.uuid, e);
        }
    }
}

/// Background thread that turns SIGINT, SIGTERM and SIGHUP into finalization
/// followed by process exit with 128 + signal.
#[derive(Debug)]
pub struct SignalHandler {
    #[cfg(unix)]
    handle: signal_hook::iterator::Handle,
}

impl SignalHandler {
    /// Install handlers for `active`
    #[cfg(unix)]
    pub fn install(active: ActiveExecution) -> Result<Self> {
        use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
        let handle = signals.handle();
        std::thread::Builder::new()
            .name("isolate-signals".to_string())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    let code = active.handle_signal(signal);
                    std::process::exit(code);
                }
            })?;
        Ok(Self { handle })
    }

    /// Install handlers for `active`
    #[cfg(not(unix))]
    pub fn install(_active: ActiveExecution) -> Result<Self> {
        debug!("Signal finalization is not available on this platform");
        Ok(Self {})
    }

    /// Stop listening; default signal behavior is not restored
    pub fn close(&self) {
        #[cfg(unix)]
        self.handle.close();
    }
}
