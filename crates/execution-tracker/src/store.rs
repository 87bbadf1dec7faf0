//! File-backed execution store
//!
//! `executions.lino` holds every record in links notation and is the source of
//! truth. `executions.json` is a uuid-keyed index rewritten from it on every
//! write. Both are only written while holding `executions.lock`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::lock::{LOCK_TIMEOUT, StoreLock};
use crate::notation;
use crate::record::{ExecutionRecord, ExecutionStatus, Outcome};

/// Primary store file
pub const LINO_FILE: &str = "executions.lino";
/// Secondary index file
pub const INDEX_FILE: &str = "executions.json";
/// Lock file
pub const LOCK_FILE: &str = "executions.lock";

/// Age after which an `executing` record is considered abandoned
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Options for [`ExecutionStore::cleanup_stale`]
#[derive(Debug, Clone, Copy)]
pub struct CleanupOptions {
    /// Records older than this are stale regardless of their process
    pub max_age: Duration,
    /// Report without modifying anything
    pub dry_run: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            dry_run: false,
        }
    }
}

/// Why a record was judged stale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// Its process no longer exists on this host
    ProcessGone(u32),
    /// It is older than the configured maximum age
    TooOld,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::ProcessGone(pid) => write!(f, "process {} is gone", pid),
            StaleReason::TooOld => f.write_str("older than the maximum age"),
        }
    }
}

/// Result of a stale sweep
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    /// Stale records as they were found
    pub records: Vec<(ExecutionRecord, StaleReason)>,
    /// Number of records finalized (0 for a dry run)
    pub cleaned: usize,
}

impl CleanupReport {
    /// UUIDs of the affected records
    pub fn uuids(&self) -> Vec<&str> {
        self.records.iter().map(|(r, _)| r.uuid.as_str()).collect()
    }
}

/// Record counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    /// All records
    pub total: usize,
    /// Still executing
    pub executing: usize,
    /// Finalized
    pub executed: usize,
    /// Finalized with exit code 0
    pub successful: usize,
    /// Finalized with a non-zero exit code
    pub failed: usize,
    /// Primary store path
    pub lino_path: PathBuf,
    /// Index path
    pub index_path: PathBuf,
}

/// Agreement between the primary store and its index
#[derive(Debug, Clone, Default)]
pub struct ConsistencyReport {
    /// No discrepancies found
    pub consistent: bool,
    /// Records in the primary store
    pub primary_count: usize,
    /// Records in the index
    pub index_count: usize,
    /// Each discrepancy
    pub errors: Vec<String>,
}

/// Durable store of execution records
#[derive(Debug, Clone)]
pub struct ExecutionStore {
    dir: PathBuf,
}

impl ExecutionStore {
    /// Open (creating if needed) the store in `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!("Opened execution store at {}", dir.display());
        Ok(Self { dir })
    }

    /// Store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lino_path(&self) -> PathBuf {
        self.dir.join(LINO_FILE)
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn lock(&self) -> Result<StoreLock> {
        StoreLock::acquire(&self.dir.join(LOCK_FILE), LOCK_TIMEOUT)
    }

    fn read(&self) -> Result<Vec<ExecutionRecord>> {
        match fs::read_to_string(self.lino_path()) {
            Ok(text) => notation::decode(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write both files. Callers hold the lock.
    fn write(&self, records: &[ExecutionRecord]) -> Result<()> {
        write_atomic(&self.lino_path(), notation::encode(records).as_bytes())?;

        let index: BTreeMap<&str, &ExecutionRecord> =
            records.iter().map(|r| (r.uuid.as_str(), r)).collect();
        write_atomic(&self.index_path(), &serde_json::to_vec_pretty(&index)?)?;

        debug!("Wrote {} records", records.len());
        Ok(())
    }

    /// Read, modify and write back under the lock
    fn update<T>(&self, f: impl FnOnce(&mut Vec<ExecutionRecord>) -> Result<T>) -> Result<T> {
        let _lock = self.lock()?;
        let mut records = self.read()?;
        let value = f(&mut records)?;
        self.write(&records)?;
        Ok(value)
    }

    /// Insert a new record; its UUID must not exist yet
    pub fn create(&self, record: &ExecutionRecord) -> Result<()> {
        self.update(|records| {
            if records.iter().any(|r| r.uuid == record.uuid) {
                return Err(Error::Duplicate(record.uuid.clone()));
            }
            records.push(record.clone());
            Ok(())
        })
    }

    /// Insert or replace a record
    pub fn save(&self, record: &ExecutionRecord) -> Result<()> {
        self.update(|records| {
            match records.iter_mut().find(|r| r.uuid == record.uuid) {
                Some(existing) => *existing = record.clone(),
                None => records.push(record.clone()),
            }
            Ok(())
        })
    }

    /// Look up a record
    pub fn get(&self, uuid: &str) -> Result<Option<ExecutionRecord>> {
        Ok(self.read()?.into_iter().find(|r| r.uuid == uuid))
    }

    /// Every record, in insertion order
    pub fn get_all(&self) -> Result<Vec<ExecutionRecord>> {
        self.read()
    }

    /// Records in the given state
    pub fn get_by_status(&self, status: ExecutionStatus) -> Result<Vec<ExecutionRecord>> {
        Ok(self
            .read()?
            .into_iter()
            .filter(|r| r.status == status)
            .collect())
    }

    /// Records still executing
    pub fn get_executing(&self) -> Result<Vec<ExecutionRecord>> {
        self.get_by_status(ExecutionStatus::Executing)
    }

    /// The `limit` most recently started records, newest first
    pub fn get_recent(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let mut records = self.read()?;
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        records.truncate(limit);
        Ok(records)
    }

    /// Remove a record. Returns whether it existed.
    pub fn delete(&self, uuid: &str) -> Result<bool> {
        self.update(|records| {
            let before = records.len();
            records.retain(|r| r.uuid != uuid);
            Ok(records.len() != before)
        })
    }

    /// Remove every record
    pub fn clear(&self) -> Result<()> {
        self.update(|records| {
            records.clear();
            Ok(())
        })
    }

    /// Record counts
    pub fn stats(&self) -> Result<ExecutionStats> {
        let records = self.read()?;
        let count = |f: &dyn Fn(&ExecutionRecord) -> bool| records.iter().filter(|r| f(r)).count();
        Ok(ExecutionStats {
            total: records.len(),
            executing: count(&|r| r.status == ExecutionStatus::Executing),
            executed: count(&|r| r.status == ExecutionStatus::Executed),
            successful: count(&|r| r.status == ExecutionStatus::Executed && r.exit_code == Some(0)),
            failed: count(&|r| {
                r.status == ExecutionStatus::Executed && r.exit_code.is_some_and(|c| c != 0)
            }),
            lino_path: self.lino_path(),
            index_path: self.index_path(),
        })
    }

    /// Compare the index against the primary store
    pub fn verify_consistency(&self) -> Result<ConsistencyReport> {
        let primary = self.read()?;
        let index: BTreeMap<String, ExecutionRecord> = match fs::read(self.index_path()) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        let mut errors = Vec::new();
        if primary.len() != index.len() {
            errors.push(format!(
                "Record count mismatch: lino={}, index={}",
                primary.len(),
                index.len()
            ));
        }
        for record in &primary {
            match index.get(&record.uuid) {
                None => errors.push(format!("Record {} missing from index", record.uuid)),
                Some(indexed) if indexed != record => {
                    errors.push(format!("Record {} differs in index", record.uuid))
                }
                Some(_) => {}
            }
        }
        for uuid in index.keys() {
            if !primary.iter().any(|r| &r.uuid == uuid) {
                errors.push(format!("Index entry {} has no record", uuid));
            }
        }

        Ok(ConsistencyReport {
            consistent: errors.is_empty(),
            primary_count: primary.len(),
            index_count: index.len(),
            errors,
        })
    }

    /// Finalize abandoned `executing` records with the stale exit code.
    ///
    /// A dry run only reports what would change. A real sweep detects and
    /// finalizes under one lock so a record finishing concurrently is not
    /// overwritten.
    pub fn cleanup_stale(&self, options: CleanupOptions) -> Result<CleanupReport> {
        if options.dry_run {
            let records = find_stale(&self.read()?, options.max_age);
            info!("{} stale records (dry run)", records.len());
            return Ok(CleanupReport {
                records,
                cleaned: 0,
            });
        }

        self.update(|records| {
            let stale = find_stale(records, options.max_age);
            let mut cleaned = 0;
            for (found, _) in &stale {
                if let Some(record) = records.iter_mut().find(|r| r.uuid == found.uuid) {
                    if record.finalize(Outcome::Stale) {
                        cleaned += 1;
                    }
                }
            }
            info!("Cleaned {} stale records", cleaned);
            Ok(CleanupReport {
                records: stale,
                cleaned,
            })
        })
    }
}

fn find_stale(records: &[ExecutionRecord], max_age: Duration) -> Vec<(ExecutionRecord, StaleReason)> {
    records
        .iter()
        .filter(|r| r.is_executing())
        .filter_map(|r| stale_reason(r, max_age).map(|reason| (r.clone(), reason)))
        .collect()
}

/// Why `record` counts as abandoned, if it does
pub fn stale_reason(record: &ExecutionRecord, max_age: Duration) -> Option<StaleReason> {
    if !record.is_executing() {
        return None;
    }
    // A pid is only meaningful on the platform that recorded it.
    if let Some(pid) = record.pid {
        if record.platform == std::env::consts::OS && !process_alive(pid) {
            debug!("Stale: {} (PID {} gone)", record.uuid, pid);
            return Some(StaleReason::ProcessGone(pid));
        }
    }
    let age = Utc::now().signed_duration_since(record.start_time);
    match age.to_std() {
        Ok(age) if age > max_age => {
            debug!("Stale: {} ({} min old)", record.uuid, age.as_secs() / 60);
            Some(StaleReason::TooOld)
        }
        _ => None,
    }
}

/// Whether a process with this pid exists
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists but owned by someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether a process with this pid exists
#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

/// Replace `path` with `contents` via a sibling temp file and rename
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path) {
        warn!("Could not replace {}: {}", path.display(), e);
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
