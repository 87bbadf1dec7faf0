//! Exclusive store lock shared by all wrapper processes on a host

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default time to wait for another writer
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between acquisition attempts
pub const LOCK_RETRY: Duration = Duration::from_millis(100);

/// An exclusive advisory lock on the store's lock file, released on drop.
///
/// The OS drops the lock with the holder, so a crashed wrapper never leaves the
/// store locked.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Block until the lock at `path` is held, retrying every [`LOCK_RETRY`]
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        // Opened without truncation so a holder's pid is not wiped before we own it.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {
                    if started.elapsed() >= timeout {
                        warn!("Store lock {} still held after {:?}", path.display(), timeout);
                        return Err(Error::LockTimeout {
                            path: path.to_path_buf(),
                            waited: started.elapsed(),
                        });
                    }
                    thread::sleep(LOCK_RETRY);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut file = file;
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        debug!("Acquired store lock {}", path.display());

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release store lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_holder_times_out_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("executions.lock");

        let held = StoreLock::acquire(&path, LOCK_TIMEOUT).unwrap();
        let err = StoreLock::acquire(&path, Duration::from_millis(250)).unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));

        drop(held);
        StoreLock::acquire(&path, Duration::from_millis(250)).unwrap();
    }

    #[test]
    fn test_waiter_gets_lock_after_holder_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("executions.lock");

        let held = StoreLock::acquire(&path, LOCK_TIMEOUT).unwrap();
        let waiter = {
            let path = path.clone();
            thread::spawn(move || StoreLock::acquire(&path, Duration::from_secs(5)).map(|_| ()))
        };
        thread::sleep(Duration::from_millis(300));
        drop(held);
        waiter.join().unwrap().unwrap();
    }
}
