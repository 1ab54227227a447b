//! Advisory exclusive lock on the ledger file
//!
//! The lock is polled with `flock(LOCK_EX | LOCK_NB)` so that a wedged holder
//! can only stall us for `attempts * interval`. Dropping the handle releases
//! the lock and closes the file on every exit path.
//!
//! On Linux `flock` and POSIX record locks don't see each other, and JVM
//! `FileChannel.tryLock` takes a record lock. After `flock` succeeds we also
//! take a whole-file `fcntl(F_SETLK, F_WRLCK)` lock, so processes using
//! either kind are excluded. Record locks belong to the process, not the
//! handle: two handles in one process never exclude each other through it,
//! and closing any descriptor of the file in this process drops it. `flock`
//! is what serializes handles inside a process. Other unix systems back both
//! calls with the same lock table, so `flock` alone is enough there.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{trace, warn};

use crate::errors::{PortError, Result};

/// Default number of lock retries
pub const DEFAULT_LOCK_ATTEMPTS: u32 = 200;

/// Default pause between lock retries
pub const DEFAULT_LOCK_INTERVAL: Duration = Duration::from_millis(10);

/// How long to keep polling for the ledger lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        LockPolicy {
            attempts: DEFAULT_LOCK_ATTEMPTS,
            interval: DEFAULT_LOCK_INTERVAL,
        }
    }
}

impl LockPolicy {
    /// Upper bound on time spent waiting
    pub fn max_wait(&self) -> Duration {
        self.interval * self.attempts
    }
}

/// Open ledger file holding the exclusive lock
#[derive(Debug)]
pub struct LockFileHandle {
    file: File,
    path: PathBuf,
}

impl LockFileHandle {
    /// Open `path` and wait for the exclusive lock
    ///
    /// # Errors
    /// Returns error if:
    /// - The file cannot be opened
    /// - The lock is still held elsewhere after `policy.attempts` retries
    pub fn acquire(path: &Path, policy: &LockPolicy) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let mut retries = 0;
        while !try_lock_exclusive(&file)? {
            if retries >= policy.attempts {
                warn!(
                    path = %path.display(),
                    attempts = retries,
                    "Gave up waiting for ledger lock"
                );
                return Err(PortError::LockTimeout {
                    path: path.to_path_buf(),
                    attempts: retries,
                });
            }
            retries += 1;
            thread::sleep(policy.interval);
        }

        trace!(path = %path.display(), retries = retries, "Ledger lock acquired");

        Ok(LockFileHandle {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole file; invalid UTF-8 is replaced rather than rejected
    pub fn read_contents(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Truncate and replace the file contents
    pub fn rewrite(&mut self, contents: &str) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(contents.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

impl Drop for LockFileHandle {
    fn drop(&mut self) {
        unlock(&self.file);
        trace!(path = %self.path.display(), "Ledger lock released");
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();

    // Non-blocking so the caller controls the retry schedule
    let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        return if is_contended(&err) {
            Ok(false)
        } else {
            Err(PortError::Io(err))
        };
    }

    match set_record_lock(file, true) {
        Ok(()) => Ok(true),
        Err(err) => {
            unsafe {
                libc::flock(fd, libc::LOCK_UN);
            }
            if is_contended(&err) {
                trace!("Ledger held by a record lock in another process");
                Ok(false)
            } else {
                Err(PortError::Io(err))
            }
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    let _ = set_record_lock(file, false);

    // Closing the descriptor releases the lock too
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(unix)]
fn is_contended(err: &std::io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN || code == libc::EACCES
    )
}

/// Whole-file POSIX write lock (`lock == true`) or unlock
#[cfg(target_os = "linux")]
fn set_record_lock(file: &File, lock: bool) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let mut region: libc::flock = unsafe { std::mem::zeroed() };
    region.l_type = (if lock { libc::F_WRLCK } else { libc::F_UNLCK }) as libc::c_short;
    region.l_whence = libc::SEEK_SET as libc::c_short;
    region.l_start = 0;
    // Zero length runs to end of file, whatever its size
    region.l_len = 0;

    let rc = unsafe {
        libc::fcntl(
            file.as_raw_fd(),
            libc::F_SETLK,
            &region as *const libc::flock,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn set_record_lock(_file: &File, _lock: bool) -> std::io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> Result<bool> {
    // Windows fallback: no advisory lock, the ledger is best effort here
    warn!("Advisory file locking unavailable on this platform, ledger access is unguarded");
    Ok(true)
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}
