/**
 * ledger module
 * Cross-process port reservations in a shared, lock-guarded file
 *
 * Each line maps a port to the epoch millis at which some process reserved it:
 * - A reservation younger than the TTL (30s) blocks every other process
 * - Stale reservations are dropped by whichever process next opens the ledger
 * - Unparsable timestamps count as stale
 *
 * The ledger only coordinates processes that consult the same file.
 */

pub mod lock;
pub mod properties;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::errors::Result;

pub use lock::{LockFileHandle, LockPolicy};
pub use properties::{Properties, LEDGER_HEADER};

/// Default reservation lifetime (30 seconds)
pub const DEFAULT_RESERVATION_TTL_MS: i64 = 30_000;

/// File-backed port reservations shared between processes
pub struct ReservationLedger {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    lock_policy: LockPolicy,
}

impl std::fmt::Debug for ReservationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationLedger")
            .field("path", &self.path)
            .field("ttl_ms", &self.ttl_ms)
            .field("lock_policy", &self.lock_policy)
            .finish()
    }
}

impl ReservationLedger {
    /// Ledger at `path` with default TTL, lock policy and system clock
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        ReservationLedger {
            path: path.as_ref().to_path_buf(),
            clock: Arc::new(SystemClock),
            ttl_ms: DEFAULT_RESERVATION_TTL_MS,
            lock_policy: LockPolicy::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    pub fn with_lock_policy(mut self, lock_policy: LockPolicy) -> Self {
        self.lock_policy = lock_policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Claim `port` for this process
    ///
    /// Any failure (lock timeout, I/O) counts as "not reserved".
    pub fn reserve(&self, port: u16) -> bool {
        match self.try_reserve(port) {
            Ok(reserved) => reserved,
            Err(e) => {
                debug!(
                    port = %port,
                    path = %self.path.display(),
                    error = %e,
                    "Ledger check failed, treating port as taken"
                );
                false
            }
        }
    }

    /// Claim `port`, surfacing ledger errors
    ///
    /// # Returns
    /// true if the port was free in the ledger and is now recorded as ours,
    /// false if another live reservation holds it
    pub fn try_reserve(&self, port: u16) -> Result<bool> {
        let mut handle = LockFileHandle::acquire(&self.path, &self.lock_policy)?;

        let mut props = Properties::parse(&handle.read_contents()?);
        let now = self.clock.now_millis();
        let purged = purge_stale(&mut props, now, self.ttl_ms);

        let key = port.to_string();
        let reserved = if props.contains_key(&key) {
            debug!(port = %port, "Port already reserved in ledger");
            false
        } else {
            props.set(key, now.to_string());
            true
        };

        if reserved || purged > 0 {
            handle.rewrite(&props.to_text(LEDGER_HEADER))?;
            trace!(
                port = %port,
                reserved = reserved,
                purged = purged,
                entries = props.len(),
                "Ledger rewritten"
            );
        }

        Ok(reserved)
    }

    /// Read the ledger under the lock without modifying it
    pub fn entries(&self) -> Result<BTreeMap<String, String>> {
        let mut handle = LockFileHandle::acquire(&self.path, &self.lock_policy)?;
        Ok(Properties::parse(&handle.read_contents()?).into_map())
    }
}

/// Remove reservations older than `ttl_ms`
///
/// # Returns
/// Number of entries removed
fn purge_stale(props: &mut Properties, now_millis: i64, ttl_ms: i64) -> usize {
    props.retain(|_, value| !is_stale(now_millis, value, ttl_ms))
}

fn is_stale(now_millis: i64, value: &str, ttl_ms: i64) -> bool {
    // Trailing whitespace is part of the value and makes it unparsable
    match value.parse::<i64>() {
        Ok(reserved_at) => now_millis
            .checked_sub(reserved_at)
            .map_or(true, |age| age > ttl_ms),
        Err(_) => true,
    }
}
