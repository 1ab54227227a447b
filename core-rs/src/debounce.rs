/**
 * debounce.rs
 * Ports recently handed out by this process
 *
 * A port returned to a caller may still be lingering in the OS when the next
 * lookup runs. Entries block a port for one debounce window after it was
 * handed out, then drop off on the next purge.
 */

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

/// Default debounce window (10 seconds)
pub const DEFAULT_DEBOUNCE_WINDOW_MS: i64 = 10_000;

/// A port handed out at a point in time
///
/// Identity is the port alone, the timestamp does not take part in equality.
#[derive(Debug, Clone, Copy)]
pub struct DebounceEntry {
    pub port: u16,
    pub bound_at_millis: i64,
}

impl PartialEq for DebounceEntry {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port
    }
}

impl Eq for DebounceEntry {}

impl Hash for DebounceEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.port.hash(state);
    }
}

/// Set of recently issued ports, keyed by port
#[derive(Debug)]
pub struct DebounceTracker {
    window_ms: i64,
    entries: HashSet<DebounceEntry>,
}

impl Default for DebounceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_WINDOW_MS)
    }
}

impl DebounceTracker {
    pub fn new(window_ms: i64) -> Self {
        DebounceTracker {
            window_ms,
            entries: HashSet::new(),
        }
    }

    /// Drop every entry at least one window old
    ///
    /// # Returns
    /// Number of entries removed
    pub fn purge(&mut self, now_millis: i64) -> usize {
        let before = self.entries.len();
        let window = self.window_ms;
        self.entries
            .retain(|entry| now_millis - entry.bound_at_millis < window);
        before - self.entries.len()
    }

    pub fn contains(&self, port: u16) -> bool {
        self.entries.contains(&DebounceEntry {
            port,
            bound_at_millis: 0,
        })
    }

    /// Record a handed-out port
    ///
    /// An existing entry for the same port is kept as is.
    pub fn record(&mut self, port: u16, now_millis: i64) -> bool {
        self.entries.insert(DebounceEntry {
            port,
            bound_at_millis: now_millis,
        })
    }

    /// Currently tracked ports, ascending
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.entries.iter().map(|e| e.port).collect();
        ports.sort_unstable();
        ports
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
