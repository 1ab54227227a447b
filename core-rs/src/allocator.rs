/**
 * allocator.rs
 * Serialized free-port search
 *
 * Every lookup runs under one mutex:
 * 1. Purge debounce entries older than the window
 * 2. For each candidate: skip if debounced, bind a probe listener,
 *    confirm with the reservation ledger (when configured)
 * 3. Record the winner in the debounce set, close the probe, return it
 *
 * Bind failures and ledger refusals just move on to the next candidate.
 * Nothing here panics or returns an error to the caller: "no port" is None.
 */

use std::collections::HashSet;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use once_cell::sync::OnceCell;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::config::{AllocatorConfig, LedgerPathResolver};
use crate::debounce::DebounceTracker;
use crate::errors::{PortError, Result};
use crate::ledger::ReservationLedger;

/// Lowest port ever handed out
pub const PORT_MIN: u16 = 1024;

/// Highest port ever handed out
pub const PORT_MAX: u16 = 65535;

static GLOBAL_ALLOCATOR: OnceCell<PortAllocator> = OnceCell::new();

/// Inclusive port range with exclusions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub min: u16,
    pub max: u16,
    pub excluded: HashSet<u16>,
}

impl Default for AllocationRequest {
    fn default() -> Self {
        Self::full_range()
    }
}

impl AllocationRequest {
    /// `[PORT_MIN, PORT_MAX]`, nothing excluded
    pub fn full_range() -> Self {
        Self::new(PORT_MIN, PORT_MAX)
    }

    pub fn new(min: u16, max: u16) -> Self {
        AllocationRequest {
            min,
            max,
            excluded: HashSet::new(),
        }
    }

    pub fn excluding<I: IntoIterator<Item = u16>>(mut self, ports: I) -> Self {
        self.excluded.extend(ports);
        self
    }

    /// Whether `port` may be returned for this request
    pub fn admits(&self, port: u16) -> bool {
        port >= PORT_MIN
            && port >= self.min
            && port <= self.max
            && !self.excluded.contains(&port)
    }

    /// Admissible ports in ascending order
    pub fn candidates(&self) -> impl Iterator<Item = u16> + '_ {
        (self.min..=self.max).filter(move |&port| self.admits(port))
    }
}

struct AllocatorState {
    debounce: DebounceTracker,
    ledger_path: LedgerPathResolver,
}

/// Hands out free TCP ports, one lookup at a time
pub struct PortAllocator {
    config: AllocatorConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<AllocatorState>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortAllocator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PortAllocator {
    /// Allocator with default config and the system clock
    pub fn new() -> Self {
        Self::with_config(AllocatorConfig::default())
    }

    /// Allocator with `config` and the system clock
    ///
    /// The config is taken as is; call `AllocatorConfig::validate` first for
    /// values coming from outside. `init_global` does that check itself.
    pub fn with_config(config: AllocatorConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Allocator driven by an injected clock
    ///
    /// # Example
    /// ```
    /// use std::sync::Arc;
    /// use port_ledger::{AllocatorConfig, ManualClock, PortAllocator};
    ///
    /// let clock = Arc::new(ManualClock::starting_now());
    /// let allocator = PortAllocator::with_clock(AllocatorConfig::default(), clock.clone());
    /// clock.advance(10_000);
    /// # let _ = allocator;
    /// ```
    pub fn with_clock(config: AllocatorConfig, clock: Arc<dyn Clock>) -> Self {
        let state = AllocatorState {
            debounce: DebounceTracker::new(config.debounce_window_ms),
            ledger_path: LedgerPathResolver::from_config(&config),
        };

        PortAllocator {
            config,
            clock,
            state: Mutex::new(state),
        }
    }

    /// Process-wide allocator with default config
    pub fn global() -> &'static PortAllocator {
        GLOBAL_ALLOCATOR.get_or_init(PortAllocator::new)
    }

    /// Install the process-wide allocator with a custom config
    ///
    /// # Errors
    /// Returns error if the config is invalid or the global allocator
    /// has already been created
    pub fn init_global(config: AllocatorConfig) -> Result<&'static PortAllocator> {
        config.validate()?;

        let mut installed = false;
        let allocator = GLOBAL_ALLOCATOR.get_or_init(|| {
            installed = true;
            PortAllocator::with_config(config)
        });

        if installed {
            Ok(allocator)
        } else {
            Err(PortError::Config(
                "global port allocator already initialised".to_string(),
            ))
        }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// First free port in `[PORT_MIN, PORT_MAX]`
    pub fn next_available_port(&self) -> Option<u16> {
        self.allocate(&AllocationRequest::full_range())
    }

    /// First free port among `candidates`, tried in order
    ///
    /// A candidate of 0 lets the OS pick an ephemeral port.
    pub fn next_available_port_from(&self, candidates: &[u16]) -> Option<u16> {
        let mut state = self.lock_state();
        self.purge_debounce(&mut state);

        match self.probe_candidates(&mut state, candidates.iter().copied()) {
            Ok(port) => Some(port),
            Err(e) => {
                debug!(candidates = candidates.len(), error = %e, "Port lookup failed");
                None
            }
        }
    }

    /// First free port in `[min, max]` that is not in `excluded`
    pub fn next_available_port_in(&self, min: u16, max: u16, excluded: &[u16]) -> Option<u16> {
        self.allocate(&AllocationRequest::new(min, max).excluding(excluded.iter().copied()))
    }

    /// First free port admitted by `request`
    pub fn allocate(&self, request: &AllocationRequest) -> Option<u16> {
        let mut state = self.lock_state();
        self.purge_debounce(&mut state);

        match self.probe_candidates(&mut state, request.candidates()) {
            Ok(port) => Some(port),
            Err(e) => {
                debug!(
                    min = request.min,
                    max = request.max,
                    excluded = request.excluded.len(),
                    error = %e,
                    "Port lookup failed"
                );
                None
            }
        }
    }

    /// Forget the ledger property and cached ledger path
    ///
    /// The next lookup consults the environment again.
    pub fn clear_lock_file_config(&self) {
        self.lock_state().ledger_path.clear();
    }

    /// Set the process-wide ledger path property
    ///
    /// The environment variable still takes precedence when set.
    pub fn set_lock_file_property(&self, path: Option<PathBuf>) {
        self.lock_state().ledger_path.set_property(path);
    }

    /// Ledger file in use, resolving it if needed
    pub fn ledger_path(&self) -> Option<PathBuf> {
        self.lock_state()
            .ledger_path
            .resolve()
            .map(|path| path.to_path_buf())
    }

    /// Ports currently inside the debounce window
    pub fn debounced_ports(&self) -> Vec<u16> {
        let mut state = self.lock_state();
        self.purge_debounce(&mut state);
        state.debounce.ports()
    }

    fn lock_state(&self) -> MutexGuard<'_, AllocatorState> {
        // A panic in another lookup leaves the state consistent enough to reuse
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn purge_debounce(&self, state: &mut AllocatorState) {
        let purged = state.debounce.purge(self.clock.now_millis());
        if purged > 0 {
            trace!(purged = purged, "Debounce entries expired");
        }
    }

    fn probe_candidates<I>(&self, state: &mut AllocatorState, candidates: I) -> Result<u16>
    where
        I: IntoIterator<Item = u16>,
    {
        let mut tried = 0usize;
        for port in candidates {
            tried += 1;
            if let Some(accepted) = self.try_port(state, port) {
                return Ok(accepted);
            }
        }

        Err(PortError::NoFreePort(format!(
            "none of {} candidate ports accepted",
            tried
        )))
    }

    fn try_port(&self, state: &mut AllocatorState, port: u16) -> Option<u16> {
        if port != 0 && state.debounce.contains(port) {
            trace!(port = %port, "Recently handed out, skipping");
            return None;
        }

        let listener = match self.bind_probe(port) {
            Ok(listener) => listener,
            Err(e) => {
                trace!(port = %port, error = %e, "Port unavailable on system, skipping");
                return None;
            }
        };

        let bound = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                trace!(port = %port, error = %e, "Probe has no local address, skipping");
                return None;
            }
        };

        if port == 0 && state.debounce.contains(bound) {
            trace!(port = %bound, "OS picked a recently handed out port, skipping");
            return None;
        }

        if let Some(path) = state.ledger_path.resolve() {
            let ledger = ReservationLedger::new(path)
                .with_clock(Arc::clone(&self.clock))
                .with_ttl_ms(self.config.reservation_ttl_ms)
                .with_lock_policy(self.config.lock_policy());

            if !ledger.reserve(bound) {
                debug!(port = %bound, "Port reserved by another process, skipping");
                return None;
            }
        }

        state.debounce.record(bound, self.clock.now_millis());
        drop(listener);

        debug!(port = %bound, "Allocated available port");
        Some(bound)
    }

    fn bind_probe(&self, port: u16) -> Result<TcpListener> {
        let addr = SocketAddr::new(self.config.bind_address, port);
        TcpListener::bind(addr).map_err(|source| PortError::Bind { port, source })
    }
}
