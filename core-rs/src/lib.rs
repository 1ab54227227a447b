//! # Port Ledger - free TCP ports for ephemeral servers
//!
//! Finds a TCP port on this host that a server can bind at startup, without
//! handing the same port to two callers before either has bound it.
//!
//! ## Key Features
//!
//! - One lookup at a time per process (all entry points share one mutex)
//! - Ports handed out in the last 10 seconds are skipped
//! - Optional cross-process reservation ledger: a lock-guarded `port=millis`
//!   file that every cooperating process consults before accepting a port
//! - "No port" is a value (`None`, or `-1` from the integer entry points),
//!   never a panic or an error
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │ PortAllocator (Mutex)                     │
//! │   purge debounce → bind probe → ledger    │
//! └───────────────────────────────────────────┘
//!        │                        │
//!  ┌─────┴────────┐     ┌─────────┴──────────┐
//!  │ Debounce set │     │ ReservationLedger  │
//!  │ (in process) │     │ (flock'd file)     │
//!  └──────────────┘     └────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use port_ledger::{AllocationRequest, PortAllocator};
//!
//! let allocator = PortAllocator::new();
//! let port = allocator.allocate(&AllocationRequest::new(8000, 8999).excluding([8080]));
//! assert!(port.map_or(true, |p| (8000..=8999).contains(&p) && p != 8080));
//! ```

pub mod address;
pub mod allocator;
pub mod clock;
pub mod config;
pub mod debounce;
pub mod errors;
pub mod ledger;
pub mod sentinel;

pub use address::{is_local_address, is_local_ip, local_address};
pub use allocator::{AllocationRequest, PortAllocator, PORT_MAX, PORT_MIN};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AllocatorConfig, LedgerPathResolver, LOCK_FILE_ENV};
pub use debounce::{DebounceEntry, DebounceTracker};
pub use errors::{PortError, Result};
pub use ledger::{LockFileHandle, LockPolicy, ReservationLedger};
pub use sentinel::{
    clear_lock_file_config, get_next_available_port, get_next_available_port_from,
    get_next_available_port_in, NO_PORT,
};
