//! Integer-returning entry points on the process-wide allocator
//!
//! For hosts that expect a plain port number: `-1` means no port was found.

use std::collections::HashSet;

use crate::allocator::{AllocationRequest, PortAllocator, PORT_MAX, PORT_MIN};

/// Returned when no port could be allocated
pub const NO_PORT: i32 = -1;

/// Port number or `NO_PORT`
pub fn to_sentinel(port: Option<u16>) -> i32 {
    port.map_or(NO_PORT, i32::from)
}

/// First free port in `[1024, 65535]`, or -1
pub fn get_next_available_port() -> i32 {
    to_sentinel(PortAllocator::global().next_available_port())
}

/// First free port among `candidates`, or -1
pub fn get_next_available_port_from(candidates: &[u16]) -> i32 {
    to_sentinel(PortAllocator::global().next_available_port_from(candidates))
}

/// First free port in `[min, max]` outside `excluded`, or -1
///
/// Bounds outside `[1024, 65535]` are clipped rather than rejected.
pub fn get_next_available_port_in(min: i32, max: i32, excluded: Option<&HashSet<i32>>) -> i32 {
    match clip_request(min, max, excluded) {
        Some(request) => to_sentinel(PortAllocator::global().allocate(&request)),
        None => NO_PORT,
    }
}

/// Forget the ledger path on the process-wide allocator
pub fn clear_lock_file_config() {
    PortAllocator::global().clear_lock_file_config();
}

fn clip_request(min: i32, max: i32, excluded: Option<&HashSet<i32>>) -> Option<AllocationRequest> {
    let min = min.max(i32::from(PORT_MIN));
    let max = max.min(i32::from(PORT_MAX));
    if min > max {
        return None;
    }

    let excluded = excluded
        .into_iter()
        .flatten()
        .filter_map(|&port| u16::try_from(port).ok());

    Some(AllocationRequest::new(u16::try_from(min).ok()?, u16::try_from(max).ok()?).excluding(excluded))
}
