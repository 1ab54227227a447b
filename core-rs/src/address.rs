//! Local address helpers

use std::net::{IpAddr, ToSocketAddrs};

use tracing::trace;

use crate::allocator::PortAllocator;
use crate::sentinel::to_sentinel;

/// Whether `host` resolves to an address of this machine
///
/// An empty host means loopback. Brackets around an IPv6 literal
/// (`[::1]`) are accepted. Only the first resolved address is considered.
/// Resolution failures count as "not local".
pub fn is_local_address(host: &str) -> bool {
    let host = host.trim();
    if host.is_empty() {
        return true;
    }
    let host = host
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(host);

    match (host, 0).to_socket_addrs() {
        Ok(mut addrs) => addrs.next().is_some_and(|addr| is_local_ip(addr.ip())),
        Err(e) => {
            trace!(host = %host, error = %e, "Could not resolve host");
            false
        }
    }
}

/// Whether `addr` is the wildcard, a loopback, or assigned to a local interface
pub fn is_local_ip(addr: IpAddr) -> bool {
    if addr.is_unspecified() || addr.is_loopback() {
        return true;
    }
    interface_has_address(addr)
}

/// `prefix + "localhost:" + port + suffix` using the process-wide allocator
///
/// # Example
/// ```no_run
/// let url = port_ledger::local_address("http://", "/api");
/// assert!(url.starts_with("http://localhost:"));
/// ```
pub fn local_address(prefix: &str, suffix: &str) -> String {
    let port = to_sentinel(PortAllocator::global().next_available_port());
    format!("{}localhost:{}{}", prefix, port, suffix)
}

#[cfg(unix)]
fn interface_has_address(addr: IpAddr) -> bool {
    use std::net::{SocketAddrV4, SocketAddrV6};

    let interfaces = match nix::ifaddrs::getifaddrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            trace!(error = %e, "Could not enumerate interfaces");
            return false;
        }
    };

    interfaces
        .filter_map(|ifaddr| ifaddr.address)
        .any(|storage| {
            if let Some(sin) = storage.as_sockaddr_in() {
                IpAddr::V4(*SocketAddrV4::from(*sin).ip()) == addr
            } else if let Some(sin6) = storage.as_sockaddr_in6() {
                IpAddr::V6(*SocketAddrV6::from(*sin6).ip()) == addr
            } else {
                false
            }
        })
}

#[cfg(not(unix))]
fn interface_has_address(addr: IpAddr) -> bool {
    // Binding only succeeds for addresses assigned to this machine
    std::net::UdpSocket::bind((addr, 0)).is_ok()
}
