//! Free-port discovery for the worker's remote-call server.

use std::net::{Ipv4Addr, TcpListener};
use std::ops::RangeInclusive;

use pyserve_shared::constants::network::PORT_SCAN_WINDOW;
use pyserve_shared::errors::{ServiceError, ServiceResult};

/// Find the first bindable port at or above `starting_from`.
///
/// Scans at most `PORT_SCAN_WINDOW` ports (capped at 65535).
pub fn find_free_port(starting_from: u16) -> ServiceResult<u16> {
    let end = starting_from.saturating_add(PORT_SCAN_WINDOW - 1);
    find_free_port_in(starting_from..=end)
}

/// Find the first bindable port in `range`.
///
/// Each candidate is probed by binding a listener on the loopback interface
/// and releasing it immediately, so the port may be taken by someone else
/// before the worker binds it. The worker's own bind failure then surfaces
/// as a connect timeout.
pub fn find_free_port_in(range: RangeInclusive<u16>) -> ServiceResult<u16> {
    let (start, end) = (*range.start(), *range.end());

    for port in range {
        if is_port_free(port) {
            tracing::debug!(port, "Found free port");
            return Ok(port);
        }
        tracing::trace!(port, "Port in use");
    }

    Err(ServiceError::NoPortAvailable { start, end })
}

/// Check whether `port` can currently be bound on the loopback interface.
pub fn is_port_free(port: u16) -> bool {
    // Port 0 would bind an ephemeral port and always succeed
    port != 0 && TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}
