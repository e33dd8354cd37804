//! LAN address discovery.
//!
//! The address shown to users is found by asking the OS which local interface it
//! would route through: an unconnected UDP socket is "connected" to an address in
//! a private range, which only selects a route and never sends a datagram. The
//! socket's local address is then the outward-facing interface address.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use tracing::debug;

/// Target used only to make the OS pick a source interface.
const PROBE_TARGET: (Ipv4Addr, u16) = (Ipv4Addr::new(10, 255, 255, 255), 1);

/// Best-effort LAN IPv4 address of this machine, `127.0.0.1` when none is found.
pub fn local_ipv4() -> Ipv4Addr {
    resolve_with(probe_route)
}

/// Runs `probe` and falls back to loopback on error, IPv6 or unspecified results.
pub fn resolve_with<F>(probe: F) -> Ipv4Addr
where
    F: FnOnce() -> io::Result<IpAddr>,
{
    match probe() {
        Ok(IpAddr::V4(ip)) if !ip.is_unspecified() => ip,
        Ok(other) => {
            debug!("Route probe returned unusable address {}", other);
            Ipv4Addr::LOCALHOST
        }
        Err(err) => {
            debug!("Route probe failed: {}", err);
            Ipv4Addr::LOCALHOST
        }
    }
}

fn probe_route() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
    socket.connect(PROBE_TARGET)?;
    Ok(socket.local_addr()?.ip())
}

/// Address to advertise for a listener bound to `bind`.
pub fn advertised_ipv4(bind: IpAddr) -> Ipv4Addr {
    match bind {
        IpAddr::V4(ip) if !ip.is_unspecified() => ip,
        IpAddr::V6(ip) if ip.is_loopback() => Ipv4Addr::LOCALHOST,
        _ => local_ipv4(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_probe_failure_falls_back_to_loopback() {
        let ip = resolve_with(|| Err(io::Error::from(io::ErrorKind::NetworkUnreachable)));
        assert_eq!(ip, Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_unusable_results_fall_back_to_loopback() {
        assert_eq!(
            resolve_with(|| Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED))),
            Ipv4Addr::LOCALHOST
        );
        assert_eq!(
            resolve_with(|| Ok(IpAddr::V6(Ipv6Addr::LOCALHOST))),
            Ipv4Addr::LOCALHOST
        );
    }

    #[test]
    fn test_probe_result_is_used() {
        let lan = Ipv4Addr::new(192, 168, 1, 42);
        assert_eq!(resolve_with(|| Ok(IpAddr::V4(lan))), lan);
    }

    #[test]
    fn test_local_ipv4_never_unspecified() {
        // Works with or without a network; sandboxes yield loopback.
        assert!(!local_ipv4().is_unspecified());
    }

    #[test]
    fn test_advertised_ipv4_prefers_concrete_bind() {
        assert_eq!(
            advertised_ipv4(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            Ipv4Addr::LOCALHOST
        );
        assert_eq!(
            advertised_ipv4(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))),
            Ipv4Addr::new(10, 0, 0, 7)
        );
        assert!(!advertised_ipv4(IpAddr::V4(Ipv4Addr::UNSPECIFIED)).is_unspecified());
    }
}
