//! Multicast UDP socket for advertise datagrams
//!
//! On Linux and macOS the socket is bound to the group address itself so only
//! traffic for that group is delivered; when that bind fails the socket falls
//! back to the wildcard address on the same port. Other platforms always bind
//! the wildcard address. Address and port reuse are enabled so several nodes
//! on one host can listen to the same group.

use bytes::Bytes;
use modcluster_config::advertise::MAX_DATAGRAM_SIZE;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::{McmpError, Result};

/// Receive statistics
#[derive(Debug, Clone, Default)]
pub struct UdpStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub errors: u64,
    pub last_activity: Option<Instant>,
}

/// A UDP socket joined to one multicast group
pub struct MulticastSocket {
    socket: UdpSocket,
    group: SocketAddr,
    interface: Option<IpAddr>,
    stats: Mutex<UdpStats>,
}

impl MulticastSocket {
    /// Bind to `group` and join it on `interface` (any interface when `None`)
    pub async fn bind(group: SocketAddr, interface: Option<IpAddr>) -> Result<Self> {
        if !group.ip().is_multicast() {
            return Err(McmpError::configuration(
                format!("{} is not a multicast address", group.ip()),
                Some("group_address"),
            ));
        }

        let socket = Self::bind_socket(group)?;

        match (group.ip(), interface) {
            (IpAddr::V4(address), interface) => {
                let interface = match interface {
                    Some(IpAddr::V4(interface)) => interface,
                    Some(IpAddr::V6(_)) => {
                        return Err(McmpError::configuration(
                            "IPv4 group needs an IPv4 interface",
                            Some("interface"),
                        ))
                    }
                    None => Ipv4Addr::UNSPECIFIED,
                };
                socket.join_multicast_v4(address, interface).map_err(|e| {
                    McmpError::network_with_source(
                        format!("Failed to join multicast group {}", address),
                        e,
                    )
                })?;
            }
            (IpAddr::V6(address), _) => {
                socket.join_multicast_v6(&address, 0).map_err(|e| {
                    McmpError::network_with_source(
                        format!("Failed to join multicast group {}", address),
                        e,
                    )
                })?;
            }
        }

        info!("Joined multicast group: {}", group);

        Ok(Self {
            socket,
            group,
            interface,
            stats: Mutex::new(UdpStats::default()),
        })
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    fn bind_socket(group: SocketAddr) -> Result<UdpSocket> {
        match bind_shared(group) {
            Ok(socket) => Ok(socket),
            Err(e) => {
                info!(
                    "Could not bind to multicast group {} ({}), binding to port only",
                    group, e
                );
                Self::bind_wildcard(group)
            }
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn bind_socket(group: SocketAddr) -> Result<UdpSocket> {
        Self::bind_wildcard(group)
    }

    fn bind_wildcard(group: SocketAddr) -> Result<UdpSocket> {
        let any: IpAddr = if group.is_ipv4() {
            Ipv4Addr::UNSPECIFIED.into()
        } else {
            Ipv6Addr::UNSPECIFIED.into()
        };
        let address = SocketAddr::new(any, group.port());
        bind_shared(address).map_err(|e| {
            McmpError::network_with_source(format!("Failed to bind UDP socket on {}", address), e)
        })
    }

    pub fn group(&self) -> SocketAddr {
        self.group
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| McmpError::network_with_source("Failed to get local address", e))
    }

    /// Wait for the next datagram; payloads beyond the advertise limit are cut
    pub async fn recv(&self) -> Result<(Bytes, SocketAddr)> {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        match self.socket.recv_from(&mut buffer).await {
            Ok((len, from)) => {
                let mut stats = self.stats.lock();
                stats.packets_received += 1;
                stats.bytes_received += len as u64;
                stats.last_activity = Some(Instant::now());
                debug!("Received UDP datagram: {} bytes from {}", len, from);
                Ok((Bytes::copy_from_slice(&buffer[..len]), from))
            }
            Err(e) => {
                self.stats.lock().errors += 1;
                Err(McmpError::network_with_source("Failed to receive UDP datagram", e))
            }
        }
    }

    pub fn stats(&self) -> UdpStats {
        self.stats.lock().clone()
    }

    /// Leave the group; errors are logged since the socket is going away
    pub fn leave(&self) {
        let result = match (self.group.ip(), self.interface) {
            (IpAddr::V4(address), Some(IpAddr::V4(interface))) => {
                self.socket.leave_multicast_v4(address, interface)
            }
            (IpAddr::V4(address), _) => {
                self.socket.leave_multicast_v4(address, Ipv4Addr::UNSPECIFIED)
            }
            (IpAddr::V6(address), _) => self.socket.leave_multicast_v6(&address, 0),
        };
        if let Err(e) = result {
            warn!("Failed to leave multicast group {}: {}", self.group, e);
        }
    }
}

/// Non-blocking UDP socket bound with address (and on unix port) reuse
fn bind_shared(address: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(address), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&address.into())?;
    UdpSocket::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_two_listeners_share_a_group() {
        let loopback = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let first = MulticastSocket::bind("224.0.1.105:0".parse().unwrap(), loopback)
            .await
            .unwrap();
        let port = first.local_addr().unwrap().port();

        let group = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(224, 0, 1, 105)), port);
        let second = MulticastSocket::bind(group, loopback).await.unwrap();
        assert_eq!(second.local_addr().unwrap().port(), port);
        assert_eq!(second.group(), group);

        first.leave();
        second.leave();
    }

    #[tokio::test]
    async fn test_rejects_unicast_group() {
        let err = MulticastSocket::bind("127.0.0.1:0".parse().unwrap(), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McmpError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_rejects_mismatched_interface() {
        let result = MulticastSocket::bind(
            "224.0.1.105:0".parse().unwrap(),
            Some("::1".parse().unwrap()),
        )
        .await;
        assert!(matches!(result, Err(McmpError::Configuration { .. })));
    }
}
