//! Socket layer
//!
//! TCP keep-alive connections to proxies and the multicast socket the
//! advertise listener reads from.

pub mod tcp;
pub mod udp;

pub use tcp::ProxyConnection;
pub use udp::{MulticastSocket, UdpStats};
