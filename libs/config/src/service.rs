//! Service defaults
//!
//! Default values shared by the config structs and by the components that
//! fall back to them when a section is omitted.

use std::net::Ipv4Addr;

/// Proxy connection defaults
pub mod proxies {
    /// Port assumed when a proxy address has no explicit port
    pub const DEFAULT_PORT: u16 = 8000;

    /// Socket connect/read/write timeout (milliseconds)
    pub const SOCKET_TIMEOUT_MS: u64 = 20_000;
}

/// Advertise defaults
pub mod advertise {
    use super::Ipv4Addr;

    /// Multicast group httpd advertises on
    pub const GROUP_ADDRESS: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 105);

    /// Multicast port httpd advertises on
    pub const PORT: u16 = 23364;

    /// Pause after a receive error before the loop retries (milliseconds)
    pub const ERROR_BACKOFF_MS: u64 = 100;

    /// Upper bound on resolving an advertised manager hostname (milliseconds)
    pub const RESOLVE_TIMEOUT_MS: u64 = 5_000;
}

/// Node service defaults
pub mod node {
    /// Interval between periodic status ticks (seconds)
    pub const STATUS_INTERVAL_SECS: u64 = 10;

    /// Sticky session cookie the proxy assumes when none is sent
    pub const STICKY_SESSION_COOKIE: &str = "JSESSIONID";

    /// Sticky session path parameter the proxy assumes when none is sent
    pub const STICKY_SESSION_PATH: &str = "jsessionid";
}

/// Load balance factor defaults
pub mod load {
    /// Each older sample counts `1 / decay^age`
    pub const DECAY_FACTOR: f64 = 2.0;

    /// Number of samples kept per metric
    pub const HISTORY: usize = 9;

    /// Requests per second treated as full load by the request count metric
    pub const REQUEST_CAPACITY: f64 = 1000.0;
}
