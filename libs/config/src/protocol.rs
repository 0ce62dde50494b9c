//! MCMP and advertise protocol constants
//!
//! Literal names used on the wire. The proxy module matches these verbatim,
//! so they must not be re-cased.

/// User agent sent with every MCMP request
pub const USER_AGENT: &str = "ClusterListener/1.0";

/// Content type of the MCMP request body
pub const CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Parameter carrying the node identity
pub const JVM_ROUTE: &str = "JVMRoute";

/// Request parameter names
pub mod params {
    pub const HOST: &str = "Host";
    pub const PORT: &str = "Port";
    pub const TYPE: &str = "Type";
    pub const REVERSED: &str = "Reversed";
    pub const DOMAIN: &str = "Domain";
    pub const FLUSH_PACKETS: &str = "flushpackets";
    pub const FLUSH_WAIT: &str = "flushwait";
    pub const PING: &str = "ping";
    pub const SMAX: &str = "smax";
    pub const TTL: &str = "ttl";
    pub const TIMEOUT: &str = "Timeout";
    pub const BALANCER: &str = "Balancer";
    pub const STICKY_SESSION: &str = "StickySession";
    pub const STICKY_SESSION_COOKIE: &str = "StickySessionCookie";
    pub const STICKY_SESSION_PATH: &str = "StickySessionPath";
    pub const STICKY_SESSION_REMOVE: &str = "StickySessionRemove";
    pub const STICKY_SESSION_FORCE: &str = "StickySessionForce";
    pub const WAIT_WORKER: &str = "WaitWorker";
    pub const MAX_ATTEMPTS: &str = "Maxattempts";
    pub const CONTEXT: &str = "Context";
    pub const ALIAS: &str = "Alias";
    pub const LOAD: &str = "Load";
    pub const SCHEME: &str = "Scheme";
}

/// Response headers the proxy uses to describe a failure
pub mod response {
    pub const ERROR_TYPE: &str = "Type";
    pub const ERROR_MESSAGE: &str = "Mess";
    pub const VERSION: &str = "Version";
    pub const CONTENT_LENGTH: &str = "Content-Length";

    /// Error type that quarantines a proxy until an explicit reset
    pub const SYNTAX_ERROR: &str = "SYNTAX";
}

/// Advertise datagram headers
pub mod advertise {
    pub const DATE: &str = "Date";
    pub const DIGEST: &str = "Digest";
    pub const SEQUENCE: &str = "Sequence";
    pub const SERVER: &str = "Server";
    pub const MANAGER_ADDRESS: &str = "X-Manager-Address";

    /// Status line prefix every advertise datagram starts with
    pub const STATUS_LINE_PREFIX: &str = "HTTP/1.";

    /// Largest datagram the proxy emits
    pub const MAX_DATAGRAM_SIZE: usize = 512;
}
