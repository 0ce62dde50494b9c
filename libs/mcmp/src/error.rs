//! MCMP Error Types
//!
//! Error handling for proxy connections, protocol exchanges, advertise
//! processing and startup configuration.
//!
//! Transport and protocol errors never escape a fan-out send: the handler
//! records them on the offending proxy and reports them per proxy. Only
//! configuration and argument errors surface to callers directly.

use std::net::SocketAddr;
use thiserror::Error;

/// Main MCMP error type
#[derive(Error, Debug)]
pub enum McmpError {
    /// Network connectivity errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connection management errors
    #[error("Connection error: {message} (remote: {remote_addr:?})")]
    Connection {
        message: String,
        remote_addr: Option<SocketAddr>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Malformed or unparsable data from the peer
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// The proxy answered with a non-200 status
    #[error("Proxy error {status}: {error_type:?}: {message:?}")]
    ProxyError {
        status: u16,
        error_type: Option<String>,
        message: Option<String>,
    },

    /// Configuration errors, fatal at startup
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Programmer-error input such as a malformed address string
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Socket operation exceeded the configured timeout
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

/// Result type alias for MCMP operations
pub type Result<T> = std::result::Result<T, McmpError>;

impl McmpError {
    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>, remote_addr: Option<SocketAddr>) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: Some(Box::new(source)),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a proxy error from a failed response
    pub fn proxy_error(status: u16, error_type: Option<String>, message: Option<String>) -> Self {
        Self::ProxyError {
            status,
            error_type,
            message,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Whether the proxy rejected the request syntax
    pub fn is_syntax_error(&self) -> bool {
        matches!(
            self,
            McmpError::ProxyError { error_type: Some(t), .. }
                if t == modcluster_config::response::SYNTAX_ERROR
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            McmpError::Network { .. } => "network",
            McmpError::Connection { .. } => "connection",
            McmpError::Protocol { .. } => "protocol",
            McmpError::ProxyError { .. } => "proxy",
            McmpError::Configuration { .. } => "configuration",
            McmpError::InvalidArgument { .. } => "invalid_argument",
            McmpError::Timeout { .. } => "timeout",
            McmpError::Io { .. } => "io",
        }
    }
}

// Box<dyn Error> sources are dropped on clone
impl Clone for McmpError {
    fn clone(&self) -> Self {
        match self {
            McmpError::Network { message, .. } => McmpError::Network {
                message: message.clone(),
                source: None,
            },
            McmpError::Connection {
                message,
                remote_addr,
                ..
            } => McmpError::Connection {
                message: message.clone(),
                remote_addr: *remote_addr,
                source: None,
            },
            McmpError::Protocol { message } => McmpError::Protocol {
                message: message.clone(),
            },
            McmpError::ProxyError {
                status,
                error_type,
                message,
            } => McmpError::ProxyError {
                status: *status,
                error_type: error_type.clone(),
                message: message.clone(),
            },
            McmpError::Configuration { message, field } => McmpError::Configuration {
                message: message.clone(),
                field: field.clone(),
            },
            McmpError::InvalidArgument { message } => McmpError::InvalidArgument {
                message: message.clone(),
            },
            McmpError::Timeout {
                operation,
                timeout_ms,
            } => McmpError::Timeout {
                operation: operation.clone(),
                timeout_ms: *timeout_ms,
            },
            McmpError::Io { message, source } => McmpError::Io {
                message: message.clone(),
                source: std::io::Error::new(source.kind(), message.as_str()),
            },
        }
    }
}

/// Convert standard I/O errors
impl From<std::io::Error> for McmpError {
    fn from(error: std::io::Error) -> Self {
        McmpError::Io {
            message: error.to_string(),
            source: error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_error_construction() {
        let err = McmpError::network("Connection refused");
        assert_eq!(err.category(), "network");
    }

    #[test]
    fn test_connection_error() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), 6666);
        let err = McmpError::connection("Handshake failed", Some(addr));

        match err {
            McmpError::Connection { remote_addr, .. } => {
                assert_eq!(remote_addr, Some(addr));
            }
            _ => panic!("Expected Connection error"),
        }
    }

    #[test]
    fn test_only_syntax_type_is_a_syntax_error() {
        let syntax = McmpError::proxy_error(500, Some("SYNTAX".to_string()), None);
        let mem = McmpError::proxy_error(500, Some("MEM".to_string()), None);

        assert!(syntax.is_syntax_error());
        assert!(!mem.is_syntax_error());
        assert!(!McmpError::proxy_error(500, None, None).is_syntax_error());
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            McmpError::configuration("bad group", Some("group_address")).category(),
            "configuration"
        );
        assert_eq!(McmpError::invalid_argument("bad address").category(), "invalid_argument");
        assert_eq!(McmpError::timeout("read", 20_000).category(), "timeout");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = McmpError::from(io_err);

        match err.clone() {
            McmpError::Io { message, source } => {
                assert!(message.contains("refused"));
                assert_eq!(source.kind(), std::io::ErrorKind::ConnectionRefused);
            }
            _ => panic!("Expected Io error"),
        }
    }
}
