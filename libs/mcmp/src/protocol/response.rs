//! MCMP response model

use modcluster_config::response;

use crate::{McmpError, Result};

/// Status line and headers of a proxy response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    /// `Type` header, set by the proxy on failures
    pub error_type: Option<String>,
    /// `Mess` header, set by the proxy on failures
    pub message: Option<String>,
    pub version: Option<String>,
    pub content_length: usize,
}

impl ResponseHead {
    /// Parse `HTTP/1.x <code> <text>`
    pub fn from_status_line(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.splitn(3, ' ');

        let protocol = parts.next().unwrap_or_default();
        if !protocol.starts_with("HTTP/") {
            return Err(McmpError::protocol(format!("Malformed status line: {:?}", line)));
        }

        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| McmpError::protocol(format!("Missing status code: {:?}", line)))?;

        Ok(Self {
            status,
            reason: parts.next().unwrap_or_default().to_string(),
            ..Default::default()
        })
    }

    /// Apply one header line. Unknown or malformed headers are ignored.
    pub fn apply_header(&mut self, line: &str) -> Result<()> {
        let Some((name, value)) = line.split_once(':') else {
            return Ok(());
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case(response::ERROR_TYPE) {
            self.error_type = Some(value.to_string());
        } else if name.eq_ignore_ascii_case(response::ERROR_MESSAGE) {
            self.message = Some(value.to_string());
        } else if name.eq_ignore_ascii_case(response::VERSION) {
            self.version = Some(value.to_string());
        } else if name.eq_ignore_ascii_case(response::CONTENT_LENGTH) {
            self.content_length = value.parse().map_err(|_| {
                McmpError::protocol(format!("Invalid Content-Length: {:?}", value))
            })?;
        }
        Ok(())
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// A complete response: head plus body text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McmpResponse {
    pub head: ResponseHead,
    pub body: String,
}

impl McmpResponse {
    pub fn status(&self) -> u16 {
        self.head.status
    }

    pub fn is_success(&self) -> bool {
        self.head.is_success()
    }

    /// Body on success, a `ProxyError` otherwise
    pub fn into_result(self) -> Result<String> {
        if self.head.is_success() {
            Ok(self.body)
        } else {
            Err(McmpError::proxy_error(
                self.head.status,
                self.head.error_type,
                self.head.message,
            ))
        }
    }
}
