//! MCMP request value types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{McmpError, Result};

/// MCMP command carried on the request line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    Config,
    EnableApp,
    DisableApp,
    StopApp,
    RemoveApp,
    Status,
    Info,
    Dump,
    Ping,
}

impl RequestType {
    pub const ALL: [RequestType; 9] = [
        RequestType::Config,
        RequestType::EnableApp,
        RequestType::DisableApp,
        RequestType::StopApp,
        RequestType::RemoveApp,
        RequestType::Status,
        RequestType::Info,
        RequestType::Dump,
        RequestType::Ping,
    ];

    /// Method name as the proxy expects it
    pub fn command(&self) -> &'static str {
        match self {
            RequestType::Config => "CONFIG",
            RequestType::EnableApp => "ENABLE-APP",
            RequestType::DisableApp => "DISABLE-APP",
            RequestType::StopApp => "STOP-APP",
            RequestType::RemoveApp => "REMOVE-APP",
            RequestType::Status => "STATUS",
            RequestType::Info => "INFO",
            RequestType::Dump => "DUMP",
            RequestType::Ping => "PING",
        }
    }

    /// A successful exchange of this type registers the node on the proxy
    pub fn establishes_server(&self) -> bool {
        matches!(self, RequestType::Config)
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

impl FromStr for RequestType {
    type Err = McmpError;

    fn from_str(s: &str) -> Result<Self> {
        RequestType::ALL
            .iter()
            .copied()
            .find(|t| t.command() == s)
            .ok_or_else(|| McmpError::protocol(format!("Unknown MCMP command: {}", s)))
    }
}

/// One management request. Immutable once built.
///
/// Parameters keep insertion order; setting an existing name replaces its
/// value in place so names stay unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McmpRequest {
    request_type: RequestType,
    wildcard: bool,
    jvm_route: Option<String>,
    parameters: Vec<(String, String)>,
}

impl McmpRequest {
    pub fn new(request_type: RequestType, wildcard: bool, jvm_route: Option<String>) -> Self {
        Self {
            request_type,
            wildcard,
            jvm_route,
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.parameters.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.parameters.push((name, value)),
        }
        self
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    /// Whether the request targets the whole engine rather than one context
    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn jvm_route(&self) -> Option<&str> {
        self.jvm_route.as_deref()
    }

    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for McmpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.request_type)?;
        if self.wildcard {
            f.write_str(" *")?;
        }
        if let Some(route) = &self.jvm_route {
            write!(f, " [{}]", route)?;
        }
        for (name, value) in &self.parameters {
            write!(f, " {}={}", name, value)?;
        }
        Ok(())
    }
}
