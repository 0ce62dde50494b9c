//! Container Model and Lifecycle Events
//!
//! Read-only snapshots of the web container the node agent fronts, and the
//! typed event stream a container adapter feeds into the service. The core
//! never sees listener registration; it only consumes `ContainerEvent`s.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Protocol the proxy uses to reach the connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorType {
    #[default]
    Ajp,
    Http,
    Https,
}

impl ConnectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::Ajp => "ajp",
            ConnectorType::Http => "http",
            ConnectorType::Https => "https",
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The connector the proxy forwards requests to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSnapshot {
    pub address: IpAddr,
    pub port: u16,
    #[serde(default, rename = "type")]
    pub connector_type: ConnectorType,
    /// The node connects out to the proxy instead of listening
    #[serde(default)]
    pub reversed: bool,
    #[serde(default)]
    pub busy_threads: u32,
    #[serde(default)]
    pub max_threads: u32,
    #[serde(default)]
    pub bytes_sent: u64,
    #[serde(default)]
    pub bytes_received: u64,
    #[serde(default)]
    pub request_count: u64,
}

impl Default for ConnectorSnapshot {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8009,
            connector_type: ConnectorType::Ajp,
            reversed: false,
            busy_threads: 0,
            max_threads: 0,
            bytes_sent: 0,
            bytes_received: 0,
            request_count: 0,
        }
    }
}

/// A deployed web application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Owning engine name
    pub engine: String,
    /// Owning host name
    pub host: String,
    /// Context path; empty or `/` is the root context
    pub path: String,
    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub distributable: bool,
}

impl ContextSnapshot {
    /// Path as sent in the `Context` parameter
    pub fn wire_path(&self) -> &str {
        if self.path.is_empty() {
            "/"
        } else {
            &self.path
        }
    }
}

/// A virtual host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub name: String,
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    #[serde(default)]
    pub contexts: Vec<ContextSnapshot>,
}

impl HostSnapshot {
    /// Host name plus aliases, the set the proxy records for this host
    pub fn all_aliases(&self) -> BTreeSet<String> {
        let mut aliases = self.aliases.clone();
        aliases.insert(self.name.clone());
        aliases
    }

    pub fn context(&self, path: &str) -> Option<&ContextSnapshot> {
        self.contexts.iter().find(|c| c.wire_path() == normalize_path(path))
    }
}

/// One engine: a jvmRoute with its hosts and proxy connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub name: String,
    /// Empty until assigned; the service generates one when missing
    #[serde(default)]
    pub jvm_route: String,
    #[serde(default)]
    pub default_host: Option<String>,
    #[serde(default)]
    pub hosts: Vec<HostSnapshot>,
    #[serde(default)]
    pub connector: ConnectorSnapshot,
}

impl EngineSnapshot {
    pub fn host(&self, name: &str) -> Option<&HostSnapshot> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn contexts(&self) -> impl Iterator<Item = &ContextSnapshot> {
        self.hosts.iter().flat_map(|h| h.contexts.iter())
    }
}

/// The whole server
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerSnapshot {
    #[serde(default)]
    pub engines: Vec<EngineSnapshot>,
}

impl ServerSnapshot {
    pub fn engine(&self, name: &str) -> Option<&EngineSnapshot> {
        self.engines.iter().find(|e| e.name == name)
    }
}

/// Lifecycle events emitted by a container adapter
#[derive(Debug, Clone)]
pub enum ContainerEvent {
    Init(ServerSnapshot),
    Start(ServerSnapshot),
    StartEngine(EngineSnapshot),
    Stop(ServerSnapshot),
    ContextAdded(ContextSnapshot),
    ContextRemoved(ContextSnapshot),
    ContextStarted(ContextSnapshot),
    ContextStopped(ContextSnapshot),
    /// Fresh engine metrics; runs one status cycle for that engine
    Status(EngineSnapshot),
    /// Status cycle for every known engine
    PeriodicTick,
    Shutdown,
}

/// `""` and `"/"` both name the root context
pub fn normalize_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_context_paths() {
        let context = ContextSnapshot {
            engine: "catalina".into(),
            host: "localhost".into(),
            path: String::new(),
            started: true,
            distributable: false,
        };
        assert_eq!(context.wire_path(), "/");

        let host = HostSnapshot {
            name: "localhost".into(),
            aliases: BTreeSet::new(),
            contexts: vec![context],
        };
        assert!(host.context("/").is_some());
        assert!(host.context("").is_some());
    }

    #[test]
    fn test_all_aliases_includes_name() {
        let host = HostSnapshot {
            name: "localhost".into(),
            aliases: ["example.com".to_string()].into_iter().collect(),
            contexts: Vec::new(),
        };
        let aliases: Vec<_> = host.all_aliases().into_iter().collect();
        assert_eq!(aliases, vec!["example.com".to_string(), "localhost".to_string()]);
    }
}
