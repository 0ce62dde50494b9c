//! Node registry
//!
//! Authoritative copy of the container state the proxies are reconciled
//! against. Lifecycle events mutate it; the reset request source and the
//! service read engines from it through `engines()`, which applies two
//! fix-ups on the way out:
//!
//! - an unspecified connector address (`0.0.0.0`, `::`) is replaced by the
//!   local address proxies see once the first connection is established
//! - an engine without a jvmRoute gets `<address>:<port>:<engine>`

use parking_lot::RwLock;
use std::net::IpAddr;
use tracing::{debug, info};

use crate::container::{normalize_path, ContextSnapshot, EngineSnapshot, ServerSnapshot};
use crate::handler::ConnectionListener;

/// One `excluded_contexts` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedContext {
    /// `None` excludes the path on every host
    pub host: Option<String>,
    pub path: String,
}

impl ExcludedContext {
    /// Parse `[host:]path`; `ROOT` names the root context
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }
        let (host, path) = match entry.split_once(':') {
            Some((host, path)) => (Some(host.trim().to_string()), path.trim()),
            None => (None, entry),
        };
        let path = match path {
            "ROOT" | "" | "/" => "/".to_string(),
            path if path.starts_with('/') => path.to_string(),
            path => format!("/{}", path),
        };
        Some(Self { host, path })
    }

    pub fn matches(&self, host: &str, path: &str) -> bool {
        self.path == normalize_path(path) && self.host.as_deref().map_or(true, |h| h == host)
    }
}

#[derive(Debug, Default)]
pub struct NodeRegistry {
    server: RwLock<ServerSnapshot>,
    excluded: Vec<ExcludedContext>,
    local_address: RwLock<Option<IpAddr>>,
}

impl NodeRegistry {
    pub fn new(excluded_contexts: &[String]) -> Self {
        Self {
            server: RwLock::new(ServerSnapshot::default()),
            excluded: excluded_contexts
                .iter()
                .filter_map(|entry| ExcludedContext::parse(entry))
                .collect(),
            local_address: RwLock::new(None),
        }
    }

    pub fn is_excluded(&self, host: &str, path: &str) -> bool {
        self.excluded.iter().any(|e| e.matches(host, path))
    }

    pub fn is_context_excluded(&self, context: &ContextSnapshot) -> bool {
        self.is_excluded(&context.host, &context.path)
    }

    /// Replace the whole server state
    pub fn replace(&self, server: ServerSnapshot) {
        let mut server = server;
        for engine in &mut server.engines {
            self.strip_excluded(engine);
        }
        debug!(engines = server.engines.len(), "Node registry replaced");
        *self.server.write() = server;
    }

    /// Insert or replace one engine
    pub fn upsert_engine(&self, mut engine: EngineSnapshot) {
        self.strip_excluded(&mut engine);
        let mut server = self.server.write();
        match server.engines.iter_mut().find(|e| e.name == engine.name) {
            Some(existing) => *existing = engine,
            None => server.engines.push(engine),
        }
    }

    /// Refresh connector metrics of a known engine
    pub fn update_connector(&self, engine: &EngineSnapshot) {
        let mut server = self.server.write();
        if let Some(existing) = server.engines.iter_mut().find(|e| e.name == engine.name) {
            existing.connector = engine.connector.clone();
        }
    }

    fn strip_excluded(&self, engine: &mut EngineSnapshot) {
        for host in &mut engine.hosts {
            let name = host.name.clone();
            host.contexts
                .retain(|context| !self.is_excluded(&name, &context.path));
        }
    }

    /// Record a context; false when excluded or its engine/host is unknown
    pub fn add_context(&self, context: &ContextSnapshot) -> bool {
        if self.is_context_excluded(context) {
            return false;
        }
        let mut server = self.server.write();
        let Some(host) = server
            .engines
            .iter_mut()
            .find(|e| e.name == context.engine)
            .and_then(|e| e.hosts.iter_mut().find(|h| h.name == context.host))
        else {
            return false;
        };

        let path = normalize_path(&context.path);
        match host.contexts.iter_mut().find(|c| c.wire_path() == path) {
            Some(existing) => *existing = context.clone(),
            None => host.contexts.push(context.clone()),
        }
        true
    }

    pub fn remove_context(&self, context: &ContextSnapshot) -> bool {
        let mut server = self.server.write();
        let path = normalize_path(&context.path);
        server
            .engines
            .iter_mut()
            .filter(|e| e.name == context.engine)
            .flat_map(|e| e.hosts.iter_mut())
            .filter(|h| h.name == context.host)
            .any(|host| {
                let before = host.contexts.len();
                host.contexts.retain(|c| c.wire_path() != path);
                host.contexts.len() != before
            })
    }

    pub fn set_context_started(&self, context: &ContextSnapshot, started: bool) -> bool {
        let mut updated = context.clone();
        updated.started = started;
        self.add_context(&updated)
    }

    /// Engines as they are announced to the proxies
    pub fn engines(&self) -> Vec<EngineSnapshot> {
        let local = *self.local_address.read();
        self.server
            .read()
            .engines
            .iter()
            .map(|engine| prepare(engine.clone(), local))
            .collect()
    }

    pub fn engine(&self, name: &str) -> Option<EngineSnapshot> {
        let local = *self.local_address.read();
        self.server
            .read()
            .engine(name)
            .map(|engine| prepare(engine.clone(), local))
    }

    /// The engine owning a context, as announced
    pub fn engine_for(&self, context: &ContextSnapshot) -> Option<EngineSnapshot> {
        self.engine(&context.engine)
    }

    pub fn local_address(&self) -> Option<IpAddr> {
        *self.local_address.read()
    }
}

impl ConnectionListener for NodeRegistry {
    fn connection_established(&self, local_address: IpAddr) {
        info!(local_address = %local_address, "Resolved node address");
        *self.local_address.write() = Some(local_address);
    }
}

fn prepare(mut engine: EngineSnapshot, local: Option<IpAddr>) -> EngineSnapshot {
    if engine.connector.address.is_unspecified() {
        if let Some(local) = local {
            engine.connector.address = local;
        }
    }
    if engine.jvm_route.is_empty() {
        engine.jvm_route = format!(
            "{}:{}:{}",
            engine.connector.address, engine.connector.port, engine.name
        );
    }
    engine
}
