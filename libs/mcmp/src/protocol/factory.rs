//! Request factory
//!
//! Builds every MCMP request from container snapshots plus the node and
//! balancer configuration. Optional node settings are only sent when
//! configured; balancer settings are only sent when they differ from the
//! proxy's own defaults.

use modcluster_config::{params, service, BalancerConfig, FlushPackets, NodeConfig};
use std::collections::BTreeSet;

use super::request::{McmpRequest, RequestType};
use crate::container::{ContextSnapshot, EngineSnapshot};

#[derive(Debug, Clone, Default)]
pub struct RequestFactory {
    node: NodeConfig,
    balancer: BalancerConfig,
}

impl RequestFactory {
    pub fn new(node: NodeConfig, balancer: BalancerConfig) -> Self {
        Self { node, balancer }
    }

    /// Full CONFIG for an engine: connector, node and balancer parameters
    pub fn config(&self, engine: &EngineSnapshot) -> McmpRequest {
        let connector = &engine.connector;
        let mut request = McmpRequest::new(RequestType::Config, false, Some(engine.jvm_route.clone()))
            .with_parameter(params::HOST, connector.address.to_string())
            .with_parameter(params::PORT, connector.port.to_string())
            .with_parameter(params::TYPE, connector.connector_type.as_str());

        if connector.reversed {
            request = request.with_parameter(params::REVERSED, "true");
        }

        let node = &self.node;
        if let Some(domain) = &node.domain {
            request = request.with_parameter(params::DOMAIN, domain);
        }
        if node.flush_packets != FlushPackets::Off {
            request = request.with_parameter(params::FLUSH_PACKETS, node.flush_packets.as_str());
        }
        for (name, value) in [
            (params::FLUSH_WAIT, node.flush_wait),
            (params::PING, node.ping),
            (params::SMAX, node.smax),
            (params::TTL, node.ttl),
            (params::TIMEOUT, node.node_timeout),
        ] {
            if let Some(value) = value {
                request = request.with_parameter(name, value.to_string());
            }
        }
        if let Some(balancer) = &node.balancer {
            request = request.with_parameter(params::BALANCER, balancer);
        }

        let balancer = &self.balancer;
        if !balancer.sticky_session {
            request = request.with_parameter(params::STICKY_SESSION, "No");
        }
        if balancer.sticky_session_cookie != service::node::STICKY_SESSION_COOKIE {
            request = request
                .with_parameter(params::STICKY_SESSION_COOKIE, &balancer.sticky_session_cookie);
        }
        if balancer.sticky_session_path != service::node::STICKY_SESSION_PATH {
            request =
                request.with_parameter(params::STICKY_SESSION_PATH, &balancer.sticky_session_path);
        }
        if balancer.sticky_session_remove {
            request = request.with_parameter(params::STICKY_SESSION_REMOVE, "Yes");
        }
        if !balancer.sticky_session_force {
            request = request.with_parameter(params::STICKY_SESSION_FORCE, "No");
        }
        if let Some(timeout) = balancer.worker_timeout {
            request = request.with_parameter(params::WAIT_WORKER, timeout.to_string());
        }
        if let Some(attempts) = balancer.max_attempts {
            request = request.with_parameter(params::MAX_ATTEMPTS, attempts.to_string());
        }

        request
    }

    /// Engine-wide request (`<COMMAND> /*`)
    pub fn engine_request(&self, request_type: RequestType, engine: &EngineSnapshot) -> McmpRequest {
        McmpRequest::new(request_type, true, Some(engine.jvm_route.clone()))
    }

    /// `REMOVE-APP *`: drop everything the proxy knows about the engine
    pub fn remove_all(&self, engine: &EngineSnapshot) -> McmpRequest {
        self.engine_request(RequestType::RemoveApp, engine)
    }

    /// Per-context request, aliases taken from the context's host
    pub fn context_request(
        &self,
        request_type: RequestType,
        engine: &EngineSnapshot,
        context: &ContextSnapshot,
    ) -> McmpRequest {
        let aliases = engine
            .host(&context.host)
            .map(|host| host.all_aliases())
            .unwrap_or_else(|| BTreeSet::from([context.host.clone()]));
        self.context_request_for(request_type, &engine.jvm_route, &aliases, context.wire_path())
    }

    pub fn context_request_for(
        &self,
        request_type: RequestType,
        jvm_route: &str,
        aliases: &BTreeSet<String>,
        path: &str,
    ) -> McmpRequest {
        let alias = aliases.iter().map(String::as_str).collect::<Vec<_>>().join(",");
        McmpRequest::new(request_type, false, Some(jvm_route.to_string()))
            .with_parameter(params::CONTEXT, path)
            .with_parameter(params::ALIAS, alias)
    }

    pub fn status(&self, jvm_route: &str, load_balance_factor: i32) -> McmpRequest {
        McmpRequest::new(RequestType::Status, false, Some(jvm_route.to_string()))
            .with_parameter(params::LOAD, load_balance_factor.to_string())
    }

    pub fn info(&self) -> McmpRequest {
        McmpRequest::new(RequestType::Info, false, None)
    }

    pub fn dump(&self) -> McmpRequest {
        McmpRequest::new(RequestType::Dump, false, None)
    }

    /// Ping the proxy itself, or one node when `jvm_route` is given
    pub fn ping(&self, jvm_route: Option<&str>) -> McmpRequest {
        McmpRequest::new(RequestType::Ping, false, jvm_route.map(str::to_string))
    }

    /// Ask the proxy to probe an arbitrary backend URL
    pub fn ping_url(&self, scheme: &str, host: &str, port: u16) -> McmpRequest {
        McmpRequest::new(RequestType::Ping, false, None)
            .with_parameter(params::SCHEME, scheme)
            .with_parameter(params::HOST, host)
            .with_parameter(params::PORT, port.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ConnectorSnapshot, ConnectorType, HostSnapshot};

    fn engine() -> EngineSnapshot {
        EngineSnapshot {
            name: "catalina".into(),
            jvm_route: "node1".into(),
            default_host: Some("localhost".into()),
            hosts: vec![HostSnapshot {
                name: "localhost".into(),
                aliases: BTreeSet::from(["example.com".to_string()]),
                contexts: vec![ContextSnapshot {
                    engine: "catalina".into(),
                    host: "localhost".into(),
                    path: "/app".into(),
                    started: true,
                    distributable: false,
                }],
            }],
            connector: ConnectorSnapshot {
                address: "10.0.0.1".parse().unwrap(),
                port: 8009,
                connector_type: ConnectorType::Ajp,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_default_config_request() {
        let request = RequestFactory::default().config(&engine());
        let names: Vec<&str> = request.parameters().iter().map(|(n, _)| n.as_str()).collect();

        assert_eq!(request.jvm_route(), Some("node1"));
        assert_eq!(names, vec!["Host", "Port", "Type"]);
        assert_eq!(request.parameter("Host"), Some("10.0.0.1"));
    }

    #[test]
    fn test_config_request_with_tuning() {
        let node = NodeConfig {
            domain: Some("dc1".into()),
            flush_packets: FlushPackets::On,
            ping: Some(10),
            ttl: Some(60),
            balancer: Some("mycluster".into()),
            ..Default::default()
        };
        let balancer = BalancerConfig {
            sticky_session: false,
            sticky_session_force: false,
            max_attempts: Some(3),
            ..Default::default()
        };
        let request = RequestFactory::new(node, balancer).config(&engine());

        assert_eq!(request.parameter("Domain"), Some("dc1"));
        assert_eq!(request.parameter("flushpackets"), Some("On"));
        assert_eq!(request.parameter("ping"), Some("10"));
        assert_eq!(request.parameter("ttl"), Some("60"));
        assert_eq!(request.parameter("smax"), None);
        assert_eq!(request.parameter("Balancer"), Some("mycluster"));
        assert_eq!(request.parameter("StickySession"), Some("No"));
        assert_eq!(request.parameter("StickySessionForce"), Some("No"));
        assert_eq!(request.parameter("StickySessionCookie"), None);
        assert_eq!(request.parameter("Maxattempts"), Some("3"));
    }

    #[test]
    fn test_context_request_carries_aliases() {
        let engine = engine();
        let context = engine.contexts().next().unwrap().clone();
        let request = RequestFactory::default().context_request(RequestType::EnableApp, &engine, &context);

        assert!(!request.is_wildcard());
        assert_eq!(request.parameter("Context"), Some("/app"));
        assert_eq!(request.parameter("Alias"), Some("example.com,localhost"));
    }

    #[test]
    fn test_status_and_ping() {
        let factory = RequestFactory::default();
        assert_eq!(factory.status("node1", 42).parameter("Load"), Some("42"));
        assert_eq!(factory.ping(None).jvm_route(), None);
        assert_eq!(factory.ping_url("ajp", "10.0.0.9", 8009).parameter("Scheme"), Some("ajp"));
        assert!(factory.remove_all(&engine()).is_wildcard());
    }
}
