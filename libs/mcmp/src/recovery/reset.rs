//! Reconciliation of proxy-reported state against the node registry
//!
//! Per engine the output is one of two shapes:
//!
//! ```text
//! full reset:  REMOVE-APP *, CONFIG, ENABLE-APP for every started context
//! correction:  CONFIG, REMOVE-APP per obsolete context, ENABLE/STOP fixes
//! ```
//!
//! A full reset is chosen when the proxy has no record of the jvmRoute, when a
//! reported virtual host matches no local host, when alias sets disagree, or
//! when every context the proxy reports for a host is obsolete.

use std::sync::Arc;
use tracing::debug;

use super::registry::NodeRegistry;
use super::ResetRequestSource;
use crate::container::{EngineSnapshot, HostSnapshot};
use crate::protocol::{ContextStatus, McmpRequest, ProxyInfo, RequestFactory, RequestType, VirtualHost};

pub struct DefaultResetRequestSource {
    registry: Arc<NodeRegistry>,
    factory: RequestFactory,
}

impl DefaultResetRequestSource {
    pub fn new(registry: Arc<NodeRegistry>, factory: RequestFactory) -> Self {
        Self { registry, factory }
    }

    fn engine_requests(&self, engine: &EngineSnapshot, reported: Option<&[VirtualHost]>) -> Vec<McmpRequest> {
        match reported.and_then(|hosts| self.corrections(engine, hosts)) {
            Some(corrections) => {
                let mut requests = Vec::with_capacity(corrections.len() + 1);
                requests.push(self.factory.config(engine));
                requests.extend(corrections);
                requests
            }
            None => {
                debug!(jvm_route = %engine.jvm_route, "Proxy state diverged, resetting engine");
                let mut requests = vec![self.factory.remove_all(engine), self.factory.config(engine)];
                requests.extend(
                    engine
                        .contexts()
                        .filter(|context| context.started)
                        .filter(|context| !self.registry.is_context_excluded(context))
                        .map(|context| {
                            self.factory.context_request(RequestType::EnableApp, engine, context)
                        }),
                );
                requests
            }
        }
    }

    /// Individual corrections, or `None` when the engine needs a full reset
    fn corrections(&self, engine: &EngineSnapshot, reported: &[VirtualHost]) -> Option<Vec<McmpRequest>> {
        let mut removals = Vec::new();

        for vhost in reported {
            let host = engine.hosts.iter().find(|h| vhost.aliases.contains(&h.name))?;
            let aliases = host.all_aliases();
            if aliases != vhost.aliases {
                return None;
            }

            let obsolete: Vec<&String> = vhost
                .contexts
                .keys()
                .filter(|path| !self.is_live(host, path))
                .collect();
            if !obsolete.is_empty() && obsolete.len() == vhost.contexts.len() {
                return None;
            }
            removals.extend(obsolete.into_iter().map(|path| {
                self.factory
                    .context_request_for(RequestType::RemoveApp, &engine.jvm_route, &aliases, path)
            }));
        }

        let mut updates = Vec::new();
        for host in &engine.hosts {
            let vhost = reported.iter().find(|v| v.aliases.contains(&host.name));
            for context in host
                .contexts
                .iter()
                .filter(|context| !self.registry.is_context_excluded(context))
            {
                let status = vhost.and_then(|v| v.contexts.get(context.wire_path()));
                let request_type = match (context.started, status) {
                    (true, Some(ContextStatus::Enabled)) => continue,
                    (true, _) => RequestType::EnableApp,
                    (false, Some(ContextStatus::Enabled)) => RequestType::StopApp,
                    (false, _) => continue,
                };
                updates.push(self.factory.context_request(request_type, engine, context));
            }
        }

        removals.extend(updates);
        Some(removals)
    }

    fn is_live(&self, host: &HostSnapshot, path: &str) -> bool {
        host.context(path)
            .is_some_and(|context| !self.registry.is_context_excluded(context))
    }
}

impl ResetRequestSource for DefaultResetRequestSource {
    fn reset_requests(&self, info: &ProxyInfo) -> Vec<McmpRequest> {
        self.registry
            .engines()
            .iter()
            .flat_map(|engine| {
                self.engine_requests(engine, info.get(&engine.jvm_route).map(Vec::as_slice))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ConnectorSnapshot, ContextSnapshot, ServerSnapshot};
    use std::collections::{BTreeMap, BTreeSet};

    fn context(path: &str, started: bool) -> ContextSnapshot {
        ContextSnapshot {
            engine: "e1".into(),
            host: "a".into(),
            path: path.into(),
            started,
            distributable: false,
        }
    }

    fn source(aliases: &[&str], contexts: Vec<ContextSnapshot>) -> DefaultResetRequestSource {
        let registry = Arc::new(NodeRegistry::new(&[]));
        registry.replace(ServerSnapshot {
            engines: vec![EngineSnapshot {
                name: "e1".into(),
                jvm_route: "node1".into(),
                default_host: Some("a".into()),
                hosts: vec![HostSnapshot {
                    name: "a".into(),
                    aliases: aliases.iter().map(|s| s.to_string()).collect(),
                    contexts,
                }],
                connector: ConnectorSnapshot {
                    address: "10.0.0.1".parse().unwrap(),
                    ..Default::default()
                },
            }],
        });
        DefaultResetRequestSource::new(registry, RequestFactory::default())
    }

    fn reported(aliases: &[&str], contexts: &[(&str, ContextStatus)]) -> ProxyInfo {
        let vhost = VirtualHost {
            aliases: aliases.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            contexts: contexts
                .iter()
                .map(|(p, s)| (p.to_string(), *s))
                .collect::<BTreeMap<_, _>>(),
        };
        ProxyInfo::from([("node1".to_string(), vec![vhost])])
    }

    fn summary(requests: &[McmpRequest]) -> Vec<String> {
        requests
            .iter()
            .map(|r| match (r.is_wildcard(), r.parameter("Context")) {
                (true, _) => format!("{} *", r.request_type()),
                (false, Some(path)) => format!("{} {}", r.request_type(), path),
                (false, None) => r.request_type().to_string(),
            })
            .collect()
    }

    #[test]
    fn test_unknown_route_resets_engine() {
        let source = source(&["b"], vec![context("/app", true), context("/off", false)]);
        let requests = source.reset_requests(&ProxyInfo::new());
        assert_eq!(summary(&requests), vec!["REMOVE-APP *", "CONFIG", "ENABLE-APP /app"]);
    }

    #[test]
    fn test_alias_mismatch_resets_engine() {
        let source = source(&["b", "c"], vec![context("/app", true)]);
        let info = reported(&["a", "b"], &[("/app", ContextStatus::Enabled)]);

        let requests = source.reset_requests(&info);
        assert_eq!(summary(&requests)[0], "REMOVE-APP *");
    }

    #[test]
    fn test_unmatched_vhost_resets_engine() {
        let source = source(&[], vec![context("/app", true)]);
        let info = reported(&["elsewhere"], &[]);
        assert_eq!(summary(&source.reset_requests(&info))[0], "REMOVE-APP *");
    }

    #[test]
    fn test_all_contexts_obsolete_resets_engine() {
        let source = source(&[], vec![]);
        let info = reported(&["a"], &[("/old", ContextStatus::Enabled)]);

        let requests = source.reset_requests(&info);
        assert_eq!(summary(&requests), vec!["REMOVE-APP *", "CONFIG"]);
    }

    #[test]
    fn test_individual_corrections() {
        let source = source(
            &["b"],
            vec![context("/app", true), context("/idle", false), context("/new", true)],
        );
        let info = reported(
            &["a", "b"],
            &[
                ("/app", ContextStatus::Disabled),
                ("/idle", ContextStatus::Enabled),
                ("/old", ContextStatus::Enabled),
            ],
        );

        let requests = source.reset_requests(&info);
        assert_eq!(
            summary(&requests),
            vec![
                "CONFIG",
                "REMOVE-APP /old",
                "ENABLE-APP /app",
                "STOP-APP /idle",
                "ENABLE-APP /new",
            ]
        );
        assert_eq!(requests[1].parameter("Alias"), Some("a,b"));
    }

    #[test]
    fn test_in_sync_engine_only_gets_config() {
        let source = source(&[], vec![context("/app", true), context("/", false)]);
        let info = reported(
            &["a"],
            &[("/app", ContextStatus::Enabled), ("/", ContextStatus::Stopped)],
        );
        assert_eq!(summary(&source.reset_requests(&info)), vec!["CONFIG"]);
    }
}
