//! Node Service
//!
//! Glue between a container adapter and the proxies. The adapter reports
//! lifecycle changes (directly or as a `ContainerEvent` stream); the service
//! keeps the node registry current and turns each change into MCMP requests
//! for every healthy proxy. Administrative operations report per-proxy
//! outcomes instead of failing as a whole.

use modcluster_config::ModClusterConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::advertise::AdvertiseListener;
use crate::container::{ContainerEvent, ContextSnapshot, EngineSnapshot, ServerSnapshot};
use crate::handler::{ConnectionListener, McmpHandler, ProxyDiscovery};
use crate::load::{provider_from_config, LoadBalanceFactorProvider};
use crate::protocol::{parse_dump, DumpRecord, McmpRequest, RequestFactory, RequestType};
use crate::proxy::ProxyIdentity;
use crate::recovery::{DefaultResetRequestSource, NodeRegistry};
use crate::{McmpError, Result};

/// Per-proxy success of an administrative operation
pub type ProxyOutcomes = HashMap<ProxyIdentity, bool>;

pub struct ModClusterService {
    registry: Arc<NodeRegistry>,
    handler: Arc<McmpHandler>,
    factory: RequestFactory,
    load_provider: Arc<dyn LoadBalanceFactorProvider>,
    advertise: Option<AdvertiseListener>,
    auto_enable_contexts: bool,
}

impl ModClusterService {
    /// Wire the components from configuration. Bad proxy addresses and
    /// advertise settings fail here.
    pub fn new(config: &ModClusterConfig) -> Result<Self> {
        let registry = Arc::new(NodeRegistry::new(&config.service.excluded_contexts));
        let factory = RequestFactory::new(config.node.clone(), config.balancer.clone());
        let reset_source = Arc::new(DefaultResetRequestSource::new(
            Arc::clone(&registry),
            factory.clone(),
        ));
        let listener: Arc<dyn ConnectionListener> = registry.clone();
        let handler = Arc::new(McmpHandler::new(
            &config.proxies,
            reset_source,
            Some(listener),
        )?);

        let advertise = if config.advertise.is_enabled(&config.proxies) {
            let discovery: Arc<dyn ProxyDiscovery> = handler.clone();
            Some(AdvertiseListener::new(&config.advertise, discovery)?)
        } else {
            None
        };

        Ok(Self {
            registry,
            handler,
            factory,
            load_provider: provider_from_config(&config.load),
            advertise,
            auto_enable_contexts: config.service.auto_enable_contexts,
        })
    }

    pub fn with_load_provider(mut self, provider: Arc<dyn LoadBalanceFactorProvider>) -> Self {
        self.load_provider = provider;
        self
    }

    pub fn handler(&self) -> &Arc<McmpHandler> {
        &self.handler
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn advertise(&self) -> Option<&AdvertiseListener> {
        self.advertise.as_ref()
    }

    // Lifecycle

    /// Record the server, register static proxies and start advertise
    pub async fn init(&self, server: ServerSnapshot) -> Result<()> {
        self.registry.replace(server);
        self.handler.init();
        if let Some(advertise) = &self.advertise {
            advertise.start().await?;
        }
        info!(engines = self.registry.engines().len(), "Node service initialised");
        Ok(())
    }

    pub async fn start(&self, server: ServerSnapshot) {
        self.registry.replace(server);
        for engine in self.registry.engines() {
            self.announce_engine(&engine).await;
        }
    }

    pub async fn start_engine(&self, engine: EngineSnapshot) {
        let name = engine.name.clone();
        self.registry.upsert_engine(engine);
        if let Some(engine) = self.registry.engine(&name) {
            self.announce_engine(&engine).await;
        }
    }

    /// CONFIG followed by the state of every context
    async fn announce_engine(&self, engine: &EngineSnapshot) {
        let mut requests = vec![self.factory.config(engine)];
        for context in engine.contexts() {
            if let Some(request_type) = self.added_context_request(context) {
                requests.push(self.factory.context_request(request_type, engine, context));
            }
        }
        info!(jvm_route = %engine.jvm_route, requests = requests.len(), "Announcing engine");
        self.handler.send_requests(&requests).await;
    }

    fn added_context_request(&self, context: &ContextSnapshot) -> Option<RequestType> {
        if !self.auto_enable_contexts {
            Some(RequestType::DisableApp)
        } else if context.started {
            Some(RequestType::EnableApp)
        } else {
            None
        }
    }

    /// Unregister every engine of the server from the proxies
    pub async fn stop_server(&self, server: ServerSnapshot) {
        let requests: Vec<McmpRequest> = server
            .engines
            .iter()
            .filter_map(|engine| self.registry.engine(&engine.name))
            .map(|engine| self.factory.remove_all(&engine))
            .collect();
        self.handler.send_requests(&requests).await;
    }

    pub async fn context_added(&self, context: ContextSnapshot) {
        if !self.registry.add_context(&context) {
            debug!(host = %context.host, path = %context.path, "Context not announced");
            return;
        }
        if let Some(request_type) = self.added_context_request(&context) {
            self.send_context(request_type, &context).await;
        }
    }

    pub async fn context_removed(&self, context: ContextSnapshot) {
        if self.registry.is_context_excluded(&context) {
            return;
        }
        // Build the request while the context's host is still known
        let request = self
            .registry
            .engine_for(&context)
            .map(|engine| self.factory.context_request(RequestType::RemoveApp, &engine, &context));
        self.registry.remove_context(&context);
        if let Some(request) = request {
            self.handler.send_request(&request).await;
        }
    }

    pub async fn context_started(&self, context: ContextSnapshot) {
        if !self.registry.set_context_started(&context, true) {
            return;
        }
        if self.auto_enable_contexts {
            self.send_context(RequestType::EnableApp, &context).await;
        }
    }

    pub async fn context_stopped(&self, context: ContextSnapshot) {
        if !self.registry.set_context_started(&context, false) {
            return;
        }
        self.send_context(RequestType::StopApp, &context).await;
    }

    async fn send_context(
        &self,
        request_type: RequestType,
        context: &ContextSnapshot,
    ) -> ProxyOutcomes {
        match self.registry.engine_for(context) {
            Some(engine) => {
                let request = self.factory.context_request(request_type, &engine, context);
                outcomes(self.handler.send_request(&request).await)
            }
            None => {
                warn!(engine = %context.engine, "Context of unknown engine");
                ProxyOutcomes::new()
            }
        }
    }

    /// Heartbeat for one engine: probe proxies, then report its load
    pub async fn status(&self, engine: EngineSnapshot) {
        self.registry.update_connector(&engine);
        self.handler.status().await;
        if let Some(engine) = self.registry.engine(&engine.name) {
            self.send_status(&engine).await;
        }
    }

    /// Heartbeat for every engine
    pub async fn periodic_tick(&self) {
        self.handler.status().await;
        for engine in self.registry.engines() {
            self.send_status(&engine).await;
        }
    }

    async fn send_status(&self, engine: &EngineSnapshot) {
        let factor = self.load_provider.load_balance_factor(engine);
        debug!(jvm_route = %engine.jvm_route, load = factor, "Reporting load");
        self.handler
            .send_request(&self.factory.status(&engine.jvm_route, factor))
            .await;
    }

    pub async fn shutdown(&self) {
        if let Some(advertise) = &self.advertise {
            advertise.close().await;
        }
        self.handler.shutdown().await;
        info!("Node service shut down");
    }

    // Administration

    pub async fn enable(&self) -> ProxyOutcomes {
        self.send_engines(RequestType::EnableApp).await
    }

    pub async fn disable(&self) -> ProxyOutcomes {
        self.send_engines(RequestType::DisableApp).await
    }

    pub async fn stop(&self) -> ProxyOutcomes {
        self.send_engines(RequestType::StopApp).await
    }

    async fn send_engines(&self, request_type: RequestType) -> ProxyOutcomes {
        let requests: Vec<McmpRequest> = self
            .registry
            .engines()
            .iter()
            .map(|engine| self.factory.engine_request(request_type, engine))
            .collect();
        self.handler
            .send_requests(&requests)
            .await
            .into_iter()
            .map(|(identity, result)| (identity, result.is_ok()))
            .collect()
    }

    pub async fn enable_context(&self, host: &str, path: &str) -> Result<ProxyOutcomes> {
        self.admin_context(RequestType::EnableApp, host, path).await
    }

    pub async fn disable_context(&self, host: &str, path: &str) -> Result<ProxyOutcomes> {
        self.admin_context(RequestType::DisableApp, host, path).await
    }

    pub async fn stop_context(&self, host: &str, path: &str) -> Result<ProxyOutcomes> {
        self.admin_context(RequestType::StopApp, host, path).await
    }

    async fn admin_context(
        &self,
        request_type: RequestType,
        host: &str,
        path: &str,
    ) -> Result<ProxyOutcomes> {
        let context = self
            .registry
            .engines()
            .iter()
            .filter_map(|engine| engine.host(host))
            .find_map(|h| h.context(path).cloned())
            .ok_or_else(|| {
                McmpError::invalid_argument(format!("No context {} on host {}", path, host))
            })?;
        Ok(self.send_context(request_type, &context).await)
    }

    /// PING a proxy (`None`), a node by jvmRoute, or a backend URL
    pub async fn ping(&self, target: Option<&str>) -> HashMap<ProxyIdentity, Result<String>> {
        let request = match target {
            None => self.factory.ping(None),
            Some(target) => match Url::parse(target) {
                Ok(url) if url.host_str().is_some() => self.factory.ping_url(
                    url.scheme(),
                    url.host_str().unwrap_or_default(),
                    url.port_or_known_default().unwrap_or_default(),
                ),
                _ => self.factory.ping(Some(target)),
            },
        };
        self.handler.send_request(&request).await
    }

    /// INFO from every healthy proxy
    pub async fn proxy_info(&self) -> HashMap<ProxyIdentity, Result<String>> {
        self.handler.send_request(&self.factory.info()).await
    }

    /// DUMP from every healthy proxy
    pub async fn proxy_configuration(&self) -> HashMap<ProxyIdentity, Result<String>> {
        self.handler.send_request(&self.factory.dump()).await
    }

    /// DUMP from every healthy proxy, parsed into records
    pub async fn proxy_records(&self) -> HashMap<ProxyIdentity, Result<Vec<DumpRecord>>> {
        self.proxy_configuration()
            .await
            .into_iter()
            .map(|(identity, body)| (identity, body.map(|body| parse_dump(&body))))
            .collect()
    }

    pub fn add_proxy(&self, entry: &str) -> Result<bool> {
        self.handler.add_proxy_str(entry)
    }

    pub fn remove_proxy(&self, entry: &str) -> Result<bool> {
        self.handler.remove_proxy_str(entry)
    }

    pub fn reset(&self) {
        self.handler.reset();
    }

    /// Force a full reconciliation with every proxy on the next tick
    pub fn refresh(&self) {
        self.handler.mark_proxies_in_error();
    }

    // Event stream

    /// Consume container events until `Shutdown` or the channel closes
    pub async fn run(&self, mut events: mpsc::Receiver<ContainerEvent>) -> Result<()> {
        while let Some(event) = events.recv().await {
            match event {
                ContainerEvent::Init(server) => {
                    if let Err(e) = self.init(server).await {
                        error!("Node service failed to initialise: {}", e);
                        self.shutdown().await;
                        return Err(e);
                    }
                }
                ContainerEvent::Start(server) => self.start(server).await,
                ContainerEvent::StartEngine(engine) => self.start_engine(engine).await,
                ContainerEvent::Stop(server) => self.stop_server(server).await,
                ContainerEvent::ContextAdded(context) => self.context_added(context).await,
                ContainerEvent::ContextRemoved(context) => self.context_removed(context).await,
                ContainerEvent::ContextStarted(context) => self.context_started(context).await,
                ContainerEvent::ContextStopped(context) => self.context_stopped(context).await,
                ContainerEvent::Status(engine) => self.status(engine).await,
                ContainerEvent::PeriodicTick => self.periodic_tick().await,
                ContainerEvent::Shutdown => break,
            }
        }
        self.shutdown().await;
        Ok(())
    }
}

fn outcomes(results: HashMap<ProxyIdentity, Result<String>>) -> ProxyOutcomes {
    results
        .into_iter()
        .map(|(identity, result)| (identity, result.is_ok()))
        .collect()
}
