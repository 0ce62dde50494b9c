//! MCMP Handler
//!
//! Owns the set of proxies and routes every management request to the ones
//! currently `Ok`. The periodic `status()` call is the only place a proxy
//! leaves `Error`: it probes the proxy with INFO, lets the reset request
//! source compute corrections from the reported state, sends them, and only
//! then marks the proxy healthy.
//!
//! Fan-out takes a snapshot of the proxy map, so structural changes never
//! block or disturb an in-flight send. Per-proxy failures are recorded on that
//! proxy and reported in the result map; they are never raised to the caller.

use dashmap::DashMap;
use futures::future::join_all;
use modcluster_config::{service, ProxyConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, trace, warn};

use crate::protocol::{parse_info, McmpRequest, RequestType};
use crate::proxy::{Proxy, ProxyIdentity, ProxyState};
use crate::recovery::ResetRequestSource;
use crate::{McmpError, Result};

/// Notified once, with the local address used to reach the proxies, when the
/// first proxy connection is established
pub trait ConnectionListener: Send + Sync {
    fn connection_established(&self, local_address: IpAddr);
}

/// Sink for dynamically discovered proxies
pub trait ProxyDiscovery: Send + Sync {
    /// Returns true when the proxy was not tracked before
    fn add_proxy(&self, address: SocketAddr) -> bool;
}

pub struct McmpHandler {
    proxies: DashMap<ProxyIdentity, Arc<Proxy>>,
    socket_timeout: Duration,
    proxy_url: Option<String>,
    bind_address: Option<SocketAddr>,
    reset_source: Arc<dyn ResetRequestSource>,
    connection_listener: Option<Arc<dyn ConnectionListener>>,
    listener_notified: AtomicBool,
    local_address: RwLock<Option<IpAddr>>,
    /// Serialises overlapping status ticks
    status_lock: AsyncMutex<()>,
    initial_proxies: Vec<SocketAddr>,
}

impl McmpHandler {
    /// Build a handler; proxy addresses are resolved here so a bad entry
    /// fails startup
    pub fn new(
        config: &ProxyConfig,
        reset_source: Arc<dyn ResetRequestSource>,
        connection_listener: Option<Arc<dyn ConnectionListener>>,
    ) -> Result<Self> {
        if config.socket_timeout_ms == 0 {
            return Err(McmpError::configuration(
                "Socket timeout must be positive",
                Some("socket_timeout_ms"),
            ));
        }
        let initial_proxies = config
            .resolved_proxies()
            .map_err(|e| McmpError::configuration(format!("{:#}", e), Some("proxy_list")))?;

        Ok(Self {
            proxies: DashMap::new(),
            socket_timeout: config.socket_timeout(),
            proxy_url: config.proxy_url.clone().filter(|url| !url.is_empty()),
            bind_address: config.bind_address.map(|ip| SocketAddr::new(ip, 0)),
            reset_source,
            connection_listener,
            listener_notified: AtomicBool::new(false),
            local_address: RwLock::new(None),
            status_lock: AsyncMutex::new(()),
            initial_proxies,
        })
    }

    /// Register the statically configured proxies
    pub fn init(&self) {
        for address in self.initial_proxies.clone() {
            self.add_proxy_with(address, false);
        }
        info!(proxies = self.proxies.len(), "MCMP handler initialised");
    }

    pub fn add_proxy(&self, address: SocketAddr) -> bool {
        self.add_proxy_with(address, false)
    }

    /// Track a proxy. Re-adding a tracked proxy leaves its state alone.
    pub fn add_proxy_with(&self, address: SocketAddr, established: bool) -> bool {
        let identity = ProxyIdentity::new(address, self.bind_address);
        let mut added = false;
        self.proxies.entry(identity).or_insert_with(|| {
            added = true;
            Arc::new(Proxy::new(
                identity,
                established,
                self.socket_timeout,
                self.proxy_url.clone(),
            ))
        });
        if added {
            info!(proxy = %identity, "Added proxy");
        } else {
            debug!(proxy = %identity, "Proxy already tracked");
        }
        added
    }

    /// Parse `host[:port]` and track it
    pub fn add_proxy_str(&self, entry: &str) -> Result<bool> {
        let identity =
            ProxyIdentity::parse(entry, service::proxies::DEFAULT_PORT, self.bind_address)?;
        Ok(self.add_proxy(identity.address))
    }

    /// Stop tracking every proxy at `address`; in-flight requests are abandoned
    pub fn remove_proxy(&self, address: SocketAddr) -> bool {
        let before = self.proxies.len();
        self.proxies.retain(|identity, _| identity.address != address);
        let removed = self.proxies.len() != before;
        if removed {
            info!(proxy = %address, "Removed proxy");
        }
        removed
    }

    pub fn remove_proxy_str(&self, entry: &str) -> Result<bool> {
        let identity =
            ProxyIdentity::parse(entry, service::proxies::DEFAULT_PORT, self.bind_address)?;
        Ok(self.remove_proxy(identity.address))
    }

    pub fn proxy_state(&self, address: SocketAddr) -> Option<ProxyState> {
        self.proxies
            .iter()
            .find(|entry| entry.key().address == address)
            .map(|entry| entry.value().state())
    }

    pub fn proxy_states(&self) -> HashMap<ProxyIdentity, ProxyState> {
        self.proxies
            .iter()
            .map(|entry| (*entry.key(), entry.value().state()))
            .collect()
    }

    pub fn proxy(&self, address: SocketAddr) -> Option<Arc<Proxy>> {
        self.proxies
            .iter()
            .find(|entry| entry.key().address == address)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// True iff every tracked proxy is `Ok`
    pub fn is_proxy_health_ok(&self) -> bool {
        self.proxies
            .iter()
            .all(|entry| entry.value().state() == ProxyState::Ok)
    }

    /// Force every `Ok` proxy back to `Error` so the next tick reconciles it
    pub fn mark_proxies_in_error(&self) {
        let marked = self
            .snapshot()
            .iter()
            .filter(|proxy| proxy.force_error())
            .count();
        if marked > 0 {
            info!(proxies = marked, "Marked proxies in error");
        }
    }

    /// Release quarantined (`Down`) proxies for retry
    pub fn reset(&self) {
        let released = self.snapshot().iter().filter(|proxy| proxy.reset()).count();
        if released > 0 {
            info!(proxies = released, "Reset quarantined proxies");
        }
    }

    /// Local address the proxies see this node on, once known
    pub fn local_address(&self) -> Option<IpAddr> {
        *self.local_address.read()
    }

    fn snapshot(&self) -> Vec<Arc<Proxy>> {
        self.proxies
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn healthy(&self) -> Vec<Arc<Proxy>> {
        self.snapshot()
            .into_iter()
            .filter(|proxy| proxy.state() == ProxyState::Ok)
            .collect()
    }

    /// Heartbeat: probe and reconcile every proxy in `Error`
    pub async fn status(&self) {
        let _tick = self.status_lock.lock().await;
        let proxies = self.snapshot();
        trace!(proxies = proxies.len(), "Status tick");
        join_all(proxies.iter().map(|proxy| self.probe(proxy))).await;
    }

    async fn probe(&self, proxy: &Proxy) {
        match proxy.state() {
            ProxyState::Ok => return,
            ProxyState::Down => {
                trace!(proxy = %proxy.identity(), "Skipping quarantined proxy");
                return;
            }
            ProxyState::Error | ProxyState::Uninitialized => {}
        }

        let mut session = proxy.session().await;
        proxy.begin_reconciliation();
        let info = McmpRequest::new(RequestType::Info, false, None);
        let body = match session.send(&info).await {
            Ok(body) => body,
            Err(_) => return,
        };
        let reported = match parse_info(&body) {
            Ok(reported) => reported,
            Err(error) => {
                proxy.mark_failure(&error);
                return;
            }
        };

        if let Some(local) = session.local_addr() {
            self.connection_established(local.ip());
        }

        let requests = self.reset_source.reset_requests(&reported);
        debug!(
            proxy = %proxy.identity(),
            requests = requests.len(),
            "Reconciling proxy"
        );
        for request in &requests {
            if session.send(request).await.is_err() {
                return;
            }
        }

        if !proxy.mark_ok() {
            debug!(proxy = %proxy.identity(), "Reconciliation superseded, retrying next tick");
        }
    }

    fn connection_established(&self, local: IpAddr) {
        self.local_address.write().get_or_insert(local);
        if self.listener_notified.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(listener) = &self.connection_listener {
            info!(local_address = %local, "First proxy connection established");
            listener.connection_established(local);
        }
    }

    /// Send one request to every `Ok` proxy
    pub async fn send_request(
        &self,
        request: &McmpRequest,
    ) -> HashMap<ProxyIdentity, Result<String>> {
        self.send_requests(std::slice::from_ref(request))
            .await
            .into_iter()
            .map(|(identity, result)| {
                let result = result.and_then(|mut responses| {
                    responses
                        .pop()
                        .ok_or_else(|| McmpError::protocol("No response recorded"))
                });
                (identity, result)
            })
            .collect()
    }

    /// Send a batch to every `Ok` proxy. Each proxy receives the whole batch
    /// in order over one connection; proxies are served concurrently.
    pub async fn send_requests(
        &self,
        requests: &[McmpRequest],
    ) -> HashMap<ProxyIdentity, Result<Vec<String>>> {
        if requests.is_empty() {
            return HashMap::new();
        }
        let proxies = self.healthy();
        if proxies.is_empty() {
            debug!(
                request = %requests[0].request_type(),
                "No healthy proxy to send to"
            );
            return HashMap::new();
        }

        let results = join_all(proxies.iter().map(|proxy| async move {
            (proxy.identity(), proxy.send_batch(requests).await)
        }))
        .await;

        for (identity, result) in &results {
            if let Err(error) = result {
                warn!(proxy = %identity, "Request batch failed: {}", error);
            }
        }
        results.into_iter().collect()
    }

    /// Close connections and forget every proxy
    pub async fn shutdown(&self) {
        let proxies = self.snapshot();
        self.proxies.clear();
        join_all(proxies.iter().map(|proxy| proxy.close())).await;
        info!(proxies = proxies.len(), "MCMP handler shut down");
    }
}

impl ProxyDiscovery for McmpHandler {
    fn add_proxy(&self, address: SocketAddr) -> bool {
        McmpHandler::add_proxy(self, address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProxyInfo;

    struct NoReset;

    impl ResetRequestSource for NoReset {
        fn reset_requests(&self, _info: &ProxyInfo) -> Vec<McmpRequest> {
            Vec::new()
        }
    }

    fn handler(proxy_list: &[&str]) -> McmpHandler {
        let config = ProxyConfig {
            proxy_list: proxy_list.iter().map(|s| s.to_string()).collect(),
            socket_timeout_ms: 500,
            ..Default::default()
        };
        McmpHandler::new(&config, Arc::new(NoReset), None).unwrap()
    }

    #[test]
    fn test_init_registers_static_proxies_in_error() {
        let handler = handler(&["10.0.0.1:6666", "10.0.0.2"]);
        handler.init();

        let states = handler.proxy_states();
        assert_eq!(states.len(), 2);
        assert!(states.values().all(|s| *s == ProxyState::Error));
        assert_eq!(
            handler.proxy_state("10.0.0.2:8000".parse().unwrap()),
            Some(ProxyState::Error)
        );
        assert!(!handler.is_proxy_health_ok());
    }

    #[test]
    fn test_bad_static_proxy_fails_construction() {
        let config = ProxyConfig {
            proxy_list: vec!["10.0.0.1:notaport".into()],
            ..Default::default()
        };
        let err = McmpHandler::new(&config, Arc::new(NoReset), None).err().unwrap();
        assert!(matches!(err, McmpError::Configuration { .. }));
    }

    #[test]
    fn test_add_proxy_is_idempotent() {
        let handler = handler(&[]);
        let address: SocketAddr = "10.0.0.5:6666".parse().unwrap();

        assert!(handler.add_proxy(address));
        handler.proxy(address).unwrap().mark_ok();
        assert!(!handler.add_proxy(address));

        assert_eq!(handler.len(), 1);
        assert_eq!(handler.proxy_state(address), Some(ProxyState::Ok));
    }

    #[test]
    fn test_mark_and_reset() {
        let handler = handler(&[]);
        let ok: SocketAddr = "10.0.0.1:6666".parse().unwrap();
        let down: SocketAddr = "10.0.0.2:6666".parse().unwrap();
        let error: SocketAddr = "10.0.0.3:6666".parse().unwrap();
        for address in [ok, down, error] {
            handler.add_proxy(address);
        }
        handler.proxy(ok).unwrap().mark_ok();
        handler
            .proxy(down)
            .unwrap()
            .mark_failure(&McmpError::proxy_error(500, Some("SYNTAX".into()), None));

        handler.mark_proxies_in_error();
        assert_eq!(handler.proxy_state(ok), Some(ProxyState::Error));
        assert_eq!(handler.proxy_state(down), Some(ProxyState::Down));
        assert_eq!(handler.proxy_state(error), Some(ProxyState::Error));

        handler.proxy(ok).unwrap().mark_ok();
        handler.reset();
        assert_eq!(handler.proxy_state(ok), Some(ProxyState::Ok));
        assert_eq!(handler.proxy_state(down), Some(ProxyState::Error));
    }

    #[test]
    fn test_string_admin_operations() {
        let handler = handler(&[]);
        assert!(handler.add_proxy_str("10.0.0.9:6666").unwrap());
        assert!(matches!(
            handler.add_proxy_str("10.0.0.9:port"),
            Err(McmpError::InvalidArgument { .. })
        ));
        assert!(handler.remove_proxy_str("10.0.0.9:6666").unwrap());
        assert!(!handler.remove_proxy("10.0.0.9:6666".parse().unwrap()));
        assert!(handler.is_empty());
    }

    #[tokio::test]
    async fn test_send_without_healthy_proxies() {
        let handler = handler(&["127.0.0.1:1"]);
        handler.init();

        let request = McmpRequest::new(RequestType::Ping, false, None);
        assert!(handler.send_request(&request).await.is_empty());
        assert!(handler.send_requests(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_status_keeps_unreachable_proxy_in_error() {
        let handler = handler(&["127.0.0.1:1"]);
        handler.init();
        handler.status().await;

        let proxy = handler.proxy("127.0.0.1:1".parse().unwrap()).unwrap();
        assert_eq!(proxy.state(), ProxyState::Error);
        assert!(proxy.status().last_error.is_some());
        assert_eq!(handler.local_address(), None);
    }
}
