//! Proxy state machine
//!
//! One `Proxy` per tracked httpd instance. Its health state only moves along
//! these edges:
//!
//! ```text
//! Uninitialized -> Error            on registration
//! Error         -> Ok               successful status probe + reconciliation
//! Ok            -> Error            transport, protocol or proxy failure
//! any           -> Down             proxy rejected a request as SYNTAX
//! Down          -> Error            explicit reset()
//! Ok            -> Error            mark_proxies_in_error()
//! ```
//!
//! Down proxies are quarantined: the status tick skips them until reset.
//! A `mark_proxies_in_error()` that lands while a proxy is being reconciled
//! keeps it in `Error` for one more round.

use chrono::{DateTime, Utc};
use modcluster_config::resolve_address;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::protocol::{encode_request, McmpRequest};
use crate::transports::ProxyConnection;
use crate::{McmpError, Result};

/// Remote address plus optional local bind address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxyIdentity {
    pub address: SocketAddr,
    pub bind_address: Option<SocketAddr>,
}

impl ProxyIdentity {
    pub fn new(address: SocketAddr, bind_address: Option<SocketAddr>) -> Self {
        Self {
            address,
            bind_address,
        }
    }

    /// Parse `host[:port]`; a malformed string is an invalid argument
    pub fn parse(
        entry: &str,
        default_port: u16,
        bind_address: Option<SocketAddr>,
    ) -> Result<Self> {
        let address = resolve_address(entry, default_port).map_err(|e| {
            McmpError::invalid_argument(format!("Invalid proxy address {:?}: {}", entry, e))
        })?;
        Ok(Self::new(address, bind_address))
    }
}

impl fmt::Display for ProxyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bind_address {
            Some(local) => write!(f, "{} (via {})", self.address, local),
            None => write!(f, "{}", self.address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProxyState {
    Uninitialized,
    /// Failed; retried on every status tick
    Error,
    /// Quarantined until reset()
    Down,
    Ok,
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProxyState::Uninitialized => "UNINITIALIZED",
            ProxyState::Error => "ERROR",
            ProxyState::Down => "DOWN",
            ProxyState::Ok => "OK",
        };
        f.write_str(name)
    }
}

/// Health record of one proxy
#[derive(Debug, Clone)]
pub struct ProxyStatus {
    pub state: ProxyState,
    /// Set once a CONFIG exchange has succeeded
    pub established: bool,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Error demanded while a reconciliation was in flight
    resync_requested: bool,
}

pub struct Proxy {
    identity: ProxyIdentity,
    status: Mutex<ProxyStatus>,
    connection: AsyncMutex<Option<ProxyConnection>>,
    socket_timeout: Duration,
    proxy_url: Option<String>,
}

impl Proxy {
    /// New proxy, already moved to `Error` so the next tick handshakes it
    pub fn new(
        identity: ProxyIdentity,
        established: bool,
        socket_timeout: Duration,
        proxy_url: Option<String>,
    ) -> Self {
        let proxy = Self {
            identity,
            status: Mutex::new(ProxyStatus {
                state: ProxyState::Uninitialized,
                established,
                last_error: None,
                last_error_at: None,
                resync_requested: false,
            }),
            connection: AsyncMutex::new(None),
            socket_timeout,
            proxy_url,
        };
        proxy.transition(ProxyState::Error);
        proxy
    }

    pub fn identity(&self) -> ProxyIdentity {
        self.identity
    }

    pub fn state(&self) -> ProxyState {
        self.status.lock().state
    }

    pub fn status(&self) -> ProxyStatus {
        self.status.lock().clone()
    }

    pub fn is_established(&self) -> bool {
        self.status.lock().established
    }

    fn transition(&self, next: ProxyState) -> ProxyState {
        let mut status = self.status.lock();
        let previous = status.state;
        status.state = next;
        if previous != next {
            debug!(proxy = %self.identity, from = %previous, to = %next, "Proxy state change");
        }
        previous
    }

    /// Called before the INFO probe; later error demands invalidate this round
    pub fn begin_reconciliation(&self) {
        self.status.lock().resync_requested = false;
    }

    /// `Error -> Ok` unless an error was demanded since the reconciliation
    /// began. Returns whether the proxy is now `Ok`.
    pub fn mark_ok(&self) -> bool {
        let mut status = self.status.lock();
        match status.state {
            ProxyState::Ok => true,
            ProxyState::Error | ProxyState::Uninitialized if !status.resync_requested => {
                status.state = ProxyState::Ok;
                drop(status);
                info!(proxy = %self.identity, "Proxy is healthy");
                true
            }
            _ => false,
        }
    }

    /// Record a failure: SYNTAX rejections quarantine, everything else retries
    pub fn mark_failure(&self, error: &McmpError) {
        let next = if error.is_syntax_error() {
            ProxyState::Down
        } else {
            ProxyState::Error
        };

        let previous = {
            let mut status = self.status.lock();
            status.last_error = Some(error.to_string());
            status.last_error_at = Some(Utc::now());
            std::mem::replace(&mut status.state, next)
        };

        if previous == ProxyState::Ok || next == ProxyState::Down {
            warn!(
                proxy = %self.identity,
                state = %next,
                category = error.category(),
                "Proxy failed: {}",
                error
            );
        } else {
            debug!(proxy = %self.identity, "Proxy still failing: {}", error);
        }
    }

    /// `Ok -> Error`; a proxy already in `Error` must not be promoted by a
    /// reconciliation that is still running. Returns true on `Ok -> Error`.
    pub fn force_error(&self) -> bool {
        let mut status = self.status.lock();
        match status.state {
            ProxyState::Ok => {
                status.state = ProxyState::Error;
                true
            }
            ProxyState::Error => {
                status.resync_requested = true;
                false
            }
            _ => false,
        }
    }

    /// `Down -> Error`; other states unchanged
    pub fn reset(&self) -> bool {
        let mut status = self.status.lock();
        if status.state == ProxyState::Down {
            status.state = ProxyState::Error;
            true
        } else {
            false
        }
    }

    /// Exclusive use of this proxy's connection until the session drops
    pub async fn session(&self) -> ProxySession<'_> {
        ProxySession {
            proxy: self,
            connection: self.connection.lock().await,
        }
    }

    /// Send a batch in order over one connection, stopping at the first failure
    pub async fn send_batch(&self, requests: &[McmpRequest]) -> Result<Vec<String>> {
        let mut session = self.session().await;
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            responses.push(session.send(request).await?);
        }
        Ok(responses)
    }

    pub async fn close(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.close().await;
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("identity", &self.identity)
            .field("status", &*self.status.lock())
            .finish()
    }
}

/// Holds a proxy's connection lock for a sequence of exchanges
pub struct ProxySession<'a> {
    proxy: &'a Proxy,
    connection: MutexGuard<'a, Option<ProxyConnection>>,
}

impl ProxySession<'_> {
    /// Local address of the open connection, if any
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.connection.as_ref().map(ProxyConnection::local_addr)
    }

    /// Exchange one request; failures are recorded on the proxy
    pub async fn send(&mut self, request: &McmpRequest) -> Result<String> {
        let result = self.exchange(request).await;
        match &result {
            Ok(_) => {
                if request.request_type().establishes_server() {
                    self.proxy.status.lock().established = true;
                }
            }
            Err(error) => self.proxy.mark_failure(error),
        }
        result
    }

    async fn exchange(&mut self, request: &McmpRequest) -> Result<String> {
        let proxy = self.proxy;
        let wire = encode_request(
            request,
            proxy.proxy_url.as_deref(),
            &proxy.identity.address.to_string(),
        );

        let reused = match self.connection.as_ref() {
            Some(connection) => connection.is_reusable(),
            None => false,
        };
        if !reused {
            self.connection.take();
        }

        let mut attempt_reused = reused;
        loop {
            if self.connection.is_none() {
                let connection = ProxyConnection::connect(
                    proxy.identity.address,
                    proxy.identity.bind_address,
                    proxy.socket_timeout,
                )
                .await?;
                *self.connection = Some(connection);
            }
            let Some(connection) = self.connection.as_mut() else {
                return Err(McmpError::connection("Connection unavailable", Some(proxy.identity.address)));
            };

            match connection.exchange(&wire, proxy.socket_timeout).await {
                Ok(response) => {
                    debug!(
                        proxy = %proxy.identity,
                        request = %request.request_type(),
                        status = response.status(),
                        "MCMP exchange"
                    );
                    if !connection.is_reusable() {
                        self.connection.take();
                    }
                    return response.into_result();
                }
                Err(error) => {
                    self.connection.take();
                    // A kept-alive stream may have been closed by the proxy
                    if attempt_reused && is_stale_connection(&error) {
                        debug!(proxy = %proxy.identity, "Reconnecting stale connection: {}", error);
                        attempt_reused = false;
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }
}

fn is_stale_connection(error: &McmpError) -> bool {
    matches!(
        error,
        McmpError::Network { .. } | McmpError::Connection { .. } | McmpError::Io { .. }
    )
}
