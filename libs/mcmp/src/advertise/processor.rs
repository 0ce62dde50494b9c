//! Advertise datagram processing
//!
//! A datagram looks like an HTTP response head:
//!
//! ```text
//! HTTP/1.0 200 OK
//! Date: Mon, 19 Oct 2026 10:00:00 GMT
//! Sequence: 121
//! Digest: 4f8a...
//! Server: 1ad5c1c5-5a9b-4d5e
//! X-Manager-Address: 10.0.0.5:6666
//! X-Manager-Url: /1ad5c1c5-5a9b-4d5e
//! ```
//!
//! Headers after `Server` that are not one of the reserved four become
//! parameters of the server record. Nothing from a datagram is stored until
//! its digest has been verified. A hostname in `X-Manager-Address` is
//! resolved on the runtime with a bounded wait.

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use modcluster_config::{advertise, service, split_host_port};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::digest::DigestVerifier;
use super::server::AdvertisedServer;
use crate::handler::ProxyDiscovery;
use crate::{McmpError, Result};

/// What became of one datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvertiseOutcome {
    /// Malformed, incomplete or unauthenticated
    Rejected(String),
    /// First accepted message from this server
    Discovered {
        server: String,
        proxy: Option<SocketAddr>,
    },
    /// A known server refreshed its record
    Updated { server: String },
}

/// Fields of a datagram that parsed cleanly
struct Announcement {
    status: u16,
    description: String,
    date: String,
    sequence: String,
    digest: String,
    server: String,
    parameters: HashMap<String, String>,
}

pub struct AdvertiseProcessor {
    verifier: DigestVerifier,
    servers: DashMap<String, AdvertisedServer>,
    discovery: Arc<dyn ProxyDiscovery>,
}

impl AdvertiseProcessor {
    pub fn new(security_key: Option<&str>, discovery: Arc<dyn ProxyDiscovery>) -> Self {
        Self {
            verifier: DigestVerifier::new(security_key),
            servers: DashMap::new(),
            discovery,
        }
    }

    pub async fn process_datagram(&self, data: &[u8]) -> AdvertiseOutcome {
        let announcement = match parse(data) {
            Ok(announcement) => announcement,
            Err(reason) => {
                trace!("Ignoring advertise datagram: {}", reason);
                return AdvertiseOutcome::Rejected(reason);
            }
        };

        if !self.verifier.verify(
            &announcement.digest,
            &encode_latin1(&announcement.date),
            &encode_latin1(&announcement.sequence),
            &encode_latin1(&announcement.server),
        ) {
            trace!(server = %announcement.server, "Advertise digest mismatch");
            return AdvertiseOutcome::Rejected(format!(
                "Digest mismatch for server {}",
                announcement.server
            ));
        }

        self.apply(announcement).await
    }

    async fn apply(&self, announcement: Announcement) -> AdvertiseOutcome {
        let now = Utc::now();
        let name = announcement.server.clone();

        if let Some(mut server) = self.servers.get_mut(&name) {
            if server.status != announcement.status {
                info!(
                    server = %name,
                    status = announcement.status,
                    "Advertised server status changed: {}",
                    announcement.description
                );
            }
            server.status = announcement.status;
            server.status_description = announcement.description;
            server.date = announcement.date;
            server.sequence = announcement.sequence;
            server.parameters.extend(announcement.parameters);
            server.last_seen = now;
            return AdvertiseOutcome::Updated { server: name };
        }

        let server = AdvertisedServer {
            name: name.clone(),
            date: announcement.date,
            sequence: announcement.sequence,
            status: announcement.status,
            status_description: announcement.description,
            parameters: announcement.parameters,
            first_seen: now,
            last_seen: now,
        };

        let proxy = match server.manager_address().map(str::to_string) {
            Some(address) => match resolve_manager_address(&address).await {
                Ok(resolved) => Some(resolved),
                Err(e) => {
                    warn!(server = %name, "Unusable manager address {:?}: {}", address, e);
                    None
                }
            },
            None => None,
        };

        // A concurrent datagram may have registered the same server first
        let inserted = match self.servers.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(server);
                true
            }
        };
        if !inserted {
            return AdvertiseOutcome::Updated { server: name };
        }

        info!(server = %name, proxy = ?proxy, "Discovered advertised server");
        if let Some(address) = proxy {
            self.discovery.add_proxy(address);
        }
        AdvertiseOutcome::Discovered { server: name, proxy }
    }

    pub fn server(&self, name: &str) -> Option<AdvertisedServer> {
        self.servers.get(name).map(|entry| entry.value().clone())
    }

    pub fn servers(&self) -> Vec<AdvertisedServer> {
        self.servers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

/// `host[:port]` to a socket address; IP literals never touch the resolver
async fn resolve_manager_address(entry: &str) -> Result<SocketAddr> {
    let (host, port) = split_host_port(entry.trim(), service::proxies::DEFAULT_PORT)
        .map_err(|e| McmpError::invalid_argument(format!("{:#}", e)))?;
    if host.is_empty() {
        return Err(McmpError::invalid_argument("Empty manager address"));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let limit = Duration::from_millis(service::advertise::RESOLVE_TIMEOUT_MS);
    let mut addresses = timeout(limit, tokio::net::lookup_host((host, port)))
        .await
        .map_err(|_| McmpError::timeout(format!("resolve {}", host), limit.as_millis() as u64))?
        .map_err(|e| McmpError::network_with_source(format!("Failed to resolve {}", host), e))?;
    addresses
        .next()
        .ok_or_else(|| McmpError::network(format!("No address found for {}", host)))
}

/// ISO-8859-1 text of a datagram
fn decode_latin1(data: &[u8]) -> String {
    data.iter().map(|&b| b as char).collect()
}

/// Inverse of `decode_latin1`; characters above U+00FF become `?`
fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(c).unwrap_or(b'?'))
        .collect()
}

fn parse(data: &[u8]) -> std::result::Result<Announcement, String> {
    let text = decode_latin1(data);
    if !text.starts_with(advertise::STATUS_LINE_PREFIX) {
        return Err("Not an advertise message".to_string());
    }

    let mut lines = text.split('\n').map(|line| line.trim_end_matches('\r'));

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let _protocol = parts.next();
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| *code >= 100)
        .ok_or_else(|| format!("Malformed status line: {:?}", status_line))?;
    let description = parts.next().unwrap_or_default().to_string();

    let mut date = None;
    let mut sequence = None;
    let mut digest = None;
    let mut server: Option<String> = None;
    let mut parameters = HashMap::new();

    for line in lines.filter(|line| !line.is_empty()) {
        let (name, value) = line
            .split_once(": ")
            .ok_or_else(|| format!("Malformed header line: {:?}", line))?;

        if name.eq_ignore_ascii_case(advertise::DATE) {
            date = Some(value.to_string());
        } else if name.eq_ignore_ascii_case(advertise::SEQUENCE) {
            sequence = Some(value.to_string());
        } else if name.eq_ignore_ascii_case(advertise::DIGEST) {
            digest = Some(value.to_string());
        } else if name.eq_ignore_ascii_case(advertise::SERVER) {
            server = Some(value.to_string());
        } else if server.is_some() {
            parameters.insert(name.to_string(), value.to_string());
        } else {
            debug!("Ignoring advertise header before Server: {}", name);
        }
    }

    Ok(Announcement {
        status,
        description,
        date: date.ok_or("Missing Date header")?,
        sequence: sequence.ok_or("Missing Sequence header")?,
        digest: digest.ok_or("Missing Digest header")?,
        server: server.ok_or("Missing Server header")?,
        parameters,
    })
}

/// Build a datagram the way a proxy does; used by tests and tooling
pub fn build_datagram(
    security_key: Option<&str>,
    status: &str,
    date: &str,
    sequence: u64,
    server: &str,
    parameters: &[(&str, &str)],
) -> Bytes {
    let sequence = sequence.to_string();
    let digest = DigestVerifier::new(security_key).expected_hex(
        &encode_latin1(date),
        sequence.as_bytes(),
        &encode_latin1(server),
    );

    let mut text = format!(
        "HTTP/1.0 {}\r\nDate: {}\r\nSequence: {}\r\nDigest: {}\r\nServer: {}\r\n",
        status, date, sequence, digest, server
    );
    for (name, value) in parameters {
        text.push_str(&format!("{}: {}\r\n", name, value));
    }
    Bytes::from(encode_latin1(&text))
}
