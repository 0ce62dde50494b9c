//! INFO and DUMP body parsers
//!
//! INFO is what reconciliation compares against. Its body has one record per
//! line:
//!
//! ```text
//! Node: [1],Name: node1,Balancer: mycluster,Host: 10.0.0.1,Port: 8009,Type: ajp
//! Vhost: [1:1:1], Alias: localhost
//! Context: [1:1:1], Context: /app, Status: ENABLED
//! ```
//!
//! Vhost and Context ids are `node:host:entry`; the node id resolves to a
//! jvmRoute through the Node lines.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;

use crate::{McmpError, Result};

/// Context status as the proxy reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextStatus {
    Enabled,
    Disabled,
    Stopped,
}

impl FromStr for ContextStatus {
    type Err = McmpError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ENABLED" => Ok(ContextStatus::Enabled),
            "DISABLED" => Ok(ContextStatus::Disabled),
            "STOPPED" => Ok(ContextStatus::Stopped),
            other => Err(McmpError::protocol(format!("Unknown context status: {}", other))),
        }
    }
}

/// A virtual host of one node, as seen by the proxy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualHost {
    pub aliases: BTreeSet<String>,
    pub contexts: BTreeMap<String, ContextStatus>,
}

/// Proxy-side view: jvmRoute -> virtual hosts
pub type ProxyInfo = HashMap<String, Vec<VirtualHost>>;

/// Parse an INFO response body
pub fn parse_info(body: &str) -> Result<ProxyInfo> {
    let mut routes: HashMap<String, String> = HashMap::new();
    let mut hosts: BTreeMap<(String, String), VirtualHost> = BTreeMap::new();

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut entries = line.split(',');
        let (kind, id) = split_record_id(entries.next().unwrap_or_default())
            .ok_or_else(|| McmpError::protocol(format!("Malformed INFO line: {:?}", line)))?;
        let fields: Vec<(&str, &str)> = entries
            .filter_map(|entry| entry.split_once(':'))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();
        let field = |name: &str| fields.iter().find(|(k, _)| *k == name).map(|(_, v)| *v);

        match kind {
            "Node" => {
                if let Some(name) = field("Name") {
                    routes.insert(id.to_string(), name.to_string());
                }
            }
            "Vhost" => {
                let key = node_host_key(id, line)?;
                let alias = field("Alias").ok_or_else(|| {
                    McmpError::protocol(format!("Vhost without Alias: {:?}", line))
                })?;
                hosts.entry(key).or_default().aliases.insert(alias.to_string());
            }
            "Context" => {
                let key = node_host_key(id, line)?;
                let path = field("Context").ok_or_else(|| {
                    McmpError::protocol(format!("Context without path: {:?}", line))
                })?;
                let status: ContextStatus = field("Status")
                    .ok_or_else(|| {
                        McmpError::protocol(format!("Context without Status: {:?}", line))
                    })?
                    .parse()?;
                hosts
                    .entry(key)
                    .or_default()
                    .contexts
                    .insert(path.to_string(), status);
            }
            _ => {}
        }
    }

    let mut info = ProxyInfo::new();
    for ((node, _), host) in hosts {
        // Records of nodes the proxy did not list are dropped
        if let Some(route) = routes.get(&node) {
            info.entry(route.clone()).or_default().push(host);
        }
    }
    for route in routes.into_values() {
        info.entry(route).or_default();
    }
    Ok(info)
}

/// One record of a DUMP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpRecord {
    pub kind: String,
    pub id: Option<String>,
    pub fields: Vec<(String, String)>,
}

impl DumpRecord {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a DUMP response body. Lines without a `kind:` prefix are skipped.
pub fn parse_dump(body: &str) -> Vec<DumpRecord> {
    body.lines()
        .map(str::trim)
        .filter_map(|line| {
            let (kind, rest) = line.split_once(':')?;
            let rest = rest.trim();
            let (id, rest) = match rest.split_once([' ', ',']) {
                Some((id, tail)) => (id, tail),
                None => (rest, ""),
            };
            Some(DumpRecord {
                kind: kind.trim().to_string(),
                id: (!id.is_empty()).then(|| id.trim_matches(['[', ']']).to_string()),
                fields: dump_fields(rest),
            })
        })
        .collect()
}

fn dump_fields(rest: &str) -> Vec<(String, String)> {
    if rest.contains(',') {
        return rest
            .split(',')
            .filter_map(|entry| entry.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
    }

    let mut fields = Vec::new();
    let mut tokens = rest.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if let Some(key) = token.strip_suffix(':') {
            let value = match tokens.peek() {
                Some(next) if !next.ends_with(':') => tokens.next().unwrap_or_default(),
                _ => "",
            };
            fields.push((key.to_string(), value.to_string()));
        }
    }
    fields
}

/// `Kind: [a:b:c]` -> (`Kind`, `a:b:c`)
fn split_record_id(head: &str) -> Option<(&str, &str)> {
    let (kind, id) = head.split_once(':')?;
    let id = id.trim().strip_prefix('[')?.strip_suffix(']')?;
    Some((kind.trim(), id))
}

fn node_host_key(id: &str, line: &str) -> Result<(String, String)> {
    let mut parts = id.split(':');
    match (parts.next(), parts.next()) {
        (Some(node), Some(host)) => Ok((node.to_string(), host.to_string())),
        _ => Err(McmpError::protocol(format!("Malformed record id: {:?}", line))),
    }
}
