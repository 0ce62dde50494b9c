//! Container topology file
//!
//! Describes the engines, hosts and contexts the agent announces. The file is
//! re-read on every status tick and the difference to the previous read is
//! turned into container events, so deploying or stopping an application is
//! a matter of editing the file.
//!
//! ```toml
//! [[engines]]
//! name = "catalina"
//! jvm_route = "node1"
//!
//! [engines.connector]
//! address = "10.0.0.10"
//! port = 8009
//!
//! [[engines.hosts]]
//! name = "localhost"
//! aliases = ["example.com"]
//! contexts = [{ path = "/app" }, { path = "/admin", started = false }]
//! ```

use anyhow::{Context, Result};
use mcmp::{
    ConnectorSnapshot, ContainerEvent, ContextSnapshot, EngineSnapshot, HostSnapshot,
    ServerSnapshot,
};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct TopologyFile {
    #[serde(default)]
    engines: Vec<EngineEntry>,
}

#[derive(Debug, Deserialize)]
struct EngineEntry {
    name: String,
    #[serde(default)]
    jvm_route: String,
    #[serde(default)]
    default_host: Option<String>,
    #[serde(default)]
    connector: ConnectorSnapshot,
    #[serde(default)]
    hosts: Vec<HostEntry>,
}

#[derive(Debug, Deserialize)]
struct HostEntry {
    name: String,
    #[serde(default)]
    aliases: BTreeSet<String>,
    #[serde(default)]
    contexts: Vec<ContextEntry>,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    path: String,
    #[serde(default = "started_by_default")]
    started: bool,
    #[serde(default)]
    distributable: bool,
}

fn started_by_default() -> bool {
    true
}

/// Read and parse a topology file
pub fn load(path: &Path) -> Result<ServerSnapshot> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read topology {:?}", path))?;
    parse(&contents).with_context(|| format!("Invalid topology {:?}", path))
}

pub fn parse(contents: &str) -> Result<ServerSnapshot> {
    let file: TopologyFile = toml::from_str(contents)?;

    let engines = file
        .engines
        .into_iter()
        .map(|engine| {
            let hosts = engine
                .hosts
                .into_iter()
                .map(|host| HostSnapshot {
                    contexts: host
                        .contexts
                        .into_iter()
                        .map(|context| ContextSnapshot {
                            engine: engine.name.clone(),
                            host: host.name.clone(),
                            path: context.path,
                            started: context.started,
                            distributable: context.distributable,
                        })
                        .collect(),
                    name: host.name,
                    aliases: host.aliases,
                })
                .collect();
            EngineSnapshot {
                name: engine.name,
                jvm_route: engine.jvm_route,
                default_host: engine.default_host,
                hosts,
                connector: engine.connector,
            }
        })
        .collect();

    Ok(ServerSnapshot { engines })
}

type ContextKey = (String, String, String);

fn contexts(engine: &EngineSnapshot) -> BTreeMap<ContextKey, &ContextSnapshot> {
    engine
        .contexts()
        .map(|c| ((c.engine.clone(), c.host.clone(), c.wire_path().to_string()), c))
        .collect()
}

/// Events that take the container from `previous` to `current`.
///
/// New engines are announced whole; for known engines contexts are compared
/// one by one. Removed engines are unregistered with a `Stop` for them alone.
pub fn diff(previous: &ServerSnapshot, current: &ServerSnapshot) -> Vec<ContainerEvent> {
    let mut events = Vec::new();

    for engine in &current.engines {
        let Some(before) = previous.engine(&engine.name) else {
            events.push(ContainerEvent::StartEngine(engine.clone()));
            continue;
        };

        let old = contexts(before);
        let new = contexts(engine);
        for (key, context) in &new {
            match old.get(key) {
                None => events.push(ContainerEvent::ContextAdded((*context).clone())),
                Some(prior) if prior.started != context.started => {
                    events.push(if context.started {
                        ContainerEvent::ContextStarted((*context).clone())
                    } else {
                        ContainerEvent::ContextStopped((*context).clone())
                    });
                }
                Some(_) => {}
            }
        }
        for (key, context) in &old {
            if !new.contains_key(key) {
                events.push(ContainerEvent::ContextRemoved((*context).clone()));
            }
        }

        if before.connector != engine.connector {
            events.push(ContainerEvent::Status(engine.clone()));
        }
    }

    let removed: Vec<EngineSnapshot> = previous
        .engines
        .iter()
        .filter(|engine| current.engine(&engine.name).is_none())
        .cloned()
        .collect();
    if !removed.is_empty() {
        events.push(ContainerEvent::Stop(ServerSnapshot { engines: removed }));
    }

    events
}
