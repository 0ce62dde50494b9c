//! Node Configuration Module
//!
//! Provides configuration loading for the mod_cluster node agent.
//! Supports loading from TOML files with environment-specific overrides.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::service;

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct ModClusterConfig {
    /// Statically configured proxies and connection settings
    pub proxies: ProxyConfig,

    /// Multicast discovery of proxies
    pub advertise: AdvertiseConfig,

    /// Node parameters pushed with CONFIG
    pub node: NodeConfig,

    /// Balancer parameters pushed with CONFIG
    pub balancer: BalancerConfig,

    /// Service behaviour
    pub service: ServiceSettings,

    /// Load balance factor computation
    pub load: LoadConfig,
}

/// Proxy connection settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxies as `host[:port]`
    pub proxy_list: Vec<String>,
    /// Path prefix placed before `/` in the MCMP request line
    pub proxy_url: Option<String>,
    pub socket_timeout_ms: u64,
    /// Local address proxy connections are bound to
    pub bind_address: Option<IpAddr>,
}

/// Advertise listener settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AdvertiseConfig {
    /// `None` enables advertise only when `proxy_list` is empty
    pub enabled: Option<bool>,
    pub group_address: IpAddr,
    pub port: u16,
    pub interface: Option<IpAddr>,
    pub security_key: Option<String>,
}

/// How the proxy flushes packets to the client
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlushPackets {
    #[default]
    Off,
    On,
    Auto,
}

impl FlushPackets {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushPackets::Off => "Off",
            FlushPackets::On => "On",
            FlushPackets::Auto => "Auto",
        }
    }
}

/// Node parameters
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct NodeConfig {
    /// Load balancing group
    pub domain: Option<String>,
    pub flush_packets: FlushPackets,
    pub flush_wait: Option<u32>,
    pub ping: Option<u32>,
    pub smax: Option<u32>,
    pub ttl: Option<u32>,
    pub node_timeout: Option<u32>,
    pub balancer: Option<String>,
}

/// Balancer parameters
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BalancerConfig {
    pub sticky_session: bool,
    pub sticky_session_cookie: String,
    pub sticky_session_path: String,
    pub sticky_session_remove: bool,
    pub sticky_session_force: bool,
    pub worker_timeout: Option<u32>,
    pub max_attempts: Option<u32>,
}

/// Service behaviour
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServiceSettings {
    /// Contexts never announced, as `[host:]path` (`ROOT` is the root context)
    pub excluded_contexts: Vec<String>,
    pub auto_enable_contexts: bool,
    pub status_interval_secs: u64,
}

/// Load balance factor settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoadConfig {
    pub decay_factor: f64,
    pub history: usize,
    /// Constant factor reported instead of the dynamic metrics
    pub fixed_factor: Option<i32>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            proxy_list: Vec::new(),
            proxy_url: None,
            socket_timeout_ms: service::proxies::SOCKET_TIMEOUT_MS,
            bind_address: None,
        }
    }
}

impl Default for AdvertiseConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            group_address: IpAddr::V4(service::advertise::GROUP_ADDRESS),
            port: service::advertise::PORT,
            interface: None,
            security_key: None,
        }
    }
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            sticky_session: true,
            sticky_session_cookie: service::node::STICKY_SESSION_COOKIE.to_string(),
            sticky_session_path: service::node::STICKY_SESSION_PATH.to_string(),
            sticky_session_remove: false,
            sticky_session_force: true,
            worker_timeout: None,
            max_attempts: None,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            excluded_contexts: Vec::new(),
            auto_enable_contexts: true,
            status_interval_secs: service::node::STATUS_INTERVAL_SECS,
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            decay_factor: service::load::DECAY_FACTOR,
            history: service::load::HISTORY,
            fixed_factor: None,
        }
    }
}

impl ProxyConfig {
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    /// Resolve every entry of `proxy_list`
    pub fn resolved_proxies(&self) -> Result<Vec<SocketAddr>> {
        self.proxy_list
            .iter()
            .map(|entry| resolve_address(entry, service::proxies::DEFAULT_PORT))
            .collect()
    }
}

impl AdvertiseConfig {
    /// Whether the listener should run given the static proxy list
    pub fn is_enabled(&self, proxies: &ProxyConfig) -> bool {
        self.enabled.unwrap_or(proxies.proxy_list.is_empty())
    }

    pub fn group(&self) -> SocketAddr {
        SocketAddr::new(self.group_address, self.port)
    }
}

impl ServiceSettings {
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs.max(1))
    }
}

impl ModClusterConfig {
    /// Load configuration from files with environment overrides
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let base = base_path.unwrap_or(Path::new("config/modcluster.toml"));

        let mut builder = Config::builder().add_source(File::from(base).required(true));

        // Add environment-specific overrides if specified
        if let Some(env) = environment {
            let env_file = PathBuf::from("config/environments").join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // Override with environment variables (MODCLUSTER_ prefix)
        builder = builder.add_source(
            Environment::with_prefix("MODCLUSTER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut config: ModClusterConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.expand_env_vars()?;
        config.validate()?;

        debug!(
            proxies = config.proxies.proxy_list.len(),
            advertise = config.advertise.is_enabled(&config.proxies),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Reject settings the node cannot start with
    pub fn validate(&self) -> Result<()> {
        self.proxies
            .resolved_proxies()
            .context("Invalid proxy_list entry")?;

        if self.proxies.socket_timeout_ms == 0 {
            bail!("socket_timeout_ms must be positive");
        }

        if self.advertise.is_enabled(&self.proxies) {
            let group = self.advertise.group_address;
            if !group.is_multicast() {
                bail!("Advertise group {} is not a multicast address", group);
            }
            if let Some(interface) = self.advertise.interface {
                if interface.is_ipv4() != group.is_ipv4() {
                    bail!(
                        "Advertise interface {} does not match the address family of group {}",
                        interface,
                        group
                    );
                }
            }
        }

        if self.load.history == 0 {
            bail!("load.history must be at least 1");
        }
        if self.load.decay_factor < 1.0 {
            bail!("load.decay_factor must be >= 1.0");
        }
        if let Some(factor) = self.load.fixed_factor {
            if !(-1..=100).contains(&factor) {
                bail!("load.fixed_factor must be within -1..=100");
            }
        }

        Ok(())
    }

    /// Expand environment variables in string values
    pub fn expand_env_vars(&mut self) -> Result<()> {
        for entry in &mut self.proxies.proxy_list {
            let expanded = shellexpand::env(entry).context("Failed to expand proxy address")?;
            *entry = expanded.to_string();
        }

        if let Some(key) = &self.advertise.security_key {
            let expanded = shellexpand::env(key).context("Failed to expand security key")?;
            self.advertise.security_key = Some(expanded.to_string());
        }

        Ok(())
    }
}

/// Resolve `host[:port]` (IPv6 literals in brackets) to a socket address.
/// Hostnames go through the blocking system resolver, so async callers
/// should split with `split_host_port` and resolve on the runtime instead.
pub fn resolve_address(entry: &str, default_port: u16) -> Result<SocketAddr> {
    let entry = entry.trim();
    if entry.is_empty() {
        bail!("Empty address");
    }

    let (host, port) = split_host_port(entry, default_port)?;
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve {}", entry))?
        .next()
        .with_context(|| format!("No address found for {}", entry))
}

/// Split `host[:port]` without resolving; brackets are stripped from IPv6
/// literals
pub fn split_host_port(entry: &str, default_port: u16) -> Result<(&str, u16)> {
    if let Some(rest) = entry.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .with_context(|| format!("Unterminated IPv6 literal in {}", entry))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(port, entry)?,
            None if tail.is_empty() => default_port,
            None => bail!("Unexpected characters after IPv6 literal in {}", entry),
        };
        return Ok((host, port));
    }

    match entry.rsplit_once(':') {
        // A bare IPv6 literal has several colons and no port
        Some((host, _)) if host.contains(':') => Ok((entry, default_port)),
        Some((host, port)) => Ok((host, parse_port(port, entry)?)),
        None => Ok((entry, default_port)),
    }
}

fn parse_port(port: &str, entry: &str) -> Result<u16> {
    port.parse::<u16>()
        .with_context(|| format!("Invalid port in {}", entry))
}

/// Convenience function to load configuration with defaults
pub fn load_config(environment: Option<&str>) -> Result<ModClusterConfig> {
    ModClusterConfig::load(None, environment)
}
