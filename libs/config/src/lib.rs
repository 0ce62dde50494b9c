//! # mod_cluster Node Configuration
//!
//! Immutable configuration for the MCMP handler, the advertise listener and
//! the node service. A `ModClusterConfig` is built once at startup and handed
//! by reference to every component; nothing in the agent mutates it afterwards.
//!
//! ## Features
//!
//! - **Protocol Constants**: MCMP header names, advertise defaults, user agent
//! - **Service Defaults**: timeouts, ports, load history tuning
//! - **Config Loading**: TOML file + environment overlay + `MODCLUSTER_` variables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use modcluster_config::ModClusterConfig;
//!
//! let config = ModClusterConfig::load(None, Some("production")).unwrap();
//! let timeout = config.proxies.socket_timeout();
//! ```

pub mod protocol;
pub mod service;
pub mod service_config;

// Re-export commonly used types
pub use protocol::*;
pub use service_config::{
    load_config, resolve_address, split_host_port, AdvertiseConfig, BalancerConfig, FlushPackets, LoadConfig, ModClusterConfig,
    NodeConfig, ProxyConfig, ServiceSettings,
};
