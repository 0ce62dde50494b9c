//! Proxy Discovery via Advertise
//!
//! ## Purpose
//!
//! httpd proxies running mod_cluster periodically multicast a short
//! announcement naming themselves and their management address. The listener
//! picks these up so nodes find proxies without a static `proxy_list`.
//!
//! ## Authentication
//!
//! Each announcement carries an MD5 digest over a salt, the `Date`, the
//! `Sequence` and the `Server` name. The salt is derived from a shared
//! security key, so an announcement from a proxy with another key (or a forged
//! one) never registers a proxy. Failures are logged at trace level only.
//!
//! ## Lifecycle
//!
//! ```text
//! AdvertiseListener::start -> bind + join group -> spawn receive loop
//!     datagram -> AdvertiseProcessor::process_datagram
//!         new server with X-Manager-Address -> ProxyDiscovery::add_proxy
//! AdvertiseListener::close -> watch signal -> loop exits, group left
//! ```
//!
//! Server records live as long as the listener; they are refreshed in place
//! and never expire.

pub mod digest;
pub mod listener;
pub mod processor;
pub mod server;

pub use digest::DigestVerifier;
pub use listener::AdvertiseListener;
pub use processor::{build_datagram, AdvertiseOutcome, AdvertiseProcessor};
pub use server::AdvertisedServer;
