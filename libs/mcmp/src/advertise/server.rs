use chrono::{DateTime, Utc};
use modcluster_config::advertise;
use serde::Serialize;
use std::collections::HashMap;

/// A proxy known from its advertise messages, keyed by server name
#[derive(Debug, Clone, Serialize)]
pub struct AdvertisedServer {
    pub name: String,
    /// `Date` header of the last accepted message
    pub date: String,
    pub sequence: String,
    pub status: u16,
    pub status_description: String,
    /// Custom headers that followed `Server`
    pub parameters: HashMap<String, String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl AdvertisedServer {
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// `host:port` of the proxy's management endpoint
    pub fn manager_address(&self) -> Option<&str> {
        self.parameter(advertise::MANAGER_ADDRESS)
    }
}
