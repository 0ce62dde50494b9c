//! # mod_cluster Management Protocol
//!
//! Node-side implementation of the mod_cluster management protocol (MCMP):
//! registers a web container's engines and contexts with httpd proxies,
//! reports load, and keeps every proxy consistent across failures.
//!
//! ## Architecture
//!
//! ```text
//! container adapter --ContainerEvent--> ModClusterService
//!                                          |
//!            NodeRegistry <----------------+----> McmpHandler ---> Proxy (x N)
//!                 ^                                  ^   |          TCP keep-alive
//!                 |                                  |   +-- status(): INFO, reconcile
//!        DefaultResetRequestSource ------------------+
//!                                                    |
//!   AdvertiseListener --verified datagram--> ProxyDiscovery::add_proxy
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: request/response model, wire codec, INFO/DUMP parsers
//! - [`transports`]: proxy TCP connection, multicast socket
//! - [`proxy`]: per-proxy state machine
//! - [`handler`]: fan-out, status probing, recovery
//! - [`recovery`]: node registry and reconciliation
//! - [`advertise`]: multicast discovery with digest verification
//! - [`load`]: load balance factor providers and metrics
//! - [`service`]: lifecycle and administrative operations

pub mod advertise;
pub mod container;
pub mod error;
pub mod handler;
pub mod load;
pub mod protocol;
pub mod proxy;
pub mod recovery;
pub mod service;
pub mod transports;

pub use advertise::{AdvertiseListener, AdvertisedServer};
pub use container::{
    ConnectorSnapshot, ConnectorType, ContainerEvent, ContextSnapshot, EngineSnapshot,
    HostSnapshot, ServerSnapshot,
};
pub use error::{McmpError, Result};
pub use handler::{ConnectionListener, McmpHandler, ProxyDiscovery};
pub use load::LoadBalanceFactorProvider;
pub use protocol::{McmpRequest, McmpResponse, RequestFactory, RequestType};
pub use proxy::{ProxyIdentity, ProxyState};
pub use recovery::{NodeRegistry, ResetRequestSource};
pub use service::{ModClusterService, ProxyOutcomes};
