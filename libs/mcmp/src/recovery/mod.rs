//! Proxy recovery
//!
//! When a proxy comes back from `Error` the handler fetches its INFO report
//! and asks a `ResetRequestSource` which requests bring the proxy back in line
//! with the node. The default source compares against the `NodeRegistry`.

pub mod registry;
pub mod reset;

pub use registry::{ExcludedContext, NodeRegistry};
pub use reset::DefaultResetRequestSource;

use crate::protocol::{McmpRequest, ProxyInfo};

/// Computes the corrective requests for one proxy's reported state
pub trait ResetRequestSource: Send + Sync {
    /// Requests in send order; removals of an engine precede its additions
    fn reset_requests(&self, info: &ProxyInfo) -> Vec<McmpRequest>;
}
