//! Mod-Cluster Management Protocol
//!
//! Request and response models, the wire codec, the request factory and the
//! INFO/DUMP body parsers.

pub mod codec;
pub mod factory;
pub mod info;
pub mod request;
pub mod response;

pub use codec::{decode_request, decode_response, encode_body, encode_request};
pub use factory::RequestFactory;
pub use info::{parse_dump, parse_info, ContextStatus, DumpRecord, ProxyInfo, VirtualHost};
pub use request::{McmpRequest, RequestType};
pub use response::{McmpResponse, ResponseHead};
