//! Request and response types exchanged with the routing layer.

mod request;
mod response;

pub use request::InboundRequest;
pub use response::{CacheStatus, ServedResponse};
