//! rosbridge v2 JSON messages.
//!
//! [`request`] builds the outbound operations; [`response`] decodes inbound
//! frames and routes them to event names.

pub mod request;
pub mod response;

pub use request::Request;
pub use response::{Routed, route_message, service_outcome};
