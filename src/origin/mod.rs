//! Outbound connection to the origin server
//!
//! An [`OriginConnection`] serves exactly one request/response cycle. Once the
//! response head is parsed the connection moves into the [`OriginResponse`],
//! whose body is relayed in two phases: bytes already pulled into the
//! read-ahead buffer, then a direct copy from the transport.

pub mod connection;
pub mod head;
pub mod response;
pub mod stream;
pub mod tls;

#[cfg(test)]
mod tests;

pub use connection::OriginConnection;
pub use head::{BodyFraming, ResponseHead};
pub use response::OriginResponse;
pub use stream::OriginStream;
