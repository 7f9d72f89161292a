//! Downstream socket writer and synthetic responses
//!
//! [`Responder`] wraps the downstream socket for one cycle. It tracks whether
//! the socket is closed and whether a response head has been written, and it
//! can render a complete [`SyntheticResponse`] in place of the relayed one.

pub mod response;
pub mod writer;


pub use response::{SyntheticBody, SyntheticResponse};
pub use writer::Responder;
