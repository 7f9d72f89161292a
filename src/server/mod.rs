//! Standalone relay server
//!
//! Accepts plain HTTP/1.1 connections, adapts each inbound request into a
//! [`RequestSpec`](crate::RequestSpec) aimed at the configured origin, and hands
//! the connection to a [`RelayEngine`](crate::RelayEngine).

pub mod chunked;
pub mod config;
pub mod inbound;
pub mod listener;

pub use chunked::ChunkedReader;
pub use config::ServerConfig;
pub use inbound::{InboundFraming, InboundRequest, read_request_head};
pub use listener::RelayServer;
