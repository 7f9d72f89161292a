//! Relay engine: one request/response cycle from origin to downstream socket
//!
//! [`RelayEngine`] connects to the origin, hands the response to the
//! [`RelayCallbacks`] hooks at each phase boundary, relays the head and body,
//! and falls back to a default `500` response when a cycle fails before any
//! head was written.

pub mod callbacks;
pub mod config;
pub mod engine;
pub mod observer;


pub use callbacks::{NoCallbacks, RelayCallbacks};
pub use config::{RelayConfig, RelayConfigBuilder};
pub use engine::{RelayEngine, RelayState};
pub use observer::{FetchEvent, FetchObserver, TracingObserver};
