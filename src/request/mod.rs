//! Outbound request description
//!
//! A [`RequestSpec`] is built once per relay cycle from an origin URL and
//! request options, and is immutable once the cycle starts.

pub mod method;
pub mod spec;

pub use method::Method;
pub use spec::{RequestBody, RequestSpec, RequestSpecBuilder};
