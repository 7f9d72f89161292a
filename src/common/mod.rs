//! Traits and helpers shared across the relaysrv library

pub mod test_utils;
pub mod traits;

pub use test_utils::{capture_downstream, refused_addr, spawn_origin, spawn_scripted_origin};
pub use traits::RelayServerTrait;
