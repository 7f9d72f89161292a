use crate::RelayError;
use crate::request::Method;
use http::HeaderMap;
use std::time::Duration;
use tracing::{info, warn};

/// What was fetched from the origin
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
}

/// Instrumentation notified around each origin fetch
pub trait FetchObserver: Send + Sync {
    fn on_start(&self, _event: &FetchEvent) {}

    fn on_finish(&self, _event: &FetchEvent, _elapsed: Duration) {}

    fn on_error(&self, _event: &FetchEvent, _error: &RelayError, _elapsed: Duration) {}
}

/// Reports fetches as `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl FetchObserver for TracingObserver {
    fn on_start(&self, event: &FetchEvent) {
        info!(method = %event.method, url = %event.url, headers = event.headers.len(), "Fetching from origin");
    }

    fn on_finish(&self, event: &FetchEvent, elapsed: Duration) {
        info!(method = %event.method, url = %event.url, ?elapsed, "Fetch finished");
    }

    fn on_error(&self, event: &FetchEvent, error: &RelayError, elapsed: Duration) {
        warn!(method = %event.method, url = %event.url, ?elapsed, error = %error, "Fetch failed");
    }
}
