use crate::relay::RelayConfig;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

/// Configuration for the relay server
///
/// # Examples
///
/// ```
/// use relaysrv::ServerConfig;
/// use url::Url;
///
/// let mut config = ServerConfig::new(Url::parse("http://127.0.0.1:9000").unwrap());
/// config.bind_addr = "127.0.0.1:8080".parse().unwrap();
/// config.max_connections = 100;
///
/// assert_eq!(config.origin.port(), Some(9000));
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Base URL every inbound request path is appended to
    pub origin: Url,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Deadline for receiving the inbound request head
    pub read_timeout: Duration,
    /// Maximum size of the inbound request head
    pub max_head_size: usize,
    /// Timeouts and limits for each relay cycle
    pub relay: RelayConfig,
    /// Skip TLS certificate verification for https origins
    pub ignore_ssl_errors: bool,
    /// Wire-level tracing of origin traffic
    pub debug: bool,
}

impl ServerConfig {
    pub fn new(origin: Url) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            origin,
            max_connections: 1000,
            read_timeout: Duration::from_secs(30),
            max_head_size: 64 * 1024,
            relay: RelayConfig::default(),
            ignore_ssl_errors: false,
            debug: false,
        }
    }
}
