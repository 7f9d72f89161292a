use std::time::Duration;

/// Timeouts and buffer limits for relay cycles
///
/// # Examples
///
/// ```
/// use relaysrv::RelayConfigBuilder;
/// use std::time::Duration;
///
/// let config = RelayConfigBuilder::new()
///     .connect_timeout(Duration::from_secs(2))
///     .buffer_size(16 * 1024)
///     .build();
///
/// assert_eq!(config.connect_timeout, Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Deadline for TCP connect and, separately, the TLS handshake
    pub connect_timeout: Duration,
    /// Deadline for each read from the origin
    pub read_timeout: Duration,
    /// Deadline for each write to the origin or the downstream socket
    pub write_timeout: Duration,
    /// Buffer size for copying body bytes
    pub buffer_size: usize,
    /// Maximum size of the origin's response head
    pub max_head_size: usize,
    /// Maximum body size a callback may read into memory
    pub max_buffered_body: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            buffer_size: 8192,
            max_head_size: 64 * 1024,
            max_buffered_body: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Builder for relay configuration
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size.max(1);
        self
    }

    pub fn max_head_size(mut self, size: usize) -> Self {
        self.config.max_head_size = size;
        self
    }

    pub fn max_buffered_body(mut self, size: usize) -> Self {
        self.config.max_buffered_body = size;
        self
    }

    pub fn build(self) -> RelayConfig {
        self.config
    }
}

impl Default for RelayConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_builder() {
        let config = RelayConfigBuilder::new()
            .read_timeout(Duration::from_secs(60))
            .write_timeout(Duration::from_secs(5))
            .buffer_size(2048)
            .max_buffered_body(1024)
            .build();

        assert_eq!(config.read_timeout, Duration::from_secs(60));
        assert_eq!(config.write_timeout, Duration::from_secs(5));
        assert_eq!(config.buffer_size, 2048);
        assert_eq!(config.max_buffered_body, 1024);
        assert_eq!(config.connect_timeout, RelayConfig::default().connect_timeout);
    }

    #[test]
    fn test_zero_buffer_size_is_clamped() {
        let config = RelayConfigBuilder::new().buffer_size(0).build();
        assert_eq!(config.buffer_size, 1);
    }
}
