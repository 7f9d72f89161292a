use thiserror::Error;

/// Boxed error raised from inside a user-supplied hook
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for the relaysrv library
#[derive(Error, Debug)]
pub enum RelayError {
    /// Origin unreachable, reset, or failed while reading/writing
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// TLS configuration or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connect or read deadline elapsed
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Malformed response head or body framing from the origin
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error raised inside a relay callback
    #[error("Callback error: {0}")]
    Callback(BoxError),

    /// A callback read the response body without rendering a response
    #[error("Response body already consumed")]
    BodyAlreadyConsumed,

    /// The origin URL could not be used
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Request method outside the supported set
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization errors for synthetic responses
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    /// Wraps an arbitrary error raised by a callback
    pub fn callback<E: Into<BoxError>>(err: E) -> Self {
        RelayError::Callback(err.into())
    }

    /// Returns true for errors caused by the origin transport
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            RelayError::Connection(_) | RelayError::Tls(_) | RelayError::Timeout(_)
        )
    }
}

impl From<url::ParseError> for RelayError {
    fn from(err: url::ParseError) -> Self {
        RelayError::InvalidUrl(err.to_string())
    }
}

/// Result type for the relaysrv library
pub type Result<T> = std::result::Result<T, RelayError>;

pub mod common;
pub mod origin;
pub mod relay;
pub mod request;
pub mod responder;
pub mod server;

// Re-export main types for convenience
pub use common::RelayServerTrait;
pub use origin::{OriginConnection, OriginResponse};
pub use relay::{
    FetchEvent, FetchObserver, NoCallbacks, RelayCallbacks, RelayConfig, RelayConfigBuilder,
    RelayEngine, TracingObserver,
};
pub use request::{Method, RequestBody, RequestSpec};
pub use responder::{Responder, SyntheticBody, SyntheticResponse};
pub use server::{RelayServer, ServerConfig};
