use super::connection::OriginConnection;
use super::head::{BodyFraming, ResponseHead};
use crate::responder::Responder;
use crate::{RelayError, Result};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::fmt;

/// Response received from the origin
///
/// Headers are mutable so callbacks can rewrite them before they are relayed.
/// The body stays on the wire until it is either read by a callback through
/// [`read_body`](Self::read_body) or relayed by the engine, never both.
pub struct OriginResponse {
    pub status: StatusCode,
    pub message: String,
    pub headers: HeaderMap,
    connection: OriginConnection,
    consumed: bool,
}

impl OriginResponse {
    pub(crate) fn new(head: ResponseHead, connection: OriginConnection) -> Self {
        Self {
            status: head.status,
            message: head.message,
            headers: head.headers,
            connection,
            consumed: false,
        }
    }

    /// Returns true once the body has been read
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// How the origin framed the body
    pub fn framing(&self) -> BodyFraming {
        self.connection.framing()
    }

    /// Reads the entire body into memory
    ///
    /// After this call the engine has nothing left to relay, so a callback that
    /// reads the body must also render its own response.
    pub async fn read_body(&mut self) -> Result<Bytes> {
        self.mark_consumed()?;
        self.connection.read_body().await
    }

    /// Streams the body to `dest`: read-ahead bytes first, then a direct copy
    pub(crate) async fn relay_body(&mut self, dest: &mut Responder) -> Result<u64> {
        self.mark_consumed()?;
        let buffered = self.connection.flush_buffered_bytes(dest).await?;
        let copied = self.connection.copy_remaining(dest).await?;
        Ok(buffered + copied)
    }

    fn mark_consumed(&mut self) -> Result<()> {
        if self.consumed {
            return Err(RelayError::BodyAlreadyConsumed);
        }
        self.consumed = true;
        Ok(())
    }
}

impl fmt::Debug for OriginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OriginResponse")
            .field("status", &self.status)
            .field("message", &self.message)
            .field("headers", &self.headers)
            .field("peer", &self.connection.peer())
            .field("consumed", &self.consumed)
            .finish()
    }
}
