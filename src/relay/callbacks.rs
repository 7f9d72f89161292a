use crate::origin::OriginResponse;
use crate::responder::Responder;
use crate::{RelayError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Interception hooks invoked by the relay engine at each phase boundary
///
/// Every hook has a default. All of them do nothing except
/// [`on_error`](Self::on_error), which hands the error back to the caller of
/// [`RelayEngine::start`](crate::RelayEngine::start).
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use http::HeaderValue;
/// use relaysrv::{OriginResponse, RelayCallbacks, Responder, Result};
///
/// struct TagResponses;
///
/// #[async_trait]
/// impl RelayCallbacks for TagResponses {
///     async fn on_headers(&self, response: &mut OriginResponse, _socket: &mut Responder) -> Result<()> {
///         response.headers.insert("x-relayed-by", HeaderValue::from_static("relaysrv"));
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait RelayCallbacks: Send + Sync {
    /// Called once the origin's head is parsed, before anything is written
    /// downstream. Rendering through `responder` takes over the response.
    async fn on_response(
        &self,
        _response: &mut OriginResponse,
        _responder: &mut Responder,
    ) -> Result<()> {
        Ok(())
    }

    /// Called after the status line is written and before headers are
    /// serialized; the last chance to change `response.headers`.
    async fn on_headers(&self, _response: &mut OriginResponse, _socket: &mut Responder) -> Result<()> {
        Ok(())
    }

    /// Called after the whole body was relayed
    async fn on_complete(&self, _response: &OriginResponse) -> Result<()> {
        Ok(())
    }

    /// Called with any error raised during the cycle
    ///
    /// Returning `Ok` lets the engine render its default `500` if nothing was
    /// written yet. Returning `Err` propagates to the caller.
    async fn on_error(&self, error: RelayError, _responder: &mut Responder) -> Result<()> {
        Err(error)
    }
}

/// Callback set with every hook left at its default
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCallbacks;

impl RelayCallbacks for NoCallbacks {}

#[async_trait]
impl<T: RelayCallbacks + ?Sized> RelayCallbacks for Arc<T> {
    async fn on_response(
        &self,
        response: &mut OriginResponse,
        responder: &mut Responder,
    ) -> Result<()> {
        (**self).on_response(response, responder).await
    }

    async fn on_headers(&self, response: &mut OriginResponse, socket: &mut Responder) -> Result<()> {
        (**self).on_headers(response, socket).await
    }

    async fn on_complete(&self, response: &OriginResponse) -> Result<()> {
        (**self).on_complete(response).await
    }

    async fn on_error(&self, error: RelayError, responder: &mut Responder) -> Result<()> {
        (**self).on_error(error, responder).await
    }
}
