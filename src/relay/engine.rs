use super::callbacks::{NoCallbacks, RelayCallbacks};
use super::config::RelayConfig;
use super::observer::{FetchEvent, FetchObserver, TracingObserver};
use crate::origin::{OriginConnection, OriginResponse};
use crate::request::RequestSpec;
use crate::responder::{Responder, SyntheticResponse};
use crate::{RelayError, Result};
use http::header::{self, HeaderValue};
use http::StatusCode;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, trace, warn};

/// Response headers never relayed downstream
const DISALLOWED_RESPONSE_HEADERS: &[&str] = &["keep-alive"];

/// Phase of a relay cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Init,
    Connecting,
    HeadReceived,
    ResponseCallback,
    HeadersWritten,
    BodyRelay,
    Complete,
    Error,
    Closed,
}

impl RelayState {
    /// Returns true if the state machine may move from `self` to `next`
    pub fn allows(self, next: RelayState) -> bool {
        use RelayState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Error) => !matches!(self, Complete | Error),
            (_, Closed) => matches!(
                self,
                ResponseCallback | HeadersWritten | BodyRelay | Complete | Error
            ),
            (Init, Connecting)
            | (Connecting, HeadReceived)
            | (HeadReceived, ResponseCallback)
            | (ResponseCallback, HeadersWritten)
            | (HeadersWritten, BodyRelay)
            | (BodyRelay, Complete) => true,
            _ => false,
        }
    }
}

/// Drives one request/response cycle from an origin to a downstream socket
///
/// # Examples
///
/// ```no_run
/// use relaysrv::{RelayEngine, RequestSpec};
/// use tokio::net::TcpListener;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let listener = TcpListener::bind("127.0.0.1:8080").await?;
///     let (socket, _) = listener.accept().await?;
///
///     let request = RequestSpec::get("http://example.com/")?;
///     RelayEngine::new(request).start(socket).await?;
///     Ok(())
/// }
/// ```
pub struct RelayEngine<C = NoCallbacks> {
    request: RequestSpec,
    callbacks: C,
    config: RelayConfig,
    observer: Arc<dyn FetchObserver>,
    state: RelayState,
}

impl RelayEngine<NoCallbacks> {
    /// Creates an engine with default hooks
    pub fn new(request: RequestSpec) -> Self {
        Self::with_callbacks(request, NoCallbacks)
    }
}

impl<C: RelayCallbacks> RelayEngine<C> {
    pub fn with_callbacks(request: RequestSpec, callbacks: C) -> Self {
        Self {
            request,
            callbacks,
            config: RelayConfig::default(),
            observer: Arc::new(TracingObserver),
            state: RelayState::Init,
        }
    }

    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn FetchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Relays the origin response onto `socket`, closing it when done
    ///
    /// Outcomes are reported through the callbacks and the bytes written to
    /// the socket. An `Err` is returned only when `on_error` itself fails,
    /// which is what the default hook does. The socket is closed on every path.
    pub async fn start<S>(&mut self, socket: S) -> Result<()>
    where
        S: AsyncWrite + Send + Unpin + 'static,
    {
        if self.state != RelayState::Init {
            return Err(RelayError::Config(
                "Relay cycle already started for this engine".to_string(),
            ));
        }

        let mut responder = Responder::with_write_timeout(socket, self.config.write_timeout);
        let event = FetchEvent {
            method: self.request.method(),
            url: self.request.url().to_string(),
            headers: self.request.outbound_headers(),
        };
        let span = tracing::info_span!("relay", method = %event.method, url = %event.url);

        self.run_cycle(&mut responder, event).instrument(span).await
    }

    async fn run_cycle(&mut self, responder: &mut Responder, event: FetchEvent) -> Result<()> {
        let started = Instant::now();
        self.observer.on_start(&event);

        let result = match self.relay(responder).await {
            Ok(()) => {
                self.observer.on_finish(&event, started.elapsed());
                Ok(())
            }
            Err(error) => {
                self.observer.on_error(&event, &error, started.elapsed());
                self.recover(error, responder).await
            }
        };

        responder.close().await;
        self.advance(RelayState::Closed);
        result
    }

    async fn relay(&mut self, responder: &mut Responder) -> Result<()> {
        self.advance(RelayState::Connecting);
        let mut connection = OriginConnection::connect(&self.request, &self.config).await?;
        connection.send(&mut self.request).await?;
        let mut response = connection.receive_head(&self.request).await?;
        self.advance(RelayState::HeadReceived);
        debug!(status = %response.status, framing = ?response.framing(), "Received origin response head");

        self.advance(RelayState::ResponseCallback);
        self.callbacks.on_response(&mut response, responder).await?;
        if responder.is_closed() {
            debug!("Response taken over by on_response");
            return Ok(());
        }

        self.write_head(&mut response, responder).await?;
        if responder.is_closed() {
            debug!("Downstream closed while writing the response head");
            return Ok(());
        }
        self.advance(RelayState::HeadersWritten);

        if response.is_consumed() {
            return Err(RelayError::BodyAlreadyConsumed);
        }

        self.advance(RelayState::BodyRelay);
        let relayed = response.relay_body(responder).await?;
        if responder.is_closed() {
            debug!(relayed, "Downstream closed during body relay");
            return Ok(());
        }

        self.callbacks.on_complete(&response).await?;
        self.advance(RelayState::Complete);
        info!(status = %response.status, relayed, "Relay complete");
        Ok(())
    }

    /// Writes the status line, runs `on_headers`, then writes the header block
    async fn write_head(&self, response: &mut OriginResponse, responder: &mut Responder) -> Result<()> {
        let status_line = format!(
            "HTTP/1.1 {} {}\r\n",
            response.status.as_u16(),
            response.message
        );
        if !responder.write_status_line(status_line.as_bytes()).await {
            return Ok(());
        }

        // Connections are never reused once handed over to the relay.
        response
            .headers
            .insert(header::CONNECTION, HeaderValue::from_static("close"));

        self.callbacks.on_headers(response, responder).await?;
        if responder.is_closed() {
            return Ok(());
        }
        response
            .headers
            .insert(header::CONNECTION, HeaderValue::from_static("close"));

        let mut block = Vec::with_capacity(512);
        for (name, value) in response.headers.iter() {
            if DISALLOWED_RESPONSE_HEADERS.contains(&name.as_str()) {
                continue;
            }
            block.extend_from_slice(name.as_str().as_bytes());
            block.extend_from_slice(b": ");
            block.extend_from_slice(value.as_bytes());
            block.extend_from_slice(b"\r\n");
        }
        block.extend_from_slice(b"\r\n");

        responder.write_header_block(&block).await;
        Ok(())
    }

    /// Error path: `on_error`, then the default 500 if nothing was written
    async fn recover(&mut self, error: RelayError, responder: &mut Responder) -> Result<()> {
        self.advance(RelayState::Error);
        warn!(error = %error, "Relay cycle failed");

        self.callbacks.on_error(error, responder).await?;

        if !responder.is_closed() && !responder.headers_written() {
            let fallback = SyntheticResponse::new(StatusCode::INTERNAL_SERVER_ERROR)
                .text("Internal Server Error");
            if let Err(e) = responder.render(fallback).await {
                warn!(error = %e, "Failed to render default error response");
            }
        }
        Ok(())
    }

    fn advance(&mut self, next: RelayState) {
        if !self.state.allows(next) {
            warn!(from = ?self.state, to = ?next, "Unexpected relay state transition");
        }
        trace!(from = ?self.state, to = ?next, "Relay state transition");
        self.state = next;
    }
}
