use super::config::ServerConfig;
use super::inbound::read_request_head;
use crate::common::RelayServerTrait;
use crate::origin::OriginResponse;
use crate::relay::{RelayCallbacks, RelayEngine};
use crate::responder::{Responder, SyntheticResponse};
use crate::{RelayError, Result};
use async_trait::async_trait;
use http::StatusCode;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tracing::{Instrument, debug, error, info, warn};

/// TCP server relaying every inbound request to a fixed origin
///
/// Each accepted connection carries one request. The request head is parsed,
/// its path is appended to the configured origin, and a [`RelayEngine`] streams
/// the origin's response back on the same connection.
///
/// # Examples
///
/// ```no_run
/// use relaysrv::{RelayServer, RelayServerTrait, ServerConfig};
/// use url::Url;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut config = ServerConfig::new(Url::parse("https://example.com")?);
///     config.bind_addr = "127.0.0.1:8080".parse()?;
///
///     let server = RelayServer::new(config);
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct RelayServer {
    config: ServerConfig,
    shutdown_signal: Arc<broadcast::Sender<()>>,
}

/// Hooks installed by the server: failures are logged and answered with the default 500
struct LogFailures;

#[async_trait]
impl RelayCallbacks for LogFailures {
    async fn on_complete(&self, response: &OriginResponse) -> Result<()> {
        debug!(status = %response.status, "Origin response relayed");
        Ok(())
    }

    async fn on_error(&self, error: RelayError, _responder: &mut Responder) -> Result<()> {
        error!(error = %error, "Relay failed");
        Ok(())
    }
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_signal, _) = broadcast::channel(1);
        Self {
            config,
            shutdown_signal: Arc::new(shutdown_signal),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accepts connections from an already-bound listener until shut down
    ///
    /// At most `max_connections` relays run at once. A client arriving while
    /// every slot is taken is dropped without a response.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(address = %listener.local_addr()?, origin = %self.config.origin, "Relay server listening");

        let limit = self.config.max_connections.min(Semaphore::MAX_PERMITS);
        let slots = Arc::new(Semaphore::new(limit));
        let mut shutdown_rx = self.shutdown_signal.subscribe();

        loop {
            let (stream, addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        continue;
                    }
                },
                _ = signal::ctrl_c() => break,
                _ = shutdown_rx.recv() => break,
            };

            let Ok(slot) = slots.clone().try_acquire_owned() else {
                warn!(%addr, limit, "Relay at capacity, dropping client");
                continue;
            };
            self.spawn_relay(stream, addr, slot);
        }

        info!("Relay server stopped");
        Ok(())
    }

    fn spawn_relay(&self, stream: TcpStream, addr: SocketAddr, slot: OwnedSemaphorePermit) {
        let config = self.config.clone();
        let span = tracing::info_span!("relay", %addr);
        tokio::spawn(
            async move {
                debug!("Client connected");
                if let Err(e) = Self::handle_connection(stream, addr, config).await {
                    error!(error = %e, "Relay connection failed");
                }
                drop(slot);
                debug!("Client finished");
            }
            .instrument(span),
        );
    }

    /// Reads one request from `stream` and relays the origin's response onto it
    async fn handle_connection(stream: TcpStream, addr: SocketAddr, config: ServerConfig) -> Result<()> {
        stream.set_nodelay(true)?;
        let (mut reader, writer) = stream.into_split();

        let adapted = match read_request_head(&mut reader, config.max_head_size, config.read_timeout).await {
            Ok((inbound, leftover)) => {
                info!(%addr, method = %inbound.method, target = %inbound.target, "Relaying request");
                inbound.into_request_spec(
                    &config.origin,
                    leftover,
                    reader,
                    config.ignore_ssl_errors,
                    config.debug,
                )
            }
            Err(e) => Err(e),
        };

        let request = match adapted {
            Ok(request) => request,
            Err(e) => {
                warn!(%addr, error = %e, "Rejecting request");
                let mut responder = Responder::with_write_timeout(writer, config.relay.write_timeout);
                let response = SyntheticResponse::new(rejection_status(&e)).text(e.to_string());
                responder.render(response).await?;
                return Ok(());
            }
        };

        RelayEngine::with_callbacks(request, LogFailures)
            .config(config.relay)
            .start(writer)
            .await
    }
}

/// Status sent when an inbound request cannot be relayed
fn rejection_status(error: &RelayError) -> StatusCode {
    match error {
        RelayError::UnsupportedMethod(_) => StatusCode::NOT_IMPLEMENTED,
        RelayError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl RelayServerTrait for RelayServer {
    async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_signal.as_ref().clone()
    }
}
