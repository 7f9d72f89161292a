use super::response::{SyntheticBody, SyntheticResponse};
use crate::Result;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Writer for the downstream socket of one relay cycle
///
/// Every write checks the closed flag first. A failed or timed-out write
/// means the peer is gone: the socket is marked closed and later writes are
/// skipped, without surfacing an error.
pub struct Responder {
    socket: Box<dyn AsyncWrite + Send + Unpin>,
    closed: bool,
    head_started: bool,
    headers_written: bool,
    write_timeout: Duration,
}

impl Responder {
    pub fn new<S>(socket: S) -> Self
    where
        S: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_write_timeout(socket, DEFAULT_WRITE_TIMEOUT)
    }

    pub fn with_write_timeout<S>(socket: S, write_timeout: Duration) -> Self
    where
        S: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            socket: Box::new(socket),
            closed: false,
            head_started: false,
            headers_written: false,
            write_timeout,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns true once a complete status line and header block went out
    pub fn headers_written(&self) -> bool {
        self.headers_written
    }

    /// Returns true once any status line went out
    pub fn head_started(&self) -> bool {
        self.head_started
    }

    /// Renders a complete response and closes the socket
    ///
    /// Returns `false` without writing if the socket is already closed or a
    /// response head was already started on it. A response carrying an
    /// invalid header or reason phrase fails with `Config` and writes nothing.
    pub async fn render(&mut self, response: SyntheticResponse) -> Result<bool> {
        response.validate()?;
        if self.closed {
            return Ok(false);
        }
        if self.head_started {
            warn!(status = %response.status(), "Refusing to render: response head already written");
            return Ok(false);
        }

        debug!(status = %response.status(), "Rendering synthetic response");
        self.head_started = true;
        if self.write(&response.head_bytes()).await {
            self.headers_written = true;
        }

        let streamed = match response.into_body() {
            SyntheticBody::Empty => Ok(()),
            SyntheticBody::Bytes(bytes) => {
                self.write(&bytes).await;
                Ok(())
            }
            SyntheticBody::Stream(mut reader) => self.copy_from(&mut reader).await,
        };

        self.close().await;
        streamed.map(|()| true)
    }

    /// Renders a `302 Found` redirect to `url`
    ///
    /// A `url` that is not a valid header value fails with `Config`.
    pub async fn redirect_to(&mut self, url: &str) -> Result<bool> {
        self.render(SyntheticResponse::redirect(url)).await
    }

    /// Writes raw bytes; returns `false` if nothing was written
    pub async fn write(&mut self, data: &[u8]) -> bool {
        if self.closed {
            return false;
        }
        match timeout(self.write_timeout, self.socket.write_all(data)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "Downstream write failed, treating peer as disconnected");
                self.closed = true;
                false
            }
            Err(_) => {
                warn!(timeout = ?self.write_timeout, "Downstream write timed out");
                self.closed = true;
                false
            }
        }
    }

    pub async fn flush(&mut self) -> bool {
        if self.closed {
            return false;
        }
        match timeout(self.write_timeout, self.socket.flush()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "Downstream flush failed, treating peer as disconnected");
                self.closed = true;
                false
            }
            Err(_) => {
                warn!(timeout = ?self.write_timeout, "Downstream flush timed out");
                self.closed = true;
                false
            }
        }
    }

    /// Shuts the socket down; closing twice is a no-op
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match timeout(self.write_timeout, self.socket.shutdown()).await {
            Ok(Ok(())) => debug!("Downstream socket closed"),
            Ok(Err(e)) => debug!(error = %e, "Downstream shutdown failed"),
            Err(_) => warn!("Downstream shutdown timed out"),
        }
    }

    /// Writes the relayed status line
    pub(crate) async fn write_status_line(&mut self, line: &[u8]) -> bool {
        if self.head_started {
            return false;
        }
        self.head_started = true;
        self.write(line).await
    }

    /// Writes the relayed header block and its terminating blank line
    pub(crate) async fn write_header_block(&mut self, block: &[u8]) -> bool {
        if self.headers_written {
            return false;
        }
        let written = self.write(block).await;
        self.headers_written = written;
        written
    }

    async fn copy_from(
        &mut self,
        reader: &mut Box<dyn tokio::io::AsyncRead + Send + Unpin>,
    ) -> Result<()> {
        let mut buffer = vec![0u8; 8192];
        while !self.closed {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            self.write(&buffer[..n]).await;
        }
        self.flush().await;
        Ok(())
    }
}
