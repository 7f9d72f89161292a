use super::head::{BodyFraming, parse_head};
use super::response::OriginResponse;
use super::stream::OriginStream;
use super::tls;
use crate::relay::RelayConfig;
use crate::request::{RequestBody, RequestSpec};
use crate::responder::Responder;
use crate::{RelayError, Result};
use bytes::{Buf, Bytes, BytesMut};
use http::StatusCode;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// One outbound connection to an origin, serving a single request/response cycle
pub struct OriginConnection {
    stream: OriginStream,
    read_ahead: BytesMut,
    peer: String,
    framing: BodyFraming,
    remaining: Option<u64>,
    read_timeout: Duration,
    write_timeout: Duration,
    buffer_size: usize,
    max_head_size: usize,
    max_buffered_body: usize,
    debug: bool,
}

impl OriginConnection {
    /// Connects to the request's origin, performing a TLS handshake for https
    pub async fn connect(request: &RequestSpec, config: &RelayConfig) -> Result<Self> {
        let host = request.host().trim_start_matches('[').trim_end_matches(']');
        let port = request.port();
        let peer = format!("{host}:{port}");

        let tcp = timeout(config.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                RelayError::Timeout(format!(
                    "Connect to {peer} timed out after {:?}",
                    config.connect_timeout
                ))
            })??;
        tcp.set_nodelay(true)?;

        let stream = if request.is_secure() {
            let tls = timeout(
                config.connect_timeout,
                tls::handshake(tcp, host, request.ignore_ssl_errors()),
            )
            .await
            .map_err(|_| {
                RelayError::Timeout(format!(
                    "TLS handshake with {peer} timed out after {:?}",
                    config.connect_timeout
                ))
            })??;
            OriginStream::Tls(Box::new(tls))
        } else {
            OriginStream::Plain(tcp)
        };

        let connection = Self {
            stream,
            read_ahead: BytesMut::with_capacity(config.buffer_size),
            peer,
            framing: BodyFraming::UntilClose,
            remaining: None,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            buffer_size: config.buffer_size,
            max_head_size: config.max_head_size,
            max_buffered_body: config.max_buffered_body,
            debug: request.debug(),
        };
        if connection.debug {
            info!(target: "relaysrv::wire", peer = %connection.peer, tls = connection.stream.is_tls(), "Opened origin connection");
        }
        Ok(connection)
    }

    /// `host:port` of the origin
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Body framing, known once the head has been received
    pub fn framing(&self) -> BodyFraming {
        self.framing
    }

    /// Writes the request line, headers and body to the origin
    ///
    /// The head is serialized before the body is taken out of `request`, so
    /// buffered bodies still get their default `content-length`. A stream
    /// body with neither `content-length` nor chunked encoding is refused
    /// before anything is written.
    pub async fn send(&mut self, request: &mut RequestSpec) -> Result<()> {
        request.check_body_framing()?;

        let head = request.head_bytes();
        self.trace_wire("->", &head);
        self.write_origin(&head).await?;

        match request.take_body() {
            RequestBody::Empty => {}
            RequestBody::Buffer(bytes) if request.is_chunked() => {
                if !bytes.is_empty() {
                    self.write_chunk(&bytes).await?;
                }
                self.write_origin(LAST_CHUNK).await?;
                self.trace_size("->", bytes.len());
            }
            RequestBody::Buffer(bytes) => {
                self.write_origin(&bytes).await?;
                self.trace_size("->", bytes.len());
            }
            RequestBody::Stream(mut reader) => {
                let sent = if request.is_chunked() {
                    self.send_chunked(&mut reader).await?
                } else {
                    self.send_stream(&mut reader).await?
                };
                self.trace_size("->", sent);
            }
        }

        timeout(self.write_timeout, self.stream.flush())
            .await
            .map_err(|_| self.write_timeout_error())??;
        Ok(())
    }

    /// Reads and parses the response head, skipping interim 1xx responses
    ///
    /// The connection moves into the returned response, which owns the
    /// not-yet-read body.
    pub async fn receive_head(mut self, request: &RequestSpec) -> Result<OriginResponse> {
        loop {
            if let Some((head, len)) = parse_head(&self.read_ahead)? {
                self.trace_wire("<-", &self.read_ahead[..len]);
                self.read_ahead.advance(len);

                if head.status.is_informational() && head.status != StatusCode::SWITCHING_PROTOCOLS
                {
                    debug!(peer = %self.peer, status = %head.status, "Skipping interim response");
                    continue;
                }

                self.framing = BodyFraming::for_response(request.method(), &head)?;
                self.remaining = self.framing.limit();
                return Ok(OriginResponse::new(head, self));
            }

            if self.read_ahead.len() >= self.max_head_size {
                return Err(RelayError::Protocol(format!(
                    "Response head exceeds {} bytes",
                    self.max_head_size
                )));
            }

            if self.fill_read_ahead().await? == 0 {
                return Err(RelayError::Connection(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} closed the connection before sending a response head", self.peer),
                )));
            }
        }
    }

    /// Drains bytes already pulled into the read-ahead buffer into `dest`
    ///
    /// Must run once, before [`copy_remaining`](Self::copy_remaining).
    pub async fn flush_buffered_bytes(&mut self, dest: &mut Responder) -> Result<u64> {
        let take = self.budget(self.read_ahead.len());
        let chunk = self.read_ahead.split_to(take);
        // Anything past the declared body length is not part of this response.
        self.read_ahead.clear();
        self.consume_budget(chunk.len());

        if !chunk.is_empty() {
            dest.write(&chunk).await;
        }
        dest.flush().await;
        self.trace_size("<-", chunk.len());
        Ok(chunk.len() as u64)
    }

    /// Copies the rest of the body directly from the transport into `dest`
    ///
    /// Stops at origin EOF, once the declared length is reached, or when the
    /// downstream socket closes.
    pub async fn copy_remaining(&mut self, dest: &mut Responder) -> Result<u64> {
        let mut buffer = vec![0u8; self.buffer_size];
        let mut copied = 0u64;

        while self.remaining != Some(0) && !dest.is_closed() {
            let want = self.budget(buffer.len());
            let n = self.read_transport(&mut buffer[..want]).await?;
            if n == 0 {
                if let Some(missing) = self.remaining {
                    warn!(peer = %self.peer, missing, "Origin closed before the declared body length");
                }
                break;
            }
            self.consume_budget(n);
            if !dest.write(&buffer[..n]).await {
                break;
            }
            copied += n as u64;
        }

        dest.flush().await;
        self.trace_size("<-", copied as usize);
        Ok(copied)
    }

    /// Materializes the whole body, decoding chunked framing
    pub(crate) async fn read_body(&mut self) -> Result<Bytes> {
        let body = match self.framing {
            BodyFraming::Empty => Bytes::new(),
            BodyFraming::Length(n) => {
                let n = usize::try_from(n).unwrap_or(usize::MAX);
                self.check_body_size(n)?;
                self.read_exact_buffered(n).await?
            }
            BodyFraming::Chunked => self.read_chunked().await?,
            BodyFraming::UntilClose => {
                while self.fill_read_ahead().await? > 0 {
                    self.check_body_size(self.read_ahead.len())?;
                }
                self.read_ahead.split().freeze()
            }
        };
        self.remaining = Some(0);
        self.trace_size("<-", body.len());
        Ok(body)
    }

    async fn read_chunked(&mut self) -> Result<Bytes> {
        let mut body = BytesMut::new();
        loop {
            let line = self.read_line().await?;
            let size_field = line.split(';').next().unwrap_or_default().trim();
            let size = usize::from_str_radix(size_field, 16)
                .map_err(|_| RelayError::Protocol(format!("Invalid chunk size {size_field:?}")))?;

            if size == 0 {
                // Trailer section ends with an empty line.
                while !self.read_line().await?.is_empty() {}
                return Ok(body.freeze());
            }

            self.check_body_size(body.len().saturating_add(size))?;
            let chunk = self.read_exact_buffered(size).await?;
            body.extend_from_slice(&chunk);

            if !self.read_line().await?.is_empty() {
                return Err(RelayError::Protocol("Missing CRLF after chunk data".to_string()));
            }
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(pos) = self.read_ahead.windows(2).position(|w| w == b"\r\n") {
                let line = self.read_ahead.split_to(pos + 2);
                return Ok(String::from_utf8_lossy(&line[..pos]).into_owned());
            }
            if self.read_ahead.len() > self.max_head_size {
                return Err(RelayError::Protocol("Chunk header line too long".to_string()));
            }
            if self.fill_read_ahead().await? == 0 {
                return Err(RelayError::Protocol("Unexpected EOF in chunked body".to_string()));
            }
        }
    }

    async fn read_exact_buffered(&mut self, n: usize) -> Result<Bytes> {
        while self.read_ahead.len() < n {
            if self.fill_read_ahead().await? == 0 {
                return Err(RelayError::Protocol(format!(
                    "Unexpected EOF: expected {n} body bytes, got {}",
                    self.read_ahead.len()
                )));
            }
        }
        Ok(self.read_ahead.split_to(n).freeze())
    }

    async fn fill_read_ahead(&mut self) -> Result<usize> {
        self.read_ahead.reserve(self.buffer_size);
        match timeout(self.read_timeout, self.stream.read_buf(&mut self.read_ahead)).await {
            Ok(result) => eof_as_zero(result),
            Err(_) => Err(self.read_timeout_error()),
        }
    }

    async fn read_transport(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match timeout(self.read_timeout, self.stream.read(buffer)).await {
            Ok(result) => eof_as_zero(result),
            Err(_) => Err(self.read_timeout_error()),
        }
    }

    async fn write_origin(&mut self, data: &[u8]) -> Result<()> {
        timeout(self.write_timeout, self.stream.write_all(data))
            .await
            .map_err(|_| self.write_timeout_error())??;
        Ok(())
    }

    async fn send_stream<R: AsyncRead + Unpin + ?Sized>(&mut self, reader: &mut R) -> Result<usize> {
        let mut buffer = vec![0u8; self.buffer_size];
        let mut sent = 0;
        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                return Ok(sent);
            }
            self.write_origin(&buffer[..n]).await?;
            sent += n;
        }
    }

    async fn send_chunked<R: AsyncRead + Unpin + ?Sized>(&mut self, reader: &mut R) -> Result<usize> {
        let mut buffer = vec![0u8; self.buffer_size];
        let mut sent = 0;
        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                self.write_origin(LAST_CHUNK).await?;
                return Ok(sent);
            }
            self.write_chunk(&buffer[..n]).await?;
            sent += n;
        }
    }

    async fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        let mut chunk = format!("{:x}\r\n", data.len()).into_bytes();
        chunk.extend_from_slice(data);
        chunk.extend_from_slice(b"\r\n");
        self.write_origin(&chunk).await
    }

    fn budget(&self, available: usize) -> usize {
        match self.remaining {
            Some(remaining) => available.min(usize::try_from(remaining).unwrap_or(usize::MAX)),
            None => available,
        }
    }

    fn consume_budget(&mut self, n: usize) {
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(n as u64);
        }
    }

    fn check_body_size(&self, size: usize) -> Result<()> {
        if size > self.max_buffered_body {
            return Err(RelayError::Config(format!(
                "Response body too large to buffer: {size} bytes, max allowed: {}",
                self.max_buffered_body
            )));
        }
        Ok(())
    }

    fn read_timeout_error(&self) -> RelayError {
        RelayError::Timeout(format!(
            "Read from {} timed out after {:?}",
            self.peer, self.read_timeout
        ))
    }

    fn write_timeout_error(&self) -> RelayError {
        RelayError::Timeout(format!(
            "Write to {} timed out after {:?}",
            self.peer, self.write_timeout
        ))
    }

    fn trace_wire(&self, direction: &'static str, data: &[u8]) {
        if self.debug {
            info!(target: "relaysrv::wire", peer = %self.peer, direction, data = %String::from_utf8_lossy(data));
        }
    }

    fn trace_size(&self, direction: &'static str, size: usize) {
        if self.debug && size > 0 {
            info!(target: "relaysrv::wire", peer = %self.peer, direction, size, "Body bytes");
        }
    }
}

/// TLS origins often close without `close_notify`; that is still end of body.
fn eof_as_zero(result: io::Result<usize>) -> Result<usize> {
    match result {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(0),
        Err(e) => Err(e.into()),
    }
}
