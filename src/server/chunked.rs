use bytes::{Buf, Bytes, BytesMut};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, ReadBuf};

const MAX_LINE_LEN: usize = 4096;
const READ_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
    Done,
}

/// Decodes a chunked request body into its payload bytes
///
/// EOF is reported as soon as the trailer section ends, so the client does
/// not have to close its side for the body to be complete. Chunk extensions
/// and trailers are discarded.
pub struct ChunkedReader<R> {
    inner: R,
    buffer: BytesMut,
    state: ChunkState,
}

impl<R> ChunkedReader<R> {
    /// Decodes `prefix` first, then whatever `inner` yields
    pub fn new(prefix: Bytes, inner: R) -> Self {
        Self {
            inner,
            buffer: BytesMut::from(&prefix[..]),
            state: ChunkState::Size,
        }
    }

    /// Moves buffered payload into `out`
    ///
    /// Returns false when more input is needed to make progress.
    fn decode(&mut self, out: &mut ReadBuf<'_>) -> io::Result<bool> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let Some(line) = self.take_line()? else {
                        return Ok(false);
                    };
                    let field = line.split(';').next().unwrap_or_default().trim();
                    let size = u64::from_str_radix(field, 16)
                        .map_err(|_| invalid_data(format!("invalid chunk size {field:?}")))?;
                    self.state = if size == 0 {
                        ChunkState::Trailers
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(remaining) => {
                    if self.buffer.is_empty() {
                        return Ok(false);
                    }
                    let n = usize::try_from(remaining)
                        .unwrap_or(usize::MAX)
                        .min(self.buffer.len())
                        .min(out.remaining());
                    out.put_slice(&self.buffer[..n]);
                    self.buffer.advance(n);

                    let remaining = remaining - n as u64;
                    self.state = if remaining == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(remaining)
                    };
                    return Ok(true);
                }
                ChunkState::DataEnd => {
                    let Some(line) = self.take_line()? else {
                        return Ok(false);
                    };
                    if !line.is_empty() {
                        return Err(invalid_data("missing CRLF after chunk data".to_string()));
                    }
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    let Some(line) = self.take_line()? else {
                        return Ok(false);
                    };
                    if line.is_empty() {
                        self.state = ChunkState::Done;
                    }
                }
                ChunkState::Done => return Ok(true),
            }
        }
    }

    fn take_line(&mut self) -> io::Result<Option<String>> {
        match self.buffer.windows(2).position(|w| w == b"\r\n") {
            Some(pos) => {
                let line = self.buffer.split_to(pos + 2);
                std::str::from_utf8(&line[..pos])
                    .map(|line| Some(line.to_string()))
                    .map_err(|_| invalid_data("chunk framing is not valid UTF-8".to_string()))
            }
            None if self.buffer.len() > MAX_LINE_LEN => Err(invalid_data(format!(
                "chunk framing line exceeds {MAX_LINE_LEN} bytes"
            ))),
            None => Ok(None),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ChunkedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if out.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            if this.decode(out)? {
                return Poll::Ready(Ok(()));
            }

            let mut chunk = [0u8; READ_SIZE];
            let mut read = ReadBuf::new(&mut chunk);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut read))?;
            if read.filled().is_empty() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "client closed the connection inside a chunked body",
                )));
            }
            this.buffer.extend_from_slice(read.filled());
        }
    }
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
