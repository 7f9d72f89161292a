use crate::{RelayError, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Capacity of the in-memory pipe returned by [`capture_downstream`]
const DOWNSTREAM_CAPACITY: usize = 64 * 1024;

/// Spawns a one-shot origin that replies with `response` after reading a request
///
/// The handle resolves to the raw request bytes the origin received.
pub async fn spawn_origin(response: &[u8]) -> Result<(JoinHandle<Vec<u8>>, SocketAddr)> {
    spawn_scripted_origin(vec![response.to_vec()]).await
}

/// Spawns a one-shot origin that writes each chunk as a separate segment
///
/// A short pause between chunks makes the relay see the head and body in
/// separate reads, which exercises the read-ahead/raw-copy boundary.
pub async fn spawn_scripted_origin(
    chunks: Vec<Vec<u8>>,
) -> Result<(JoinHandle<Vec<u8>>, SocketAddr)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| RelayError::Config(format!("Failed to bind origin listener: {e}")))?;
    let addr = listener
        .local_addr()
        .map_err(|e| RelayError::Config(format!("Failed to get local address: {e}")))?;

    let handle = tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return Vec::new();
        };
        let request = read_request(&mut stream).await.unwrap_or_default();

        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            if stream.write_all(chunk).await.is_err() {
                break;
            }
            let _ = stream.flush().await;
        }
        let _ = stream.shutdown().await;
        request
    });

    Ok((handle, addr))
}

/// Returns an address with nothing listening on it
pub async fn refused_addr() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| RelayError::Config(format!("Failed to bind listener: {e}")))?;
    let addr = listener
        .local_addr()
        .map_err(|e| RelayError::Config(format!("Failed to get local address: {e}")))?;
    drop(listener);
    Ok(addr)
}

/// Returns a downstream socket and a task collecting everything written to it
///
/// The task resolves once the socket is shut down or dropped.
pub fn capture_downstream() -> (DuplexStream, JoinHandle<Vec<u8>>) {
    let (downstream, mut client) = tokio::io::duplex(DOWNSTREAM_CAPACITY);
    let reader = tokio::spawn(async move {
        let mut received = Vec::new();
        let _ = client.read_to_end(&mut received).await;
        received
    });
    (downstream, reader)
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut request = Vec::new();
    let mut buffer = [0u8; 4096];
    loop {
        if let Some(expected) = request_len(&request) {
            if request.len() >= expected {
                break;
            }
        }
        let n = stream.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buffer[..n]);
    }
    Ok(request)
}

/// Total length of the request in `data`, once its head is complete
fn request_len(data: &[u8]) -> Option<usize> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);
    let head_len = match req.parse(data) {
        Ok(httparse::Status::Complete(n)) => n,
        _ => return None,
    };

    let mut content_length = 0;
    let mut chunked = false;
    for h in req.headers.iter() {
        if h.name.eq_ignore_ascii_case("content-length") {
            content_length = std::str::from_utf8(h.value).ok()?.trim().parse().ok()?;
        } else if h.name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = h.value.eq_ignore_ascii_case(b"chunked");
        }
    }

    if chunked {
        return data[head_len..]
            .windows(5)
            .position(|w| w == b"0\r\n\r\n")
            .map(|pos| head_len + pos + 5);
    }
    Some(head_len + content_length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_len() {
        assert_eq!(request_len(b"GET / HTTP/1.1\r\nHost: x"), None);
        assert_eq!(request_len(b"GET / HTTP/1.1\r\n\r\n"), Some(18));
        assert_eq!(
            request_len(b"POST / HTTP/1.1\r\ncontent-length: 5\r\n\r\nhel"),
            Some(43)
        );
    }
}
