use super::chunked::ChunkedReader;
use crate::request::{Method, RequestBody, RequestSpec};
use crate::{RelayError, Result};
use bytes::{Bytes, BytesMut};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use url::Url;

const MAX_HEADERS: usize = 64;

/// How an inbound request delimits its body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundFraming {
    NoBody,
    Length(u64),
    Chunked,
}

/// Head of a request received from a downstream client
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Request target as written on the request line
    pub target: String,
    pub headers: HeaderMap,
}

impl InboundRequest {
    /// Attempts to parse a complete request head from the start of `buf`
    ///
    /// Returns the head and its length in bytes, or `None` if more data is needed.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);

        let parsed_len = match request.parse(buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => {
                return Err(RelayError::Protocol(format!(
                    "Failed to parse request head: {e}"
                )));
            }
        };

        let method = request
            .method
            .ok_or_else(|| RelayError::Protocol("Missing request method".to_string()))?
            .parse::<Method>()?;
        let target = request
            .path
            .ok_or_else(|| RelayError::Protocol("Missing request target".to_string()))?
            .to_string();

        let mut header_map = HeaderMap::with_capacity(request.headers.len());
        for h in request.headers.iter() {
            let name = HeaderName::from_bytes(h.name.as_bytes())
                .map_err(|_| RelayError::Protocol(format!("Invalid header name {}", h.name)))?;
            let value = HeaderValue::from_bytes(h.value)
                .map_err(|_| RelayError::Protocol(format!("Invalid value for header {}", h.name)))?;
            header_map.append(name, value);
        }

        Ok(Some((
            InboundRequest {
                method,
                target,
                headers: header_map,
            },
            parsed_len,
        )))
    }

    pub fn is_chunked(&self) -> bool {
        self.headers
            .get_all(header::TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.to_ascii_lowercase().contains("chunked"))
    }

    /// Declared body length, if any
    pub fn content_length(&self) -> Result<Option<u64>> {
        match self.headers.get(header::CONTENT_LENGTH) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Some)
                .ok_or_else(|| RelayError::Protocol(format!("Invalid content-length: {value:?}"))),
            None => Ok(None),
        }
    }

    /// Appends this request's path and query to the origin's base URL
    pub fn origin_url(&self, origin: &Url) -> Result<Url> {
        if !self.target.starts_with('/') {
            return Err(RelayError::InvalidUrl(format!(
                "unsupported request target {}",
                self.target
            )));
        }
        let (path, query) = match self.target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.target.as_str(), None),
        };

        let mut url = origin.clone();
        let base = origin.path().trim_end_matches('/');
        url.set_path(&format!("{base}{path}"));
        url.set_query(query);
        Ok(url)
    }

    /// Headers forwarded to the origin and the framing of the body to relay
    ///
    /// Only `content-length`, `content-type` and a chunked
    /// `transfer-encoding` are carried over. A chunked body wins over any
    /// declared length and is re-chunked towards the origin.
    pub fn relay_headers(&self) -> Result<(HeaderMap, InboundFraming)> {
        let mut headers = HeaderMap::new();
        let framing = if self.is_chunked() {
            headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            InboundFraming::Chunked
        } else {
            match self.content_length()? {
                Some(length) => {
                    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
                    InboundFraming::Length(length)
                }
                None if self.method.expects_body() => {
                    return Err(RelayError::Config(
                        "cannot relay a non-chunked request body without content-length"
                            .to_string(),
                    ));
                }
                None => InboundFraming::NoBody,
            }
        };
        if let Some(content_type) = self.headers.get(header::CONTENT_TYPE) {
            headers.insert(header::CONTENT_TYPE, content_type.clone());
        }
        Ok((headers, framing))
    }

    /// Builds the outbound request, streaming the body from `leftover` then `reader`
    ///
    /// `leftover` holds bytes read past the head while parsing it. Chunked
    /// bodies are decoded on the way through.
    pub fn into_request_spec<R>(
        self,
        origin: &Url,
        leftover: Bytes,
        reader: R,
        ignore_ssl_errors: bool,
        debug: bool,
    ) -> Result<RequestSpec>
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
    {
        let url = self.origin_url(origin)?;
        let (headers, framing) = self.relay_headers()?;

        let body = match framing {
            InboundFraming::Length(length) if length > 0 => {
                let prefix_len = leftover.len().min(usize::try_from(length).unwrap_or(usize::MAX));
                let rest = length - prefix_len as u64;
                let prefix = io::Cursor::new(leftover.slice(..prefix_len));
                RequestBody::Stream(Box::new(prefix.chain(reader.take(rest))))
            }
            InboundFraming::Chunked => {
                RequestBody::Stream(Box::new(ChunkedReader::new(leftover, reader)))
            }
            _ => RequestBody::Empty,
        };

        RequestSpec::builder(url.as_str())
            .method(self.method.as_str())
            .headers(headers)
            .body(body)
            .ignore_ssl_errors(ignore_ssl_errors)
            .debug(debug)
            .build()
    }
}

/// Reads and parses a request head from `reader`
///
/// Returns the head along with any bytes read past it.
pub async fn read_request_head<R>(
    reader: &mut R,
    max_head_size: usize,
    read_timeout: Duration,
) -> Result<(InboundRequest, Bytes)>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(4096);
    loop {
        if let Some((request, len)) = InboundRequest::parse(&buffer)? {
            let leftover = buffer.split_off(len).freeze();
            return Ok((request, leftover));
        }
        if buffer.len() >= max_head_size {
            return Err(RelayError::Protocol(format!(
                "Request head exceeds {max_head_size} bytes"
            )));
        }

        let n = timeout(read_timeout, reader.read_buf(&mut buffer))
            .await
            .map_err(|_| {
                RelayError::Timeout(format!("No request head within {read_timeout:?}"))
            })??;
        if n == 0 {
            return Err(RelayError::Connection(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "client closed the connection before sending a request head",
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(raw: &str) -> InboundRequest {
        InboundRequest::parse(raw.as_bytes()).unwrap().unwrap().0
    }

    fn origin() -> Url {
        Url::parse("http://origin.test:9000/api/").unwrap()
    }

    #[test]
    fn test_parse_with_leftover() {
        let raw = b"POST /items HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel";
        let (request, len) = InboundRequest::parse(raw).unwrap().unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.target, "/items");
        assert_eq!(&raw[len..], b"hel");
    }

    #[test]
    fn test_unsupported_method() {
        assert!(matches!(
            InboundRequest::parse(b"PATCH / HTTP/1.1\r\n\r\n"),
            Err(RelayError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn test_origin_url_joins_paths() {
        let request = inbound("GET /users/7?full=1 HTTP/1.1\r\n\r\n");
        assert_eq!(
            request.origin_url(&origin()).unwrap().as_str(),
            "http://origin.test:9000/api/users/7?full=1"
        );

        let root = Url::parse("https://origin.test").unwrap();
        assert_eq!(
            inbound("GET / HTTP/1.1\r\n\r\n").origin_url(&root).unwrap().as_str(),
            "https://origin.test/"
        );
    }

    #[test]
    fn test_absolute_target_rejected() {
        let request = inbound("GET http://elsewhere/ HTTP/1.1\r\n\r\n");
        assert!(matches!(
            request.origin_url(&origin()),
            Err(RelayError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_relay_headers_forward_length_and_type() {
        let request = inbound(
            "POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Type: application/json\r\nCookie: a=1\r\n\r\n",
        );
        let (headers, framing) = request.relay_headers().unwrap();
        assert_eq!(framing, InboundFraming::Length(5));
        assert_eq!(headers.get("content-length").unwrap(), "5");
        assert_eq!(headers.get("content-type").unwrap(), "application/json");
        assert!(headers.get("cookie").is_none());
    }

    #[test]
    fn test_post_without_length_rejected() {
        let request = inbound("POST / HTTP/1.1\r\nContent-Type: application/json\r\n\r\n");
        match request.relay_headers() {
            Err(RelayError::Config(message)) => assert_eq!(
                message,
                "cannot relay a non-chunked request body without content-length"
            ),
            other => panic!("Expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_chunked_body_forwarded_as_chunked() {
        let request = inbound(
            "PUT / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 99\r\n\r\n",
        );
        let (headers, framing) = request.relay_headers().unwrap();
        assert_eq!(framing, InboundFraming::Chunked);
        assert_eq!(headers.get("transfer-encoding").unwrap(), "chunked");
        assert!(headers.get("content-length").is_none());
    }

    #[test]
    fn test_get_without_length_has_no_body() {
        let (headers, framing) = inbound("GET / HTTP/1.1\r\n\r\n").relay_headers().unwrap();
        assert!(headers.is_empty());
        assert_eq!(framing, InboundFraming::NoBody);
    }

    #[tokio::test]
    async fn test_body_stream_joins_leftover_and_reader() {
        let request = inbound("POST /echo HTTP/1.1\r\nContent-Length: 11\r\n\r\n");
        let spec = request
            .into_request_spec(
                &origin(),
                Bytes::from_static(b"hello"),
                io::Cursor::new(b" world and trailing junk".to_vec()),
                false,
                false,
            )
            .unwrap();

        assert_eq!(spec.url().as_str(), "http://origin.test:9000/api/echo");
        assert_eq!(spec.method(), Method::Post);
        assert_eq!(spec.headers().get("content-length").unwrap(), "11");

        let mut spec = spec;
        let mut body = Vec::new();
        match spec.take_body() {
            RequestBody::Stream(mut reader) => {
                reader.read_to_end(&mut body).await.unwrap();
            }
            other => panic!("Expected stream body, got {other:?}"),
        }
        assert_eq!(body, b"hello world");
    }

    #[tokio::test]
    async fn test_chunked_body_stream_is_decoded() {
        let request = inbound("POST /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n");
        let mut spec = request
            .into_request_spec(
                &origin(),
                Bytes::from_static(b"5\r\nhello\r\n"),
                io::Cursor::new(b"6\r\n world\r\n0\r\n\r\n".to_vec()),
                false,
                false,
            )
            .unwrap();

        assert!(spec.is_chunked());
        let mut body = Vec::new();
        match spec.take_body() {
            RequestBody::Stream(mut reader) => {
                reader.read_to_end(&mut body).await.unwrap();
            }
            other => panic!("Expected stream body, got {other:?}"),
        }
        assert_eq!(body, b"hello world");
    }

    #[tokio::test]
    async fn test_read_request_head() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"GET /a HTTP/1.1\r\nHo")
            .read(b"st: x\r\n\r\nextra")
            .build();
        let (request, leftover) = read_request_head(&mut reader, 1024, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(request.target, "/a");
        assert_eq!(&leftover[..], b"extra");
    }

    #[tokio::test]
    async fn test_read_request_head_eof() {
        let mut reader = tokio_test::io::Builder::new().read(b"GET / HT").build();
        assert!(matches!(
            read_request_head(&mut reader, 1024, Duration::from_secs(1)).await,
            Err(RelayError::Connection(_))
        ));
    }
}
