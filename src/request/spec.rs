use super::Method;
use crate::{RelayError, Result};
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::fmt;
use tokio::io::AsyncRead;
use url::Url;

const DEFAULT_USER_AGENT: &str = concat!("relaysrv/", env!("CARGO_PKG_VERSION"));

/// Source of the outbound request body
#[derive(Default)]
pub enum RequestBody {
    /// No body is sent
    #[default]
    Empty,
    /// A static in-memory buffer
    Buffer(Bytes),
    /// A readable stream, copied until EOF
    Stream(Box<dyn AsyncRead + Send + Sync + Unpin>),
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
            RequestBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Buffer(bytes)
    }
}

impl From<&'static str> for RequestBody {
    fn from(s: &'static str) -> Self {
        RequestBody::Buffer(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Buffer(Bytes::from(s))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        RequestBody::Buffer(Bytes::from(v))
    }
}

/// Description of the request relayed to the origin
///
/// # Examples
///
/// ```
/// use relaysrv::{Method, RequestSpec};
///
/// let spec = RequestSpec::builder("http://localhost:8080/post")
///     .method("post")
///     .header("content-type", "application/json")
///     .body("{}")
///     .build()
///     .unwrap();
///
/// assert_eq!(spec.method(), Method::Post);
/// assert_eq!(spec.port(), 8080);
/// ```
#[derive(Debug)]
pub struct RequestSpec {
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: RequestBody,
    ignore_ssl_errors: bool,
    debug: bool,
}

impl RequestSpec {
    /// Starts building a request to the given origin URL
    pub fn builder(url: &str) -> RequestSpecBuilder {
        RequestSpecBuilder::new(url)
    }

    /// Shorthand for a GET request with no extra options
    pub fn get(url: &str) -> Result<Self> {
        Self::builder(url).build()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Caller-supplied headers, before defaults and `connection: close` are applied
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Explicit port, or the scheme default (80 for http, 443 for https)
    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "https"
    }

    pub fn ignore_ssl_errors(&self) -> bool {
        self.ignore_ssl_errors
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Path and query as written on the request line
    pub fn request_target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    /// Returns true if the caller asked for a chunked request body
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get_all(header::TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.to_ascii_lowercase().contains("chunked"))
    }

    /// Headers actually sent to the origin
    ///
    /// Defaults for host, accept and user-agent are applied first and caller
    /// headers override them. A chunked request never carries
    /// `content-length`. `connection: close` is always forced last.
    pub fn outbound_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(host) = HeaderValue::from_str(&self.host_header()) {
            headers.insert(header::HOST, host);
        }
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        for name in self.headers.keys() {
            headers.remove(name);
            for value in self.headers.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        if self.is_chunked() {
            headers.remove(header::CONTENT_LENGTH);
        } else if let RequestBody::Buffer(bytes) = &self.body {
            if !headers.contains_key(header::CONTENT_LENGTH) {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            }
        }

        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers
    }

    /// Serializes the request line and outbound header block
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "{} {} HTTP/1.1\r\n",
            self.method.as_str(),
            self.request_target()
        )
        .into_bytes();
        for (name, value) in self.outbound_headers().iter() {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");
        head
    }

    /// Fails when a stream body has no framing the origin could delimit
    pub(crate) fn check_body_framing(&self) -> Result<()> {
        let unframed = matches!(self.body, RequestBody::Stream(_))
            && !self.is_chunked()
            && !self.headers.contains_key(header::CONTENT_LENGTH);
        if unframed {
            return Err(RelayError::Config(
                "cannot send a stream body without content-length or chunked transfer-encoding"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn take_body(&mut self) -> RequestBody {
        std::mem::take(&mut self.body)
    }

    fn host_header(&self) -> String {
        match self.url.port() {
            Some(port) => format!("{}:{}", self.host(), port),
            None => self.host().to_string(),
        }
    }
}

/// Builder for [`RequestSpec`]
///
/// Errors from individual setters are deferred until [`build`](Self::build).
pub struct RequestSpecBuilder {
    url: String,
    method: Option<String>,
    headers: HeaderMap,
    body: RequestBody,
    ignore_ssl_errors: bool,
    debug: bool,
    error: Option<RelayError>,
}

impl RequestSpecBuilder {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            method: None,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            ignore_ssl_errors: false,
            debug: false,
            error: None,
        }
    }

    /// Sets the method; matched case-insensitively at build time
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Sets a header, replacing any previous value with the same name
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => {
                self.error.get_or_insert_with(|| {
                    RelayError::Config(format!("Invalid header {name}: {value}"))
                });
            }
        }
        self
    }

    /// Merges a header map, last write wins per name
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        let mut current = None;
        for (name, value) in headers {
            if let Some(name) = name {
                current = Some(name);
            }
            if let Some(name) = &current {
                self.headers.insert(name.clone(), value);
            }
        }
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn body_stream<R>(mut self, reader: R) -> Self
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
    {
        self.body = RequestBody::Stream(Box::new(reader));
        self
    }

    /// Skips TLS certificate verification for https origins
    pub fn ignore_ssl_errors(mut self, ignore: bool) -> Self {
        self.ignore_ssl_errors = ignore;
        self
    }

    /// Enables wire-level tracing for this request
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn build(self) -> Result<RequestSpec> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let url = Url::parse(&self.url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RelayError::InvalidUrl(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(RelayError::InvalidUrl(format!("missing host in {url}")));
        }

        let method = match self.method {
            Some(method) => method.parse()?,
            None => Method::default(),
        };

        Ok(RequestSpec {
            url,
            method,
            headers: self.headers,
            body: self.body,
            ignore_ssl_errors: self.ignore_ssl_errors,
            debug: self.debug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head_string(spec: &RequestSpec) -> String {
        String::from_utf8(spec.head_bytes()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let spec = RequestSpec::get("http://example.com").unwrap();
        assert_eq!(spec.method(), Method::Get);
        assert_eq!(spec.port(), 80);
        assert_eq!(spec.request_target(), "/");
        assert!(!spec.is_secure());
        assert!(spec.headers().is_empty());
    }

    #[test]
    fn test_https_default_port() {
        let spec = RequestSpec::get("https://example.com/a?b=c").unwrap();
        assert_eq!(spec.port(), 443);
        assert!(spec.is_secure());
        assert_eq!(spec.request_target(), "/a?b=c");
    }

    #[test]
    fn test_connection_close_overrides_caller() {
        let spec = RequestSpec::builder("http://example.com/")
            .header("Connection", "keep-alive")
            .build()
            .unwrap();

        let headers = spec.outbound_headers();
        assert_eq!(headers.get_all(header::CONNECTION).iter().count(), 1);
        assert_eq!(headers[header::CONNECTION], "close");
        assert!(head_string(&spec).ends_with("connection: close\r\n\r\n"));
    }

    #[test]
    fn test_header_last_write_wins() {
        let spec = RequestSpec::builder("http://example.com/")
            .header("X-Custom", "one")
            .header("x-custom", "two")
            .build()
            .unwrap();

        assert_eq!(spec.headers()["x-custom"], "two");
    }

    #[test]
    fn test_host_header_includes_explicit_port() {
        let spec = RequestSpec::get("http://localhost:8080/get").unwrap();
        assert_eq!(spec.outbound_headers()[header::HOST], "localhost:8080");

        let head = head_string(&spec);
        assert!(head.starts_with("GET /get HTTP/1.1\r\n"));
    }

    #[test]
    fn test_buffer_body_gets_content_length() {
        let spec = RequestSpec::builder("http://example.com/post")
            .method("POST")
            .body("hello world")
            .build()
            .unwrap();

        assert_eq!(spec.outbound_headers()[header::CONTENT_LENGTH], "11");
    }

    #[test]
    fn test_caller_content_length_is_kept() {
        let spec = RequestSpec::builder("http://example.com/post")
            .method("post")
            .header("content-length", "11")
            .body("hello world")
            .build()
            .unwrap();

        let headers = spec.outbound_headers();
        assert_eq!(headers.get_all(header::CONTENT_LENGTH).iter().count(), 1);
    }

    #[test]
    fn test_chunked_detection() {
        let spec = RequestSpec::builder("http://example.com/upload")
            .method("put")
            .header("Transfer-Encoding", "chunked")
            .body_stream(std::io::Cursor::new(b"data".to_vec()))
            .build()
            .unwrap();

        assert!(spec.is_chunked());
        assert!(!spec.outbound_headers().contains_key(header::CONTENT_LENGTH));
        assert!(spec.check_body_framing().is_ok());
    }

    #[test]
    fn test_chunked_drops_caller_content_length() {
        let spec = RequestSpec::builder("http://example.com/upload")
            .method("post")
            .header("Content-Length", "11")
            .header("Transfer-Encoding", "chunked")
            .body("hello world")
            .build()
            .unwrap();

        assert!(!spec.outbound_headers().contains_key(header::CONTENT_LENGTH));
    }

    #[test]
    fn test_unframed_stream_body_rejected() {
        let spec = RequestSpec::builder("http://example.com/upload")
            .method("post")
            .body_stream(std::io::Cursor::new(b"data".to_vec()))
            .build()
            .unwrap();
        assert!(matches!(
            spec.check_body_framing(),
            Err(RelayError::Config(_))
        ));

        let spec = RequestSpec::builder("http://example.com/upload")
            .method("post")
            .header("Content-Length", "4")
            .body_stream(std::io::Cursor::new(b"data".to_vec()))
            .build()
            .unwrap();
        assert!(spec.check_body_framing().is_ok());
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            RequestSpec::get("not a url"),
            Err(RelayError::InvalidUrl(_))
        ));
        assert!(matches!(
            RequestSpec::get("ftp://example.com/file"),
            Err(RelayError::InvalidUrl(_))
        ));
        assert!(matches!(
            RequestSpec::builder("http://example.com").method("BREW").build(),
            Err(RelayError::UnsupportedMethod(_))
        ));
        assert!(matches!(
            RequestSpec::builder("http://example.com")
                .header("bad header", "x")
                .build(),
            Err(RelayError::Config(_))
        ));
    }
}
