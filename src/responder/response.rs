use crate::{RelayError, Result};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use serde::Serialize;
use std::fmt;
use tokio::io::AsyncRead;

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const UNKNOWN_REASON: &str = "Unknown";

/// Body of a synthetic response
#[derive(Default)]
pub enum SyntheticBody {
    #[default]
    Empty,
    Bytes(Bytes),
    /// Copied to the socket until EOF
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl fmt::Debug for SyntheticBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntheticBody::Empty => f.write_str("Empty"),
            SyntheticBody::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            SyntheticBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A response built from scratch rather than relayed from the origin
///
/// Header names keep the caller's spelling. Adding the same name twice keeps
/// both values, and each value is written on its own header line.
///
/// Names, values and the reason phrase are validated as they are set. An
/// invalid one is never stored; the first such error is kept and returned
/// by [`validate`](Self::validate), so rendering the response fails before
/// any byte reaches the socket.
///
/// # Examples
///
/// ```
/// use http::StatusCode;
/// use relaysrv::SyntheticResponse;
///
/// let response = SyntheticResponse::new(StatusCode::SERVICE_UNAVAILABLE)
///     .header("Retry-After", "30")
///     .text("try again later");
///
/// assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
/// ```
#[derive(Debug)]
pub struct SyntheticResponse {
    status: StatusCode,
    reason: Option<String>,
    headers: Vec<(String, Vec<HeaderValue>)>,
    body: SyntheticBody,
    default_content_type: Option<&'static str>,
    error: Option<String>,
}

impl Default for SyntheticResponse {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl SyntheticResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            headers: Vec::new(),
            body: SyntheticBody::Empty,
            default_content_type: None,
            error: None,
        }
    }

    /// `302 Found` pointing at `url`, with no body
    pub fn redirect(url: &str) -> Self {
        Self::new(StatusCode::FOUND).header("Location", url)
    }

    /// Adds a header value; repeated names accumulate values
    pub fn header(mut self, name: &str, value: &str) -> Self {
        let value = match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(_), Ok(value)) => value,
            _ => return self.invalid(format!("Invalid header {name:?}: {value:?}")),
        };
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some((_, values)) => values.push(value),
            None => self.headers.push((name.to_string(), vec![value])),
        }
        self
    }

    /// Overrides the reason phrase written after the status code
    pub fn reason(mut self, reason: &str) -> Self {
        if reason.bytes().any(|b| b.is_ascii_control() && b != b'\t') {
            return self.invalid(format!("Invalid reason phrase {reason:?}"));
        }
        self.reason = Some(reason.to_string());
        self
    }

    /// Raw body, written as-is
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = SyntheticBody::Bytes(body.into());
        self.default_content_type = None;
        self
    }

    /// Streamed body, copied until EOF
    pub fn stream<R>(mut self, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.body = SyntheticBody::Stream(Box::new(reader));
        self.default_content_type = None;
        self
    }

    /// Plain text body; `Content-Type` defaults to `text/plain; charset=utf-8`
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.body = SyntheticBody::Bytes(Bytes::from(text.into()));
        self.default_content_type = Some(TEXT_CONTENT_TYPE);
        self
    }

    /// JSON body; `Content-Type` defaults to `application/json; charset=utf-8`
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.body = SyntheticBody::Bytes(Bytes::from(serde_json::to_vec(value)?));
        self.default_content_type = Some(JSON_CONTENT_TYPE);
        Ok(self)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase for the status line
    ///
    /// Falls back to the canonical phrase, or `Unknown` for codes that have none.
    pub fn reason_phrase(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or(UNKNOWN_REASON)
    }

    /// Fails with the first invalid header or reason phrase that was set
    pub fn validate(&self) -> Result<()> {
        match &self.error {
            Some(message) => Err(RelayError::Config(message.clone())),
            None => Ok(()),
        }
    }

    /// Values for a header name, matched case-insensitively
    pub fn header_values(&self, name: &str) -> &[HeaderValue] {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or_default()
    }

    /// Content type that will be written: the explicit header, else the default
    pub fn content_type(&self) -> Option<&str> {
        self.header_values("Content-Type")
            .first()
            .and_then(|value| value.to_str().ok())
            .or(self.default_content_type)
    }

    /// Serializes the status line and header block
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut head =
            format!("HTTP/1.1 {} {}\r\n", self.status.as_u16(), self.reason_phrase()).into_bytes();
        for (name, values) in &self.headers {
            for value in values {
                head.extend_from_slice(name.as_bytes());
                head.extend_from_slice(b": ");
                head.extend_from_slice(value.as_bytes());
                head.extend_from_slice(b"\r\n");
            }
        }
        if let Some(content_type) = self.default_content_type {
            if self.header_values("Content-Type").is_empty() {
                head.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
            }
        }
        head.extend_from_slice(b"\r\n");
        head
    }

    fn invalid(mut self, message: String) -> Self {
        self.error.get_or_insert(message);
        self
    }

    pub(crate) fn into_body(self) -> SyntheticBody {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn head_string(response: &SyntheticResponse) -> String {
        String::from_utf8(response.head_bytes()).unwrap()
    }

    #[test]
    fn test_text_defaults_content_type() {
        let response = SyntheticResponse::new(StatusCode::INTERNAL_SERVER_ERROR)
            .text("Internal Server Error");
        assert_eq!(
            head_string(&response),
            "HTTP/1.1 500 Internal Server Error\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n"
        );
    }

    #[test]
    fn test_explicit_content_type_wins() {
        let response = SyntheticResponse::default()
            .header("content-type", "text/html")
            .text("<p>hi</p>");
        assert_eq!(response.content_type(), Some("text/html"));
        assert!(!head_string(&response).contains("text/plain"));
    }

    #[test]
    fn test_json_body() {
        let response = SyntheticResponse::default()
            .json(&json!({"ok": true}))
            .unwrap();
        assert_eq!(response.content_type(), Some(JSON_CONTENT_TYPE));
        match response.into_body() {
            SyntheticBody::Bytes(bytes) => assert_eq!(&bytes[..], br#"{"ok":true}"#),
            other => panic!("Expected bytes body, got {other:?}"),
        }
    }

    #[test]
    fn test_multi_valued_headers_repeat_lines() {
        let response = SyntheticResponse::default()
            .header("Set-Cookie", "a=1")
            .header("set-cookie", "b=2");
        assert_eq!(
            head_string(&response),
            "HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n"
        );
    }

    #[test]
    fn test_redirect() {
        let response = SyntheticResponse::redirect("http://example.com");
        assert_eq!(
            head_string(&response),
            "HTTP/1.1 302 Found\r\nLocation: http://example.com\r\n\r\n"
        );
        assert!(matches!(response.into_body(), SyntheticBody::Empty));
    }

    #[test]
    fn test_header_injection_is_not_stored() {
        let response = SyntheticResponse::redirect("http://example.com\r\nSet-Cookie: session=evil");
        assert!(matches!(response.validate(), Err(RelayError::Config(_))));
        assert!(response.header_values("Location").is_empty());
        assert!(!head_string(&response).contains("Set-Cookie"));

        let response = SyntheticResponse::default().header("X-Bad\r\nName", "v");
        assert!(matches!(response.validate(), Err(RelayError::Config(_))));
        assert_eq!(head_string(&response), "HTTP/1.1 200 OK\r\n\r\n");
    }

    #[test]
    fn test_unregistered_status_gets_reason() {
        let status = StatusCode::from_u16(599).unwrap();
        let response = SyntheticResponse::new(status);
        assert_eq!(head_string(&response), "HTTP/1.1 599 Unknown\r\n\r\n");

        let response = SyntheticResponse::new(status).reason("Network Connect Timeout");
        assert!(response.validate().is_ok());
        assert_eq!(
            head_string(&response),
            "HTTP/1.1 599 Network Connect Timeout\r\n\r\n"
        );
    }

    #[test]
    fn test_reason_with_line_break_rejected() {
        let response = SyntheticResponse::default().reason("OK\r\nX-Injected: 1");
        assert!(matches!(response.validate(), Err(RelayError::Config(_))));
        assert_eq!(response.reason_phrase(), "OK");
    }
}
