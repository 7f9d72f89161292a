use crate::request::Method;
use crate::{RelayError, Result};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;

/// Upper bound on header lines accepted in one response head
const MAX_HEADERS: usize = 128;

/// Parsed status line and headers of an origin response
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub message: String,
    pub headers: HeaderMap,
}

/// How the origin delimits the response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// The response cannot carry a body (HEAD, 1xx, 204, 304)
    Empty,
    /// Exactly this many bytes follow the head
    Length(u64),
    /// Chunked transfer coding, terminated by a zero-size chunk
    Chunked,
    /// The body runs until the origin closes the connection
    UntilClose,
}

impl BodyFraming {
    /// Determines framing from the request method and the origin's head
    pub fn for_response(method: Method, head: &ResponseHead) -> Result<Self> {
        let status = head.status;
        if method == Method::Head
            || status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
        {
            return Ok(BodyFraming::Empty);
        }

        let chunked = head
            .headers
            .get_all(header::TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.to_ascii_lowercase().contains("chunked"));
        if chunked {
            return Ok(BodyFraming::Chunked);
        }

        match head.headers.get(header::CONTENT_LENGTH) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(BodyFraming::Length)
                .ok_or_else(|| {
                    RelayError::Protocol(format!("Invalid content-length: {value:?}"))
                }),
            None => Ok(BodyFraming::UntilClose),
        }
    }

    /// Number of body bytes still allowed, or `None` when unbounded
    pub fn limit(&self) -> Option<u64> {
        match self {
            BodyFraming::Empty => Some(0),
            BodyFraming::Length(n) => Some(*n),
            BodyFraming::Chunked | BodyFraming::UntilClose => None,
        }
    }
}

/// Attempts to parse a complete response head from the start of `buf`
///
/// Returns the head and its length in bytes, or `None` if more data is needed.
pub fn parse_head(buf: &[u8]) -> Result<Option<(ResponseHead, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    let parsed_len = match response.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => {
            return Err(RelayError::Protocol(format!(
                "Failed to parse response head: {e}"
            )));
        }
    };

    let code = response
        .code
        .ok_or_else(|| RelayError::Protocol("Missing status code".to_string()))?;
    let status = StatusCode::from_u16(code)
        .map_err(|_| RelayError::Protocol(format!("Invalid status code {code}")))?;
    let message = response.reason.unwrap_or_default().to_string();

    let mut header_map = HeaderMap::with_capacity(response.headers.len());
    for h in response.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|_| RelayError::Protocol(format!("Invalid header name {}", h.name)))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|_| RelayError::Protocol(format!("Invalid value for header {}", h.name)))?;
        header_map.append(name, value);
    }

    Ok(Some((
        ResponseHead {
            status,
            message,
            headers: header_map,
        },
        parsed_len,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(raw: &str) -> ResponseHead {
        parse_head(raw.as_bytes()).unwrap().unwrap().0
    }

    #[test]
    fn test_parse_complete_head_with_leftover() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\nhello";
        let (head, len) = parse_head(raw).unwrap().unwrap();

        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.message, "OK");
        assert_eq!(head.headers.get_all("set-cookie").iter().count(), 2);
        assert_eq!(&raw[len..], b"hello");
    }

    #[test]
    fn test_partial_head() {
        assert!(parse_head(b"HTTP/1.1 200 OK\r\nContent-").unwrap().is_none());
    }

    #[test]
    fn test_malformed_head() {
        assert!(matches!(
            parse_head(b"NOT-HTTP garbage\r\n\r\n"),
            Err(RelayError::Protocol(_))
        ));
    }

    #[test]
    fn test_custom_reason_is_preserved() {
        let head = head("HTTP/1.1 404 Nothing Here\r\n\r\n");
        assert_eq!(head.status, StatusCode::NOT_FOUND);
        assert_eq!(head.message, "Nothing Here");
    }

    #[test]
    fn test_framing() {
        let sized = head("HTTP/1.1 200 OK\r\nContent-Length: 12\r\n\r\n");
        assert_eq!(
            BodyFraming::for_response(Method::Get, &sized).unwrap(),
            BodyFraming::Length(12)
        );
        assert_eq!(
            BodyFraming::for_response(Method::Head, &sized).unwrap(),
            BodyFraming::Empty
        );

        let chunked = head("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert_eq!(
            BodyFraming::for_response(Method::Get, &chunked).unwrap(),
            BodyFraming::Chunked
        );

        let open = head("HTTP/1.1 200 OK\r\n\r\n");
        assert_eq!(
            BodyFraming::for_response(Method::Get, &open).unwrap(),
            BodyFraming::UntilClose
        );

        let no_content = head("HTTP/1.1 204 No Content\r\n\r\n");
        assert_eq!(
            BodyFraming::for_response(Method::Get, &no_content).unwrap(),
            BodyFraming::Empty
        );
    }

    #[test]
    fn test_invalid_content_length() {
        let bad = head("HTTP/1.1 200 OK\r\nContent-Length: lots\r\n\r\n");
        assert!(matches!(
            BodyFraming::for_response(Method::Get, &bad),
            Err(RelayError::Protocol(_))
        ));
    }
}
