// HTTP/1.1 wire codec
// One request read and one response written per call; the pipelining
// contract itself lives in the server core, not here.

pub mod boiler;
mod headers;
mod reader;
mod request;
mod response;
mod writer;

pub use headers::Headers;
pub use reader::RequestReader;
pub use request::{Cookie, Request};
pub use response::Response;
pub use writer::ResponseWriter;

use thiserror::Error;

/// Server identity used in boilerplate bodies and the Proxy-Agent header.
pub(crate) const SERVER_NAME: &str = "quince-server";

/// Cap on the request head (request line + headers).
pub(crate) const MAX_HEAD_BYTES: usize = 32 * 1024;

/// Cap on a request body, whether sized or chunked.
pub(crate) const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Cap on the number of request headers.
pub(crate) const MAX_HEADERS: usize = 64;

/// Wire-level failures. All of them are terminal for the connection that
/// produced them.
#[derive(Debug, Error)]
pub enum WireError {
    /// The peer closed the connection cleanly between requests.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The peer closed the connection in the middle of a request.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Malformed request head.
    #[error("malformed request: {0}")]
    Parse(httparse::Error),

    /// Request head exceeded `MAX_HEAD_BYTES`.
    #[error("request head too large")]
    HeadTooLarge,

    /// Declared or accumulated body exceeded `MAX_BODY_BYTES`.
    #[error("request body too large")]
    BodyTooLarge,

    /// Content-Length header was not a valid integer.
    #[error("invalid content length")]
    BadContentLength,

    /// Malformed chunked transfer encoding.
    #[error("invalid chunked encoding")]
    BadChunk,

    /// Socket failure while reading.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// HTTP request method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Trace,
    Patch,
    Connect,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
            Method::Connect => "CONNECT",
            Method::Other(m) => m,
        }
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "TRACE" => Method::Trace,
            "PATCH" => Method::Patch,
            "CONNECT" => Method::Connect,
            other => Method::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason phrase for the status codes this crate produces.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_round_trip() {
        assert_eq!(Method::from("GET"), Method::Get);
        assert_eq!(Method::from("CONNECT"), Method::Connect);
        assert_eq!(Method::Connect.as_str(), "CONNECT");
        assert_eq!(Method::from("BREW"), Method::Other("BREW".to_string()));
        assert_eq!(Method::from("BREW").as_str(), "BREW");
    }

    #[test]
    fn test_reason_phrases() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(404), "Not Found");
        assert_eq!(reason_phrase(503), "Service Unavailable");
    }
}
