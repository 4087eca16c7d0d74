// Outgoing HTTP response

use bytes::Bytes;

use super::{reason_phrase, Headers};

/// An HTTP response under construction. Values returned by the boilerplate
/// factories are freely mutable; nothing is shared between instances.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    /// HTTP version as (major, minor).
    pub version: (u8, u8),
    pub headers: Headers,
    pub body: Bytes,
    /// When set, a `Connection: close` header is emitted with the response.
    pub close: bool,
}

impl Response {
    /// New empty response with the standard reason phrase for `status`.
    pub fn new(status: u16) -> Response {
        Response {
            status,
            reason: reason_phrase(status).to_string(),
            version: (1, 1),
            headers: Headers::new(),
            body: Bytes::new(),
            close: false,
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Response {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Response {
        self.headers.set(name, value);
        self
    }

    pub fn with_version(mut self, major: u8, minor: u8) -> Response {
        self.version = (major, minor);
        self
    }
}
