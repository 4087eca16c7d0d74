// Boilerplate response factories
// Every call allocates a fresh value from immutable data, so handlers can
// mutate the result without global side effects.

use super::{Response, SERVER_NAME};

fn html_page(status: u16, reason: &str) -> String {
    format!(
        "<html><head><title>{status} {reason}</title></head>\n\
         <body bgcolor=\"white\">\n\
         <center><h1>{status} {reason}</h1></center>\n\
         <hr><center>{SERVER_NAME}</center>\n\
         </body></html>"
    )
}

fn html_error(status: u16) -> Response {
    let reason = super::reason_phrase(status);
    Response::new(status)
        .with_header("Content-Type", "text/html; charset=utf-8")
        .with_body(html_page(status, reason))
}

/// 200 OK with no body.
pub fn ok() -> Response {
    Response::new(200)
}

/// 200 OK carrying `body`.
pub fn ok_with_body(body: impl Into<bytes::Bytes>) -> Response {
    Response::new(200).with_body(body)
}

/// The HTTP/1.0-style response confirming an established CONNECT tunnel.
pub fn connect_established() -> Response {
    let mut resp = Response::new(200).with_version(1, 0);
    resp.reason = "Connection Established".to_string();
    resp.with_header("Proxy-Agent", concat!("quince-server/", env!("CARGO_PKG_VERSION")))
}

/// 400 with the stock HTML body.
pub fn bad_request() -> Response {
    html_error(400)
}

/// 400 carrying a custom string body.
pub fn bad_request_with(body: impl Into<String>) -> Response {
    Response::new(400).with_body(body.into())
}

/// 404 with the stock HTML body.
pub fn not_found() -> Response {
    html_error(404)
}

/// 404 carrying a custom string body.
pub fn not_found_with(body: impl Into<String>) -> Response {
    Response::new(404).with_body(body.into())
}

/// 500 with the stock HTML body.
pub fn internal_error() -> Response {
    html_error(500)
}

/// 503 with the stock HTML body.
pub fn service_unavailable() -> Response {
    html_error(503)
}
