// Cookie-based session extension
// Resolves or mints a session id on the way in, parks it in the scratch
// map for handlers and downstream extensions, and sets the cookie on the
// way out for first-contact clients.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{Extension, Scratch};
use crate::wire::{Request, Response};

const DEFAULT_COOKIE: &str = "quince-session";
const FRESH_MARKER: &str = "quince-session.fresh";

/// Session-tracking extension. Mount it at a prefix with
/// `Server::add_ext`; handlers read the resolved id with
/// [`SessionExt::session_id`].
pub struct SessionExt {
    cookie_name: String,
    minted: AtomicU64,
}

impl SessionExt {
    pub fn new() -> SessionExt {
        SessionExt::with_cookie_name(DEFAULT_COOKIE)
    }

    pub fn with_cookie_name(name: impl Into<String>) -> SessionExt {
        SessionExt {
            cookie_name: name.into(),
            minted: AtomicU64::new(1),
        }
    }

    /// Session id resolved for this query, if the extension ran.
    pub fn session_id(scratch: &Scratch) -> Option<&str> {
        scratch
            .get(DEFAULT_COOKIE)
            .and_then(|v| v.downcast_ref::<String>())
            .map(String::as_str)
    }

    fn mint_id(&self) -> String {
        let seq = self.minted.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        format!("{nanos:x}-{seq:x}")
    }
}

impl Default for SessionExt {
    fn default() -> Self {
        SessionExt::new()
    }
}

impl Extension for SessionExt {
    fn read_request(&self, req: &mut Request, scratch: &mut Scratch) -> anyhow::Result<()> {
        match req.cookie(&self.cookie_name) {
            Some(cookie) => {
                scratch.insert(DEFAULT_COOKIE.to_string(), Box::new(cookie.value));
            }
            None => {
                let id = self.mint_id();
                scratch.insert(DEFAULT_COOKIE.to_string(), Box::new(id));
                scratch.insert(FRESH_MARKER.to_string(), Box::new(true));
            }
        }
        Ok(())
    }

    fn write_response(&self, resp: &mut Response, scratch: &mut Scratch) -> anyhow::Result<()> {
        if scratch.remove(FRESH_MARKER).is_some() {
            if let Some(id) = SessionExt::session_id(scratch) {
                resp.headers
                    .append("Set-Cookie", format!("{}={}; Path=/", self.cookie_name, id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Headers, Method};
    use bytes::Bytes;

    fn get_request(cookie: Option<&str>) -> Request {
        let mut headers = Headers::new();
        if let Some(c) = cookie {
            headers.append("Cookie", c);
        }
        Request {
            method: Method::Get,
            path: "/".to_string(),
            query: None,
            version: (1, 1),
            headers,
            body: Bytes::new(),
        }
    }

    #[test]
    fn test_existing_cookie_is_reused() {
        let ext = SessionExt::new();
        let mut scratch = Scratch::new();
        let mut req = get_request(Some("quince-session=abc"));
        ext.read_request(&mut req, &mut scratch).unwrap();
        assert_eq!(SessionExt::session_id(&scratch), Some("abc"));

        let mut resp = Response::new(200);
        ext.write_response(&mut resp, &mut scratch).unwrap();
        assert!(resp.headers.get("set-cookie").is_none());
    }

    #[test]
    fn test_fresh_session_sets_cookie() {
        let ext = SessionExt::new();
        let mut scratch = Scratch::new();
        let mut req = get_request(None);
        ext.read_request(&mut req, &mut scratch).unwrap();
        let id = SessionExt::session_id(&scratch).unwrap().to_string();

        let mut resp = Response::new(200);
        ext.write_response(&mut resp, &mut scratch).unwrap();
        let cookie = resp.headers.get("set-cookie").unwrap();
        assert!(cookie.starts_with(&format!("quince-session={id}")));
    }

    #[test]
    fn test_minted_ids_are_distinct() {
        let ext = SessionExt::new();
        assert_ne!(ext.mint_id(), ext.mint_id());
    }
}
