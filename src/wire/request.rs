// Parsed HTTP request

use bytes::Bytes;

use super::{Headers, Method, WireError};

/// A fully parsed incoming request. The body has been read off the wire in
/// its entirety, so the connection is immediately ready for the next
/// pipelined request once the caller permits it.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Request path. Sub-handler routing may rewrite this by stripping a
    /// matched prefix; the original is kept on the query.
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    /// HTTP version as (major, minor).
    pub version: (u8, u8),
    pub headers: Headers,
    pub body: Bytes,
}

/// A cookie as sent by the client. Only the name/value pair is parsed;
/// attribute handling is outside this codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Request {
    /// Builds a request from a complete httparse head. The body is filled
    /// in by the reader afterwards.
    pub(crate) fn from_parsed(parsed: &httparse::Request<'_, '_>) -> Result<Request, WireError> {
        let method = Method::from(parsed.method.unwrap_or(""));
        let version = (1, parsed.version.unwrap_or(1));
        let (path, query) = split_target(parsed.path.unwrap_or("/"), &method);

        let mut headers = Headers::new();
        for h in parsed.headers.iter() {
            headers.append(h.name, String::from_utf8_lossy(h.value).into_owned());
        }

        Ok(Request {
            method,
            path,
            query,
            version,
            headers,
            body: Bytes::new(),
        })
    }

    /// Cookies from every `Cookie` header, name/value only.
    pub fn cookies(&self) -> Vec<Cookie> {
        let mut out = Vec::new();
        for header in self.headers.get_all("cookie") {
            for pair in header.split(';') {
                if let Some((name, value)) = pair.split_once('=') {
                    out.push(Cookie {
                        name: name.trim().to_string(),
                        value: value.trim().to_string(),
                    });
                }
            }
        }
        out
    }

    /// First cookie with the given name, if any.
    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        self.cookies().into_iter().find(|c| c.name == name)
    }
}

// Splits a request target into path and query string. Origin-form is the
// common case; absolute-form (proxy requests) is reduced to its path, and
// CONNECT authority-form passes through untouched.
fn split_target(target: &str, method: &Method) -> (String, Option<String>) {
    if *method == Method::Connect {
        return (target.to_string(), None);
    }
    let rest = match target.find("://") {
        Some(scheme_end) => {
            let after = &target[scheme_end + 3..];
            match after.find('/') {
                Some(slash) => &after[slash..],
                None => "/",
            }
        }
        None => target,
    };
    match rest.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (rest.to_string(), None),
    }
}
