// Extension chain
// Prefix-scoped pre/post hooks around header processing. The forward pass
// runs before dispatch over every extension whose prefix matches the
// original request path; the reverse pass runs on response write, over
// the same set, in opposite order.

mod session;

pub use session::SessionExt;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::wire::{Request, Response};

/// Per-query scratch space. Extensions communicate with each other and
/// with the handler only through this map (keyed by extension name) or by
/// mutating the request/response.
pub type Scratch = HashMap<String, Box<dyn Any + Send + Sync>>;

/// A module of server-side logic attached to the header processing chains
/// for incoming requests and outgoing responses.
///
/// Implementations are shared across queries and must be safe under
/// concurrent calls. An error from `read_request` aborts dispatch for
/// that query; an error from `write_response` buries the connection —
/// earlier `write_response` calls in the chain are not rolled back, so
/// treat the reverse pass as best-effort.
pub trait Extension: Send + Sync {
    fn read_request(&self, req: &mut Request, scratch: &mut Scratch) -> anyhow::Result<()>;
    fn write_response(&self, resp: &mut Response, scratch: &mut Scratch) -> anyhow::Result<()>;
}

/// Registry record: a named extension bound to a URL prefix.
#[derive(Clone)]
pub(crate) struct ExtEntry {
    pub name: String,
    pub prefix: String,
    pub ext: Arc<dyn Extension>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    impl Extension for Recorder {
        fn read_request(&self, _req: &mut Request, scratch: &mut Scratch) -> anyhow::Result<()> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            scratch.insert("recorder".to_string(), Box::new(7u32));
            Ok(())
        }

        fn write_response(&self, _resp: &mut Response, scratch: &mut Scratch) -> anyhow::Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let seen = scratch
                .get("recorder")
                .and_then(|v| v.downcast_ref::<u32>())
                .copied();
            assert_eq!(seen, Some(7));
            Ok(())
        }
    }

    #[test]
    fn test_scratch_carries_values_between_passes() {
        let ext = Recorder {
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        };
        let mut scratch = Scratch::new();
        let mut req = Request {
            method: crate::wire::Method::Get,
            path: "/".to_string(),
            query: None,
            version: (1, 1),
            headers: crate::wire::Headers::new(),
            body: bytes::Bytes::new(),
        };
        let mut resp = Response::new(200);
        ext.read_request(&mut req, &mut scratch).unwrap();
        ext.write_response(&mut resp, &mut scratch).unwrap();
        assert_eq!(ext.reads.load(Ordering::SeqCst), 1);
        assert_eq!(ext.writes.load(Ordering::SeqCst), 1);
    }
}
