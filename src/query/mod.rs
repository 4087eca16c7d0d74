// Query lifecycle
// Every request surfaces as a Query. The handler must resume the
// connection's reader, hijack the connection, or write a response (which
// may imply resuming first). The connection does not read the next
// pipelined request until one of those happens, which is exactly what
// keeps responses in request-arrival order.

use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::conn::{HijackedConn, StampedConn};
use crate::error::ServerError;
use crate::ext::Scratch;
use crate::server::Inner;
use crate::wire::{Request, Response};

/// A one-shot handle for a single received request.
///
/// Exactly one of [`resume`](Query::resume), [`hijack`](Query::hijack) or
/// [`resume_and_write`](Query::resume_and_write) must run over the life of
/// a query ([`write`](Query::write) alone is also legal and leaves the
/// connection parked until the expirer collects it). A second forward is a
/// programming error and panics; a second write is unrepresentable because
/// `write` consumes the query.
pub struct Query {
    req: Option<Request>,
    scratch: Scratch,
    orig_path: String,
    srv: Option<Arc<Inner>>,
    conn: Option<Arc<StampedConn>>,
    received_at: Instant,
    forwarded: bool,
}

impl Query {
    pub(crate) fn new(srv: Arc<Inner>, conn: Arc<StampedConn>, req: Request) -> Query {
        let orig_path = req.path.clone();
        Query {
            req: Some(req),
            scratch: Scratch::new(),
            orig_path,
            srv: Some(srv),
            conn: Some(conn),
            received_at: Instant::now(),
            forwarded: false,
        }
    }

    /// The parsed request. Sub-handler routing may have rewritten its
    /// path; see [`orig_path`](Query::orig_path) for the original.
    pub fn request(&self) -> &Request {
        self.req.as_ref().expect("query request already consumed")
    }

    pub fn request_mut(&mut self) -> &mut Request {
        self.req.as_mut().expect("query request already consumed")
    }

    /// Current (possibly prefix-stripped) request path.
    pub fn path(&self) -> &str {
        &self.request().path
    }

    /// Request path as it arrived, before any sub-handler rewriting.
    /// Extension matching always uses this.
    pub fn orig_path(&self) -> &str {
        &self.orig_path
    }

    /// When the request was pulled off the wire.
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    pub fn scratch(&self) -> &Scratch {
        &self.scratch
    }

    /// Per-query extension scratch space.
    pub fn scratch_mut(&mut self) -> &mut Scratch {
        &mut self.scratch
    }

    pub(crate) fn request_and_scratch(&mut self) -> (&mut Request, &mut Scratch) {
        (
            self.req.as_mut().expect("query request already consumed"),
            &mut self.scratch,
        )
    }

    pub(crate) fn strip_path_prefix(&mut self, len: usize) {
        let req = self.req.as_mut().expect("query request already consumed");
        req.path = req.path[len..].to_string();
    }

    /// Permits the server to read the next pipelined request on the
    /// connection that delivered this query. Does not suspend; the read
    /// happens on a fresh task.
    ///
    /// # Panics
    ///
    /// Panics if the query was already resumed or hijacked.
    pub fn resume(&mut self) {
        if self.forwarded {
            panic!("query already resumed or hijacked");
        }
        self.forwarded = true;
        let srv = self
            .srv
            .clone()
            .expect("query used after a terminal transition");
        let conn = self
            .conn
            .clone()
            .expect("query used after a terminal transition");
        crate::server::spawn_reader(&srv, conn);
    }

    /// Detaches the connection from the server and hands the raw
    /// transport to the caller. The server will not touch the connection
    /// again; the FD permit travels with the returned handle.
    ///
    /// # Panics
    ///
    /// Panics if the query was already resumed.
    pub async fn hijack(mut self) -> Result<HijackedConn, ServerError> {
        if self.forwarded {
            panic!("query already resumed, cannot hijack");
        }
        self.forwarded = true;
        let srv = self
            .srv
            .take()
            .expect("query used after a terminal transition");
        let conn = self
            .conn
            .take()
            .expect("query used after a terminal transition");
        srv.unregister(&conn);
        conn.hijack().await
    }

    /// Sends `resp` back on the connection that produced the request.
    ///
    /// Runs the extension chain in reverse over the response first. On any
    /// failure — extension or wire — the connection is buried and the
    /// error pertains to that connection only, not to the server.
    pub async fn write(mut self, mut resp: Response) -> Result<(), ServerError> {
        let srv = self
            .srv
            .take()
            .expect("query used after a terminal transition");
        let conn = self
            .conn
            .take()
            .expect("query used after a terminal transition");
        let req = self.req.take().expect("query request already consumed");

        for entry in srv.extensions_rev() {
            if self.orig_path.starts_with(&entry.prefix) {
                if let Err(e) = entry.ext.write_response(&mut resp, &mut self.scratch) {
                    warn!(
                        conn_id = conn.id(),
                        extension = %entry.name,
                        error = %e,
                        "extension failed while writing response"
                    );
                    srv.bury(&conn);
                    return Err(ServerError::Extension(entry.name.clone(), e));
                }
            }
        }

        if let Err(e) = conn.write_response(&req.method, &mut resp).await {
            warn!(conn_id = conn.id(), error = %e, "response write failed");
            srv.bury(&conn);
            return Err(e);
        }

        srv.stats().add_req_resp_time(self.received_at.elapsed());
        srv.stats().inc_response();
        Ok(())
    }

    /// [`resume`](Query::resume) followed by [`write`](Query::write). The
    /// order matters: the next pipelined read is released before this
    /// response hits the wire.
    pub async fn resume_and_write(mut self, resp: Response) -> Result<(), ServerError> {
        self.resume();
        self.write(resp).await
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("orig_path", &self.orig_path)
            .field("forwarded", &self.forwarded)
            .finish()
    }
}
