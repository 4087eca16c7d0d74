// Server core
// Owns the accept loop, the one-shot per-connection readers, the
// rendezvous dispatch channel, the idle-connection expirer, and the
// dispatch pipeline that composes extensions and sub-handlers. Connection
// readers are one-shot on purpose: a reader parses a single request,
// publishes it, and exits; Query::resume spawns the next one. That gate is
// what serializes responses into request-arrival order per connection.

mod stats;

pub use stats::{Stats, StatsSnapshot};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use socket2::SockRef;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::conn::StampedConn;
use crate::error::ServerError;
use crate::ext::{ExtEntry, Extension};
use crate::limiter::FdLimiter;
use crate::query::Query;
use crate::sub::{Sub, SubEntry};
use crate::wire::boiler;

type DispatchItem = Result<Query, ServerError>;

#[derive(Default)]
struct Registry {
    exts: Vec<ExtEntry>,
    subs: Vec<SubEntry>,
}

/// Shared server state. Queries hold a non-owning handle back to this so
/// they can resume readers, bury connections, and update statistics.
pub(crate) struct Inner {
    timeout: Duration,
    conns: DashMap<u64, Arc<StampedConn>>,
    next_conn_id: AtomicU64,
    dispatch_tx: StdMutex<Option<mpsc::Sender<DispatchItem>>>,
    dispatch_rx: Mutex<mpsc::Receiver<DispatchItem>>,
    fdl: FdLimiter,
    registry: StdMutex<Registry>,
    stats: Stats,
    shutdown_tx: watch::Sender<bool>,
}

impl Inner {
    pub(crate) fn stats(&self) -> &Stats {
        &self.stats
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn register(&self, conn: Arc<StampedConn>) {
        if self.conns.insert(conn.id(), conn).is_some() {
            panic!("connection registered twice");
        }
    }

    pub(crate) fn unregister(&self, conn: &StampedConn) {
        self.conns.remove(&conn.id());
    }

    /// Unregisters and force-closes a connection. Any query still bound to
    /// it will see I/O failures. Returns whether the connection was still
    /// registered, so competing bury paths (reader error vs expirer) can
    /// attribute the death exactly once.
    pub(crate) fn bury(&self, conn: &StampedConn) -> bool {
        let removed = self.conns.remove(&conn.id()).is_some();
        conn.force_close();
        removed
    }

    fn extensions(&self) -> Vec<ExtEntry> {
        self.registry.lock().unwrap().exts.clone()
    }

    pub(crate) fn extensions_rev(&self) -> Vec<ExtEntry> {
        let mut exts = self.extensions();
        exts.reverse();
        exts
    }

    fn subs(&self) -> Vec<SubEntry> {
        self.registry.lock().unwrap().subs.clone()
    }

    // Applies the forward extension chain and attempts sub-handler
    // routing. Returns None when the query was consumed (or dropped by a
    // failing extension). Registry snapshots are taken under the lock;
    // user code always runs outside it.
    async fn process(&self, mut query: Query) -> Option<Query> {
        let orig = query.orig_path().to_string();
        for entry in self.extensions() {
            if orig.starts_with(&entry.prefix) {
                let (req, scratch) = query.request_and_scratch();
                if let Err(e) = entry.ext.read_request(req, scratch) {
                    debug!(extension = %entry.name, error = %e, "extension rejected request");
                    return None;
                }
            }
        }
        for entry in self.subs() {
            if query.path().starts_with(&entry.prefix) {
                query.strip_path_prefix(entry.prefix.len());
                entry.sub.serve(query).await;
                return None;
            }
        }
        Some(query)
    }
}

/// Spawns the one-shot reader task for a connection.
pub(crate) fn spawn_reader(inner: &Arc<Inner>, conn: Arc<StampedConn>) {
    let inner = inner.clone();
    tokio::spawn(async move {
        read_one(inner, conn).await;
    });
}

// Reads exactly one request and publishes it as a query. Does not loop:
// the next read on this connection starts only when the handler resumes
// the query.
async fn read_one(inner: Arc<Inner>, conn: Arc<StampedConn>) {
    match conn.read_request().await {
        Err(e) => {
            debug!(conn_id = conn.id(), error = %e, "request read failed");
            // A read deadline firing IS the inactivity timeout; account
            // for it as an expiration when this path wins the bury race.
            let expired = matches!(e, ServerError::Timeout);
            if inner.bury(&conn) && expired {
                inner.stats.inc_expire_conn();
            }
        }
        Ok(req) => {
            let query = Query::new(inner.clone(), conn.clone(), req);
            let tx = inner.dispatch_tx.lock().unwrap().clone();
            match tx {
                None => {
                    inner.bury(&conn);
                }
                Some(tx) => {
                    if tx.send(Ok(query)).await.is_err() {
                        inner.bury(&conn);
                    } else {
                        inner.stats.inc_request();
                    }
                }
            }
        }
    }
}

/// The server: accepts connections under FD admission control, reads
/// pipelined requests one at a time per connection, and surfaces each as a
/// [`Query`] from [`read`](Server::read).
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    /// Creates a server over an already-bound listener and starts its
    /// accept and expire loops. Must be called from within a tokio
    /// runtime.
    ///
    /// # Panics
    ///
    /// Panics if the configured timeout is below [`Config::MIN_TIMEOUT_NS`]
    /// or the FD limit is zero; both are configuration bugs.
    pub fn new(listener: TcpListener, config: Config) -> Server {
        assert!(
            config.timeout_ns >= Config::MIN_TIMEOUT_NS,
            "server timeout below minimum"
        );
        let fdl = FdLimiter::new(config.fd_limit);
        let (dispatch_tx, dispatch_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            timeout: config.timeout(),
            conns: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
            dispatch_tx: StdMutex::new(Some(dispatch_tx.clone())),
            dispatch_rx: Mutex::new(dispatch_rx),
            fdl,
            registry: StdMutex::new(Registry::default()),
            stats: Stats::new(),
            shutdown_tx,
        });
        tokio::spawn(accept_loop(inner.clone(), listener, dispatch_tx));
        tokio::spawn(expire_loop(inner.clone()));
        Server { inner }
    }

    /// Binds `addr` and serves it with the default configuration.
    pub async fn bind(addr: &str) -> std::io::Result<Server> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Server::new(listener, Config::default()))
    }

    /// Waits for the next request that no sub-handler consumed.
    ///
    /// An error means the server can no longer accept new connections
    /// (listener death or shutdown); the caller is expected to call
    /// [`shutdown`](Server::shutdown), perhaps after serving outstanding
    /// queries.
    pub async fn read(&self) -> Result<Query, ServerError> {
        loop {
            let item = {
                let mut rx = self.inner.dispatch_rx.lock().await;
                rx.recv().await
            };
            let query = match item {
                None => return Err(ServerError::Closed),
                Some(Err(e)) => return Err(e),
                Some(Ok(query)) => query,
            };
            if let Some(query) = self.inner.process(query).await {
                return Ok(query);
            }
        }
    }

    /// Hosted mode: spawns `n` workers that each loop `read` and answer
    /// every unrouted query with a 404.
    pub fn launch(&self, n: usize) -> Vec<JoinHandle<()>> {
        (0..n)
            .map(|worker| {
                let server = self.clone();
                tokio::spawn(async move {
                    loop {
                        match server.read().await {
                            Err(e) => {
                                debug!(worker, error = %e, "launch worker exiting");
                                break;
                            }
                            Ok(query) => {
                                if let Err(e) = query.resume_and_write(boiler::not_found()).await {
                                    warn!(worker, error = %e, "default response failed");
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Registers a sub-handler under a URL prefix. Sub-handlers are tried
    /// in registration order; the first prefix match on the current path
    /// wins and sees the path with the prefix stripped.
    pub fn add_sub(&self, prefix: impl Into<String>, sub: impl Sub + 'static) {
        self.inner.registry.lock().unwrap().subs.push(SubEntry {
            prefix: prefix.into(),
            sub: Arc::new(sub),
        });
    }

    /// Registers a named extension under a URL prefix. Extensions match
    /// against the original request path, before any sub-handler
    /// rewriting.
    pub fn add_ext(
        &self,
        name: impl Into<String>,
        prefix: impl Into<String>,
        ext: impl Extension + 'static,
    ) {
        self.inner.registry.lock().unwrap().exts.push(ExtEntry {
            name: name.into(),
            prefix: prefix.into(),
            ext: Arc::new(ext),
        });
    }

    /// Stops the server: unblocks the accept loop (closing the listener),
    /// closes the dispatch channel, and force-closes every live
    /// connection. Idempotent. No server or query method should be used
    /// afterwards; those that are return [`ServerError::Closed`] or fail
    /// on their connection.
    pub fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
        self.inner.dispatch_tx.lock().unwrap().take();
        let live: Vec<Arc<StampedConn>> = self
            .inner
            .conns
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for conn in live {
            self.inner.conns.remove(&conn.id());
            conn.force_close();
        }
        info!("server shut down");
    }

    /// The admission limiter, e.g. to register a count notification
    /// channel or to share the limiter with other components.
    pub fn fd_limiter(&self) -> &FdLimiter {
        &self.inner.fdl
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Number of connections currently under server management.
    pub fn live_connections(&self) -> usize {
        self.inner.conns.len()
    }
}

async fn accept_loop(
    inner: Arc<Inner>,
    listener: TcpListener,
    dispatch_tx: mpsc::Sender<DispatchItem>,
) {
    let mut shutdown = inner.shutdown_tx.subscribe();
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        // Admission first: no accept without an FD permit.
        let permit = tokio::select! {
            _ = shutdown.changed() => continue,
            permit = inner.fdl.acquire() => permit,
        };
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Err(e) => {
                error!(error = %e, "listener accept failed");
                drop(permit);
                let _ = dispatch_tx.send(Err(ServerError::Io(e))).await;
                break;
            }
            Ok((stream, peer)) => {
                if inner.is_shutting_down() {
                    break;
                }
                inner.stats.inc_accept_conn();
                let _ = stream.set_nodelay(true);
                if let Err(e) = SockRef::from(&stream).set_keepalive(true) {
                    debug!(error = %e, "failed to enable TCP keepalive");
                }
                let id = inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
                debug!(conn_id = id, peer = %peer, "connection accepted");
                let conn = Arc::new(StampedConn::new(id, stream, permit, inner.timeout));
                inner.register(conn.clone());
                spawn_reader(&inner, conn);
            }
        }
    }
    // Dropping the listener here closes it.
    debug!("accept loop exited");
}

async fn expire_loop(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown_tx.subscribe();
    let mut sweep: u64 = 0;
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        let now = Instant::now();
        let stale: Vec<Arc<StampedConn>> = inner
            .conns
            .iter()
            .filter(|entry| now.duration_since(entry.value().stamp()) >= inner.timeout)
            .map(|entry| entry.value().clone())
            .collect();
        for conn in stale {
            debug!(conn_id = conn.id(), "idle connection expired");
            if inner.bury(&conn) {
                inner.stats.inc_expire_conn();
            }
        }
        if sweep % 4 == 0 {
            info!("{}", inner.stats.summary_line(inner.conns.len()));
        }
        sweep += 1;
        tokio::select! {
            _ = shutdown.changed() => {}
            _ = tokio::time::sleep(inner.timeout) => {}
        }
    }
}
