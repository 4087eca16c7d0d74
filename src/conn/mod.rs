// Stamped connection
// Decorates an accepted socket with a last-I/O timestamp (for the idle
// expirer), a per-operation deadline, a force-close signal, and the FD
// permit whose release is tied to the connection's lifetime. The server
// guarantees at most one reader and one writer at a time; a read and a
// write may overlap, which is what makes pipelined reception possible
// while a response is in flight.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};

use crate::error::ServerError;
use crate::limiter::Permit;
use crate::wire::{Method, Request, RequestReader, Response, ResponseWriter};

/// A connection under server management. The read and write halves live
/// behind separate locks so a response write can overlap the next
/// pipelined request read.
pub struct StampedConn {
    id: u64,
    timeout: Duration,
    reader: Mutex<Option<RequestReader>>,
    writer: Mutex<Option<ResponseWriter>>,
    stamp: StdMutex<Instant>,
    closed: AtomicBool,
    closed_notify: Notify,
    permit: StdMutex<Option<Permit>>,
}

impl StampedConn {
    pub fn new(id: u64, stream: TcpStream, permit: Permit, timeout: Duration) -> StampedConn {
        let (read_half, write_half) = stream.into_split();
        StampedConn {
            id,
            timeout,
            reader: Mutex::new(Some(RequestReader::new(read_half))),
            writer: Mutex::new(Some(ResponseWriter::new(write_half))),
            stamp: StdMutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            permit: StdMutex::new(Some(permit)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Instant of the last I/O activity on this connection.
    pub fn stamp(&self) -> Instant {
        *self.stamp.lock().unwrap()
    }

    fn touch(&self) {
        *self.stamp.lock().unwrap() = Instant::now();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the connection dead and fails any pending or future I/O on
    /// it. The socket itself closes when the last handle drops.
    pub fn force_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.closed_notify.notify_waiters();
    }

    /// Reads the next parsed request. Any error is terminal for the
    /// connection as far as the server is concerned.
    pub async fn read_request(&self) -> Result<Request, ServerError> {
        let closed = self.closed_notify.notified();
        tokio::pin!(closed);
        if self.is_closed() {
            return Err(ServerError::ConnectionClosed);
        }
        self.touch();
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(ServerError::ConnectionClosed)?;
        let result = tokio::select! {
            _ = &mut closed => Err(ServerError::ConnectionClosed),
            read = tokio::time::timeout(self.timeout, reader.read_request()) => match read {
                Ok(Ok(req)) => Ok(req),
                Ok(Err(e)) => Err(ServerError::Wire(e)),
                Err(_) => Err(ServerError::Timeout),
            },
        };
        drop(guard);
        self.touch();
        result
    }

    /// Serializes one response for a request previously read from this
    /// connection.
    pub async fn write_response(
        &self,
        method: &Method,
        resp: &mut Response,
    ) -> Result<(), ServerError> {
        let closed = self.closed_notify.notified();
        tokio::pin!(closed);
        if self.is_closed() {
            return Err(ServerError::ConnectionClosed);
        }
        self.touch();
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ServerError::ConnectionClosed)?;
        let result = tokio::select! {
            _ = &mut closed => Err(ServerError::ConnectionClosed),
            wrote = tokio::time::timeout(self.timeout, writer.write_response(method, resp)) => match wrote {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ServerError::Io(e)),
                Err(_) => Err(ServerError::Timeout),
            },
        };
        drop(guard);
        self.touch();
        result
    }

    /// Takes the raw transport away from the server. Returns the reunited
    /// stream, any bytes already buffered past the last request, and moves
    /// the FD permit so it is released only when the hijacked connection
    /// drops.
    pub async fn hijack(&self) -> Result<HijackedConn, ServerError> {
        let reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or(ServerError::ConnectionClosed)?;
        let writer = self
            .writer
            .lock()
            .await
            .take()
            .ok_or(ServerError::ConnectionClosed)?;
        let permit = self.permit.lock().unwrap().take();
        let (read_half, read_buf) = reader.into_parts();
        let write_half = writer.into_inner();
        let stream = read_half
            .reunite(write_half)
            .map_err(|_| ServerError::ConnectionClosed)?;
        Ok(HijackedConn {
            stream,
            read_buf,
            _permit: permit,
        })
    }
}

impl std::fmt::Debug for StampedConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StampedConn")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A connection released from server management. Implements `AsyncRead` /
/// `AsyncWrite`; reads drain the codec's leftover buffer before touching
/// the socket. Dropping it closes the socket and releases the FD permit.
pub struct HijackedConn {
    stream: TcpStream,
    read_buf: Bytes,
    _permit: Option<Permit>,
}

impl HijackedConn {
    /// Bytes the codec had buffered beyond the hijacked request.
    pub fn read_buf(&self) -> &Bytes {
        &self.read_buf
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

impl AsyncRead for HijackedConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.read_buf.is_empty() {
            let n = self.read_buf.len().min(buf.remaining());
            buf.put_slice(&self.read_buf[..n]);
            self.read_buf.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for HijackedConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::FdLimiter;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn conn_pair() -> (StampedConn, TcpStream, FdLimiter) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        let fdl = FdLimiter::new(4);
        let permit = fdl.acquire().await;
        (
            StampedConn::new(1, server_side, permit, Duration::from_secs(5)),
            client,
            fdl,
        )
    }

    #[tokio::test]
    async fn test_read_touches_stamp() {
        let (conn, mut client, _fdl) = conn_pair().await;
        let before = conn.stamp();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client
            .write_all(b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n")
            .await
            .unwrap();
        let req = conn.read_request().await.unwrap();
        assert_eq!(req.path, "/x");
        assert!(conn.stamp() > before);
    }

    #[tokio::test]
    async fn test_force_close_fails_pending_read() {
        let (conn, _client, _fdl) = conn_pair().await;
        let conn = std::sync::Arc::new(conn);
        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.read_request().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.force_close();
        let res = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("read should fail promptly after force_close")
            .unwrap();
        assert!(matches!(res, Err(ServerError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_read_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        let fdl = FdLimiter::new(1);
        let permit = fdl.acquire().await;
        let conn = StampedConn::new(1, server_side, permit, Duration::from_millis(100));
        assert!(matches!(
            conn.read_request().await,
            Err(ServerError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_hijack_returns_buffered_bytes_and_permit() {
        let (conn, mut client, fdl) = conn_pair().await;
        // A CONNECT head followed by early tunnel bytes in the same write.
        client
            .write_all(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\nearly")
            .await
            .unwrap();
        let req = conn.read_request().await.unwrap();
        assert_eq!(req.method, Method::Connect);

        let mut hijacked = conn.hijack().await.unwrap();
        // The permit travels with the hijacked connection.
        assert_eq!(fdl.count(), 1);

        // Leftover tunnel bytes come out of the hijacked handle first.
        let mut early = [0u8; 5];
        hijacked.read_exact(&mut early).await.unwrap();
        assert_eq!(&early, b"early");

        // The raw stream is usable in both directions.
        hijacked.write_all(b"pong").await.unwrap();
        let mut out = [0u8; 4];
        client.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"pong");

        // After hijack the server-side handle reports closed I/O.
        assert!(matches!(
            conn.read_request().await,
            Err(ServerError::ConnectionClosed)
        ));

        // Dropping the hijacked connection finally releases the permit.
        drop(hijacked);
        assert_eq!(fdl.count(), 0);
    }
}
