// Buffered request reader over the read half of a connection
// Accumulates bytes until httparse reports a complete head, then drains
// the body so the buffer is positioned at the next pipelined request.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;

use super::{Method, Request, WireError, MAX_BODY_BYTES, MAX_HEADERS, MAX_HEAD_BYTES};

/// Reads one parsed request per call from the owned read half of a TCP
/// stream. Leftover buffered bytes survive across calls and are handed
/// back on hijack.
pub struct RequestReader {
    half: OwnedReadHalf,
    buf: BytesMut,
}

impl RequestReader {
    pub fn new(half: OwnedReadHalf) -> RequestReader {
        RequestReader {
            half,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Reads and parses the next request, including its full body.
    pub async fn read_request(&mut self) -> Result<Request, WireError> {
        let (mut req, head_len) = loop {
            if !self.buf.is_empty() {
                let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
                let mut parsed = httparse::Request::new(&mut headers);
                match parsed.parse(&self.buf) {
                    Ok(httparse::Status::Complete(len)) => {
                        break (Request::from_parsed(&parsed)?, len);
                    }
                    Ok(httparse::Status::Partial) => {
                        if self.buf.len() > MAX_HEAD_BYTES {
                            return Err(WireError::HeadTooLarge);
                        }
                    }
                    Err(e) => return Err(WireError::Parse(e)),
                }
            }
            let n = self.half.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(if self.buf.is_empty() {
                    WireError::ConnectionClosed
                } else {
                    WireError::UnexpectedEof
                });
            }
        };
        self.buf.advance(head_len);

        // CONNECT carries no framed body; everything after the head belongs
        // to the tunnel and stays buffered for the hijacker.
        if req.method == Method::Connect {
            return Ok(req);
        }

        if let Some(te) = req.headers.get("transfer-encoding") {
            if te.to_ascii_lowercase().contains("chunked") {
                req.body = self.read_chunked_body().await?;
                return Ok(req);
            }
        }
        if let Some(cl) = req.headers.get("content-length") {
            let len: usize = cl.trim().parse().map_err(|_| WireError::BadContentLength)?;
            if len > MAX_BODY_BYTES {
                return Err(WireError::BodyTooLarge);
            }
            req.body = self.read_exact(len).await?;
        }
        Ok(req)
    }

    /// Returns the read half and any bytes buffered past the last request.
    pub fn into_parts(self) -> (OwnedReadHalf, Bytes) {
        (self.half, self.buf.freeze())
    }

    async fn read_exact(&mut self, len: usize) -> Result<Bytes, WireError> {
        while self.buf.len() < len {
            let n = self.half.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(WireError::UnexpectedEof);
            }
        }
        Ok(self.buf.split_to(len).freeze())
    }

    async fn read_line(&mut self) -> Result<String, WireError> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = self.buf.split_to(pos);
                self.buf.advance(2);
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            if self.buf.len() > MAX_HEAD_BYTES {
                return Err(WireError::BadChunk);
            }
            let n = self.half.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(WireError::UnexpectedEof);
            }
        }
    }

    async fn read_chunked_body(&mut self) -> Result<Bytes, WireError> {
        let mut body = BytesMut::new();
        loop {
            let size_line = self.read_line().await?;
            let size_field = size_line.split(';').next().unwrap_or("").trim();
            let size = usize::from_str_radix(size_field, 16).map_err(|_| WireError::BadChunk)?;
            if body.len() + size > MAX_BODY_BYTES {
                return Err(WireError::BodyTooLarge);
            }
            if size == 0 {
                // Discard trailers up to the blank line.
                loop {
                    if self.read_line().await?.is_empty() {
                        return Ok(body.freeze());
                    }
                }
            }
            let chunk = self.read_exact(size).await?;
            body.extend_from_slice(&chunk);
            if !self.read_line().await?.is_empty() {
                return Err(WireError::BadChunk);
            }
        }
    }
}
