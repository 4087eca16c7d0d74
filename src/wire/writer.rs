// Response serializer over the write half of a connection

use std::fmt::Write as _;
use std::io;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;

use super::{Method, Response};

/// Serializes one response per call onto the owned write half of a TCP
/// stream. The request method is needed to suppress bodies for HEAD and
/// to leave CONNECT tunnels unframed.
pub struct ResponseWriter {
    half: OwnedWriteHalf,
}

impl ResponseWriter {
    pub fn new(half: OwnedWriteHalf) -> ResponseWriter {
        ResponseWriter { half }
    }

    pub async fn write_response(
        &mut self,
        method: &Method,
        resp: &mut Response,
    ) -> io::Result<()> {
        let no_body_status = resp.status < 200 || resp.status == 204 || resp.status == 304;
        let connect_tunnel = *method == Method::Connect && (200..300).contains(&resp.status);

        if resp.close && !resp.headers.contains("connection") {
            resp.headers.set("Connection", "close");
        }
        if !no_body_status
            && !connect_tunnel
            && !resp.headers.contains("content-length")
            && !resp.headers.contains("transfer-encoding")
        {
            resp.headers.set("Content-Length", resp.body.len().to_string());
        }

        let mut head = String::with_capacity(256);
        let _ = write!(
            head,
            "HTTP/{}.{} {} {}\r\n",
            resp.version.0, resp.version.1, resp.status, resp.reason
        );
        for (name, value) in resp.headers.iter() {
            let _ = write!(head, "{}: {}\r\n", name, value);
        }
        head.push_str("\r\n");

        self.half.write_all(head.as_bytes()).await?;
        if !no_body_status && !connect_tunnel && *method != Method::Head && !resp.body.is_empty() {
            self.half.write_all(&resp.body).await?;
        }
        self.half.flush().await
    }

    pub fn into_inner(self) -> OwnedWriteHalf {
        self.half
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn round_trip(method: Method, mut resp: Response) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let mut out = Vec::new();
            stream.read_to_end(&mut out).await.unwrap();
            String::from_utf8(out).unwrap()
        });
        let (stream, _) = listener.accept().await.unwrap();
        let (_rd, wr) = stream.into_split();
        let mut writer = ResponseWriter::new(wr);
        writer.write_response(&method, &mut resp).await.unwrap();
        drop(writer);
        client.await.unwrap()
    }

    #[tokio::test]
    async fn test_basic_response_bytes() {
        let resp = Response::new(200).with_body("hi");
        let wire = round_trip(Method::Get, resp).await;
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.contains("Content-Length: 2\r\n"));
        assert!(wire.ends_with("\r\n\r\nhi"));
    }

    #[tokio::test]
    async fn test_head_suppresses_body() {
        let resp = Response::new(200).with_body("hi");
        let wire = round_trip(Method::Head, resp).await;
        assert!(wire.contains("Content-Length: 2\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_connect_tunnel_unframed() {
        let resp = Response::new(200).with_version(1, 0);
        let wire = round_trip(Method::Connect, resp).await;
        assert!(wire.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(!wire.contains("Content-Length"));
    }

    #[tokio::test]
    async fn test_close_header() {
        let mut resp = Response::new(200);
        resp.close = true;
        let wire = round_trip(Method::Get, resp).await;
        assert!(wire.contains("Connection: close\r\n"));
    }
}
