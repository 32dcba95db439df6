//! One-shot HTTP/1.1 server for adapter tests.

use std::time::Duration;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

/// A canned response body sent as separate chunked-encoding frames.
pub(crate) struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub parts: Vec<Vec<u8>>,
    /// When false the connection drops before the terminating frame.
    pub complete: bool,
}

impl Reply {
    pub(crate) fn new(status: u16, content_type: &'static str, parts: Vec<Vec<u8>>) -> Self {
        Self { status, content_type, parts, complete: true }
    }

    pub(crate) fn truncated(mut self) -> Self {
        self.complete = false;
        self
    }
}

/// Serve `reply` to the first connection; returns the base URL.
pub(crate) async fn serve_once(reply: Reply) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        let head = format!(
            "HTTP/1.1 {} X\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
            reply.status, reply.content_type
        );
        stream.write_all(head.as_bytes()).await.unwrap();
        for part in &reply.parts {
            let mut frame = format!("{:x}\r\n", part.len()).into_bytes();
            frame.extend_from_slice(part);
            frame.extend_from_slice(b"\r\n");
            stream.write_all(&frame).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        if reply.complete {
            stream.write_all(b"0\r\n\r\n").await.unwrap();
        }
        stream.flush().await.unwrap();
    });
    format!("http://{addr}")
}

async fn read_request(stream: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let body_len = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < end + 4 + body_len {
            let n = stream.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        return;
    }
}
