//! In-process HTTP/1.1 artifact server for download and opponent tests.
//!
//! Routes:
//! - `/model.bin`     full body with Content-Length, honours `Range: bytes=N-`
//! - `/slow.bin`      like `/model.bin`, streamed in 1 KiB pieces every 20 ms
//! - `/norange.bin`   ignores Range, always 200 with the full body
//! - `/chunked.bin`   no Content-Length, body ends when the connection closes
//! - `/truncated.bin` advertises the full length, sends half, then closes
//! - `/shifted.bin`   answers `Range: bytes=N-` with a 206 that starts 1 KiB early
//! - `/redirect`      302 to `/model.bin`
//! - anything else    404

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub const BODY_LEN: usize = 64 * 1024;

/// Deterministic artifact content.
pub fn body() -> Vec<u8> {
    (0..BODY_LEN).map(|i| (i % 251) as u8).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub path: String,
    pub range: Option<String>,
}

pub struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let _ = handle(stream, recorded).await;
                });
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }
}

async fn handle(
    stream: TcpStream,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(());
    }
    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();

    let mut range = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 || line == "\r\n" {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("range") {
                range = Some(value.trim().to_string());
            }
        }
    }

    recorded.lock().unwrap().push(RecordedRequest {
        path: path.clone(),
        range: range.clone(),
    });

    let full = body();
    let offset = range
        .as_deref()
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.strip_suffix('-'))
        .and_then(|n| n.parse::<usize>().ok());

    match path.as_str() {
        "/model.bin" | "/slow.bin" => {
            let (head, payload) = match offset {
                Some(start) if start < BODY_LEN => (
                    format!(
                        "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
                        BODY_LEN - start,
                        start,
                        BODY_LEN - 1,
                        BODY_LEN
                    ),
                    &full[start..],
                ),
                Some(_) => {
                    let head = format!(
                        "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        BODY_LEN
                    );
                    write.write_all(head.as_bytes()).await?;
                    return write.shutdown().await;
                }
                None => (ok_head(Some(BODY_LEN)), &full[..]),
            };
            write.write_all(head.as_bytes()).await?;
            if path == "/slow.bin" {
                for piece in payload.chunks(1024) {
                    write.write_all(piece).await?;
                    write.flush().await?;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            } else {
                write.write_all(payload).await?;
            }
        }
        "/shifted.bin" => match offset {
            Some(start) if start >= 1024 && start < BODY_LEN => {
                // Length matches what the client asked for, bytes do not
                let from = start - 1024;
                let head = format!(
                    "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
                    BODY_LEN - start,
                    from,
                    from + (BODY_LEN - start) - 1,
                    BODY_LEN
                );
                write.write_all(head.as_bytes()).await?;
                write.write_all(&full[from..from + (BODY_LEN - start)]).await?;
            }
            _ => {
                write.write_all(ok_head(Some(BODY_LEN)).as_bytes()).await?;
                write.write_all(&full).await?;
            }
        },
        "/norange.bin" => {
            write.write_all(ok_head(Some(BODY_LEN)).as_bytes()).await?;
            write.write_all(&full).await?;
        }
        "/chunked.bin" => {
            write.write_all(ok_head(None).as_bytes()).await?;
            for piece in full.chunks(4096) {
                write.write_all(piece).await?;
                write.flush().await?;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
        "/truncated.bin" => {
            write.write_all(ok_head(Some(BODY_LEN)).as_bytes()).await?;
            write.write_all(&full[..BODY_LEN / 2]).await?;
        }
        "/redirect" => {
            let head = "HTTP/1.1 302 Found\r\nLocation: /model.bin\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
            write.write_all(head.as_bytes()).await?;
        }
        _ => {
            let head = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
            write.write_all(head.as_bytes()).await?;
        }
    }

    write.shutdown().await
}

fn ok_head(length: Option<usize>) -> String {
    match length {
        Some(len) => format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            len
        ),
        None => "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n".to_string(),
    }
}

/// Poll `condition` every 10 ms for up to 5 s.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}
