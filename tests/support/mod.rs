//! Shared utilities for engine integration tests: an in-memory origin that
//! understands byte ranges with configurable misbehavior, and a reporter
//! that records every forwarded event for assertions.

// Each integration test binary compiles its own copy and uses a subset.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use accelara::reporter::{EventRecord, Reporter};
use accelara::DownloadJob;

/// How the origin treats `Range` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangePolicy {
    /// Honor every range with 206
    Honor,
    /// Honor ranges starting at byte zero; silently replay the full body
    /// with 200 for anything later (the classic anti-accelerator stance)
    RejectNonZeroStart,
    /// Honor only the single-byte probe range; 403 for real ranges
    Forbid,
    /// Pretend the header was never sent
    Ignore,
}

/// GET responder serving `body` under the configured range policy.
pub struct FileResponder {
    body: Vec<u8>,
    policy: RangePolicy,
    /// Parsed `(start, end)` of each GET, `None` for un-ranged requests
    pub ranges_seen: Arc<Mutex<Vec<Option<(u64, u64)>>>>,
}

impl FileResponder {
    pub fn new(body: Vec<u8>, policy: RangePolicy) -> Self {
        Self {
            body,
            policy,
            ranges_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn full_body(&self) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_bytes(self.body.clone())
    }

    fn slice(&self, start: u64, end: u64) -> ResponseTemplate {
        let slice = self.body[start as usize..=end as usize].to_vec();
        ResponseTemplate::new(206)
            .insert_header("accept-ranges", "bytes")
            .insert_header(
                "content-range",
                format!("bytes {start}-{end}/{}", self.body.len()).as_str(),
            )
            .set_body_bytes(slice)
    }
}

impl Respond for FileResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_range(v, self.body.len() as u64));

        self.ranges_seen.lock().unwrap().push(range);

        if self.body.is_empty() {
            return self.full_body();
        }

        match (self.policy, range) {
            (RangePolicy::Ignore, _) | (_, None) => self.full_body(),
            (RangePolicy::Honor, Some((start, end))) => self.slice(start, end),
            (RangePolicy::RejectNonZeroStart, Some((start, end))) => {
                if start == 0 {
                    self.slice(start, end)
                } else {
                    self.full_body()
                }
            }
            (RangePolicy::Forbid, Some((start, end))) => {
                if (start, end) == (0, 0) {
                    self.slice(0, 0)
                } else {
                    ResponseTemplate::new(403)
                }
            }
        }
    }
}

fn parse_range(header: &str, len: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    if len == 0 || start >= len {
        return None;
    }
    let end: u64 = match end {
        "" => len - 1,
        e => e.parse::<u64>().ok()?.min(len - 1),
    };
    (start <= end).then_some((start, end))
}

/// Start an origin serving `body` at `/file` under the given policy.
///
/// HEAD replies 200 and advertises `Accept-Ranges: bytes` unless the policy
/// ignores ranges; it never reveals a size, so engines discover it through
/// the single-byte probe like they must against real CDNs fronting HEAD.
pub async fn spawn_origin(
    body: Vec<u8>,
    policy: RangePolicy,
) -> (MockServer, String, Arc<Mutex<Vec<Option<(u64, u64)>>>>) {
    let server = MockServer::start().await;

    let mut head = ResponseTemplate::new(200);
    if policy != RangePolicy::Ignore {
        head = head.insert_header("accept-ranges", "bytes");
    }
    Mock::given(method("HEAD"))
        .respond_with(head)
        .mount(&server)
        .await;

    let responder = FileResponder::new(body, policy);
    let ranges_seen = responder.ranges_seen.clone();
    Mock::given(method("GET"))
        .respond_with(responder)
        .mount(&server)
        .await;

    let url = format!("{}/file", server.uri());
    (server, url, ranges_seen)
}

/// Raw TCP origin that answers the HEAD and single-byte probes cleanly but
/// resets every real request halfway through the body, simulating sustained
/// connection loss. wiremock cannot drop sockets, so this speaks just enough
/// HTTP/1.1 by hand.
pub async fn spawn_resetting_origin(body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let _ = serve_then_reset(socket, body).await;
            });
        }
    });

    format!("http://{addr}/file")
}

async fn serve_then_reset(mut socket: TcpStream, body: Vec<u8>) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut buf = [0u8; 2048];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        head.extend_from_slice(&buf[..n]);
    }
    let request = String::from_utf8_lossy(&head).to_ascii_lowercase();

    if request.starts_with("head") {
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\n\
                  accept-ranges: bytes\r\n\
                  content-length: 0\r\n\
                  connection: close\r\n\r\n",
            )
            .await?;
        socket.shutdown().await?;
        return Ok(());
    }

    let range = request
        .lines()
        .find_map(|line| line.strip_prefix("range: bytes="))
        .and_then(|spec| {
            let (start, end) = spec.trim().split_once('-')?;
            let start: usize = start.parse().ok()?;
            let end: usize = match end {
                "" => body.len() - 1,
                e => e.parse::<usize>().ok()?.min(body.len() - 1),
            };
            (start <= end).then_some((start, end))
        });

    // The size probe deserves a clean answer so the engine learns the total
    // and plans chunks; everything afterwards gets the reset treatment.
    if range == Some((0, 0)) {
        let header = format!(
            "HTTP/1.1 206 Partial Content\r\n\
             accept-ranges: bytes\r\n\
             content-range: bytes 0-0/{}\r\n\
             content-length: 1\r\n\
             connection: close\r\n\r\n",
            body.len()
        );
        socket.write_all(header.as_bytes()).await?;
        socket.write_all(&body[..1]).await?;
        socket.shutdown().await?;
        return Ok(());
    }

    let (status, slice) = match range {
        Some((start, end)) => (
            format!(
                "HTTP/1.1 206 Partial Content\r\n\
                 accept-ranges: bytes\r\n\
                 content-range: bytes {start}-{end}/{}\r\n\
                 content-length: {}\r\n\
                 connection: close\r\n\r\n",
                body.len(),
                end - start + 1
            ),
            &body[start..=end],
        ),
        None => (
            format!(
                "HTTP/1.1 200 OK\r\n\
                 content-length: {}\r\n\
                 connection: close\r\n\r\n",
                body.len()
            ),
            &body[..],
        ),
    };

    socket.write_all(status.as_bytes()).await?;
    socket.write_all(&slice[..(slice.len() / 2).max(1)]).await?;
    socket.flush().await?;

    // Let the client drain the half it got, then slam the door: linger(0)
    // turns the close into an RST, which is what a dying link looks like.
    tokio::time::sleep(Duration::from_millis(200)).await;
    socket.set_linger(Some(Duration::ZERO))?;
    drop(socket);
    Ok(())
}

/// Reporter capturing every forwarded record.
#[derive(Default)]
pub struct CollectingReporter {
    records: Mutex<Vec<EventRecord>>,
}

#[async_trait]
impl Reporter for CollectingReporter {
    async fn report(&self, record: EventRecord) {
        self.records.lock().unwrap().push(record);
    }
}

impl CollectingReporter {
    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.records()
            .iter()
            .filter_map(|r| r.get("status").and_then(|s| s.as_str()).map(String::from))
            .collect()
    }

    pub fn terminal(&self) -> Option<EventRecord> {
        self.records().into_iter().find(|r| {
            r.get("status")
                .and_then(|s| s.as_str())
                .is_some_and(|s| matches!(s, "completed" | "error" | "paused"))
        })
    }

    pub fn has_message_containing(&self, needle: &str) -> bool {
        self.records().iter().any(|r| {
            r.get("message")
                .and_then(|m| m.as_str())
                .is_some_and(|m| m.contains(needle))
        })
    }
}

/// Deterministic pseudo-random test payload
pub fn test_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) % 251) as u8).collect()
}

/// Job tuned for fast tests: small chunks, short timeouts, two retries
pub fn test_job(url: &str, out: std::path::PathBuf) -> DownloadJob {
    let mut job = DownloadJob::new(url, out, "test-dl");
    job.concurrency = 4;
    job.min_chunk_size = 1024;
    job.retries = 2;
    job.connect_timeout = 5;
    job.read_timeout = 10;
    job
}

pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(data))
}
