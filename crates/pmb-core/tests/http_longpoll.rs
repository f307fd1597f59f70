//! Long-poll HTTP backend against a scripted local server
//!
//! The stub answers the first poll with one envelope and every later poll
//! with `503`, and records every request it sees.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pmb_core::transport::http::HttpTransport;
use pmb_core::{BusConfig, Connection, KeySet, Message};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Instant};
use url::Url;

// ============================================================================
// Test Utilities
// ============================================================================

const ENVELOPE: &str = r#"{"type":"CopyData","data":"over http","id":"poster-1"}"#;
const UNAVAILABLE: &str =
    "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
const ACCEPTED: &str = "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

#[derive(Debug, Clone)]
struct Request {
    method: String,
    path: String,
    body: String,
    at: Instant,
}

struct Stub {
    url: Url,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl Stub {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/bus", listener.local_addr().unwrap())).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let log = requests.clone();
        tokio::spawn(async move {
            let mut served_envelope = false;
            while let Ok((socket, _)) = listener.accept().await {
                let Some(request) = read_request(socket).await else {
                    continue;
                };
                let (mut socket, request) = request;
                let response = match request.method.as_str() {
                    "GET" if !served_envelope => {
                        served_envelope = true;
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            ENVELOPE.len(),
                            ENVELOPE
                        )
                    }
                    "GET" => UNAVAILABLE.to_string(),
                    _ => ACCEPTED.to_string(),
                };
                log.lock().push(request);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self { url, requests }
    }

    fn gets(&self) -> Vec<Request> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == "GET")
            .cloned()
            .collect()
    }

    fn posts(&self) -> Vec<Request> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == "POST")
            .cloned()
            .collect()
    }
}

async fn read_request(mut socket: TcpStream) -> Option<(TcpStream, Request)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut parts = head.lines().next()?.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();
    let length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[head_end..]).to_string();

    Some((
        socket,
        Request {
            method,
            path,
            body,
            at: Instant::now(),
        },
    ))
}

async fn open(url: &Url, id: &str, delay: Duration) -> Connection {
    let config = BusConfig {
        reconnect_delay: delay,
        ..Default::default()
    };
    let transport = HttpTransport::new(url, id, delay, false).unwrap();
    Connection::open(Arc::new(transport), id, &config, KeySet::empty())
        .await
        .unwrap()
}

// ============================================================================
// Receiving
// ============================================================================

#[tokio::test]
async fn test_long_poll_delivers_then_backs_off() {
    let stub = Stub::start().await;
    let delay = Duration::from_millis(200);
    let mut conn = open(&stub.url, "poller-1", delay).await;

    let env = timeout(Duration::from_secs(5), conn.recv()).await.unwrap().unwrap();
    assert_eq!(env.message().unwrap(), Message::CopyData { data: "over http".into() });
    assert_eq!(env.sender_id(), Some("poster-1"));

    sleep(Duration::from_millis(900)).await;
    let gets = stub.gets();
    assert!(gets.iter().all(|r| r.path == "/bus/poller-1"));
    assert!(gets.len() >= 3, "polling stopped after {} requests", gets.len());
    assert!(gets.len() <= 7, "{} polls in under a second", gets.len());

    // every retry after a 503 waits out the delay
    for pair in gets[1..].windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(150));
    }

    // server errors on the poll are not link failures
    assert!(timeout(Duration::from_millis(100), conn.recv()).await.is_err());
}

// ============================================================================
// Sending
// ============================================================================

#[tokio::test]
async fn test_post_carries_body() {
    let stub = Stub::start().await;
    let conn = open(&stub.url, "poster-2", Duration::from_millis(200)).await;

    conn.send_and_flush(&Message::OpenUrl {
        data: "https://example.org/".into(),
    })
    .await
    .unwrap();

    let posts = stub.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].path, "/bus");
    assert!(posts[0].body.contains(r#""type":"OpenURL""#));
    assert!(posts[0].body.contains(r#""id":"poster-2""#));
}

#[tokio::test]
async fn test_refused_post_is_dropped_without_reconnect() {
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let url = Url::parse(&format!("http://{}/bus", closed)).unwrap();
    let mut conn = open(&url, "poster-3", Duration::from_secs(1)).await;

    timeout(Duration::from_secs(2), conn.send_and_flush(&Message::TestAuth))
        .await
        .unwrap()
        .unwrap();

    let mut signals = 0;
    let deadline = Instant::now() + Duration::from_millis(1500);
    while let Ok(Some(env)) = tokio::time::timeout_at(deadline, conn.recv()).await {
        if env.is_reconnected() {
            signals += 1;
        }
    }
    assert_eq!(signals, 0);
}
