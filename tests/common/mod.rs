//! Shared utilities for integration tests.
//!
//! Upstreams are raw TCP servers so tests control every byte on the wire,
//! including chunk boundaries and delays of streamed responses.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_gateway::config::{GatewayConfig, UpstreamConfig};
use agent_gateway::http::HttpServer;
use agent_gateway::lifecycle::Shutdown;
use agent_gateway::store::MemoryStore;
use axum::http::StatusCode;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const JWT_SECRET: &str = "integration-jwt-secret";
pub const MASTER_KEY: &str = "integration-master-key";

/// One request as the upstream saw it.
#[derive(Debug, Clone)]
pub struct Captured {
    /// Request line and headers, lower-cased header names not guaranteed.
    pub head: String,
    pub body: Vec<u8>,
}

impl Captured {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or("")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// What the upstream answers with.
#[derive(Debug, Clone)]
pub enum Reply {
    Fixed {
        status: u16,
        content_type: &'static str,
        body: String,
    },
    /// Chunked `text/event-stream`; each chunk is written after its delay.
    Sse(Vec<(Duration, String)>),
    /// Like `Sse`, but the connection is closed before the terminating chunk.
    SseCut(Vec<(Duration, String)>),
}

impl Reply {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self::Fixed {
            status,
            content_type: "application/json",
            body: body.to_string(),
        }
    }
}

/// A running upstream double.
pub struct Backend {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Captured>>>,
    hits: Arc<AtomicUsize>,
}

impl Backend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last(&self) -> Captured {
        self.requests().pop().expect("upstream saw no request")
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<Captured> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let length = head
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Some(Captured { head, body })
}

async fn write_reply(socket: &mut TcpStream, reply: Reply) -> std::io::Result<()> {
    match reply {
        Reply::Fixed {
            status,
            content_type,
            body,
        } => {
            let reason = StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unknown");
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason,
                content_type,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await?;
        }
        Reply::Sse(chunks) => {
            write_chunks(socket, chunks).await?;
            socket.write_all(b"0\r\n\r\n").await?;
        }
        Reply::SseCut(chunks) => {
            write_chunks(socket, chunks).await?;
        }
    }
    socket.shutdown().await
}

async fn write_chunks(socket: &mut TcpStream, chunks: Vec<(Duration, String)>) -> std::io::Result<()> {
    socket
        .write_all(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\
              Transfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
        )
        .await?;
    socket.flush().await?;
    for (delay, data) in chunks {
        tokio::time::sleep(delay).await;
        socket
            .write_all(format!("{:x}\r\n{}\r\n", data.len(), data).as_bytes())
            .await?;
        socket.flush().await?;
    }
    Ok(())
}

/// Start an upstream on an ephemeral port that answers with `f(request)`.
pub async fn start_backend<F>(f: F) -> Backend
where
    F: Fn(&Captured) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let hits = Arc::new(AtomicUsize::new(0));
    let f = Arc::new(f);

    let (seen, count) = (requests.clone(), hits.clone());
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let (f, seen, count) = (f.clone(), seen.clone(), count.clone());
            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };
                count.fetch_add(1, Ordering::SeqCst);
                let reply = f(&request);
                seen.lock().unwrap().push(request);
                let _ = write_reply(&mut socket, reply).await;
            });
        }
    });

    Backend { addr, requests, hits }
}

/// An address nothing listens on.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Gateway config pointing the three reference upstreams at test doubles.
pub fn config_for(ams: &str, letta: &str, litellm: &str) -> GatewayConfig {
    let mut config = GatewayConfig {
        upstreams: vec![
            UpstreamConfig::ams(ams),
            UpstreamConfig::letta(letta),
            UpstreamConfig::litellm(litellm),
        ],
        ..Default::default()
    };
    config.auth.jwt_secret = JWT_SECRET.to_string();
    config.auth.agent_secret_master_key = Some(MASTER_KEY.to_string());
    config.auth.ownership_retry_delay_ms = 1;
    config.http_client.pool_timeout_secs = 2;
    config
}

pub struct Gateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl Gateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Serve `config` on an ephemeral port with an in-memory store.
pub async fn spawn_gateway(config: GatewayConfig) -> Gateway {
    let server = HttpServer::new(config, Arc::new(MemoryStore::new()), None).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, receiver).await;
    });

    Gateway { addr, shutdown }
}

/// Send `request` verbatim and read the reply until the gateway closes.
///
/// reqwest normalises URLs, so paths it would rewrite go through here.
pub async fn raw_request(addr: SocketAddr, request: &str) -> String {
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket.write_all(request.as_bytes()).await.unwrap();
    let mut reply = Vec::new();
    socket.read_to_end(&mut reply).await.unwrap();
    String::from_utf8_lossy(&reply).to_string()
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// HS256 token for `sub` accepted by the default token settings.
pub fn mint_token(sub: &str) -> String {
    let exp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 600;
    encode(
        &Header::default(),
        &json!({ "sub": sub, "aud": "authenticated", "exp": exp, "email": format!("{}@example.com", sub) }),
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}
