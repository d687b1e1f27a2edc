#![allow(dead_code)]
pub mod weather;

use std::time::Duration;

use futures::{StreamExt, stream::BoxStream};
use mcp_session::transport::streamable_http_server::{
    StreamableHttpServerConfig, StreamableHttpService,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

pub const ACCEPT_SSE: &str = "text/event-stream";
pub const ACCEPT_BOTH: &str = "text/event-stream, application/json";
pub const PROTOCOL_VERSION: &str = "2025-06-18";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".to_string().into()),
        )
        .with_test_writer()
        .try_init();
}

// ─── Test server ────────────────────────────────────────────────────────────

/// A server on an ephemeral port; shuts down when dropped.
pub struct TestServer {
    pub url: String,
    pub service: StreamableHttpService,
    ct: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.ct.cancel();
    }
}

pub async fn start_test_server(config: StreamableHttpServerConfig) -> TestServer {
    init_tracing();
    let server = weather::test_server().expect("valid test server");
    let service = StreamableHttpService::new(server, config);
    let router = service.router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let url = format!("http://{addr}{}", service.config().path);

    let ct = CancellationToken::new();
    let shutdown = ct.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled_owned().await })
            .await;
    });
    TestServer { url, service, ct }
}

pub fn fast_config() -> StreamableHttpServerConfig {
    StreamableHttpServerConfig {
        sse_keep_alive: Some(Duration::from_secs(15)),
        sse_upgrade_after: Some(Duration::from_millis(200)),
        ..Default::default()
    }
}

// ─── Requests ───────────────────────────────────────────────────────────────

pub fn initialize_request(id: i64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0.0" }
        }
    })
}

pub fn request(id: i64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

pub fn call_tool(id: i64, name: &str, arguments: Value) -> Value {
    request(id, "tools/call", json!({ "name": name, "arguments": arguments }))
}

pub async fn post(
    client: &reqwest::Client,
    url: &str,
    session_id: Option<&str>,
    body: &Value,
) -> reqwest::Response {
    let mut builder = client
        .post(url)
        .header("Accept", ACCEPT_BOTH)
        .header("Content-Type", "application/json")
        .body(body.to_string());
    if let Some(session_id) = session_id {
        builder = builder
            .header("Mcp-Session-Id", session_id)
            .header("Mcp-Protocol-Version", PROTOCOL_VERSION);
    }
    builder.send().await.expect("POST")
}

pub async fn get_stream(
    client: &reqwest::Client,
    url: &str,
    session_id: &str,
    last_event_id: Option<&str>,
) -> reqwest::Response {
    let mut builder = client
        .get(url)
        .header("Accept", ACCEPT_SSE)
        .header("Mcp-Session-Id", session_id)
        .header("Mcp-Protocol-Version", PROTOCOL_VERSION);
    if let Some(last_event_id) = last_event_id {
        builder = builder.header("Last-Event-Id", last_event_id);
    }
    builder.send().await.expect("GET")
}

/// POST initialize plus `notifications/initialized`; returns the session ID.
pub async fn open_session(client: &reqwest::Client, url: &str) -> String {
    let response = post(client, url, None, &initialize_request(0)).await;
    assert_eq!(response.status(), 200, "initialize should succeed");
    let session_id = response
        .headers()
        .get("Mcp-Session-Id")
        .expect("session ID header")
        .to_str()
        .unwrap()
        .to_string();
    let response = post(
        client,
        url,
        Some(&session_id),
        &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
    )
    .await;
    assert_eq!(response.status(), 202);
    session_id
}

// ─── SSE parsing ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SseFrame {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: Value,
}

/// Minimal SSE reader over a reqwest body; skips keep-alive comments.
pub struct SseReader {
    stream: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: String,
}

impl SseReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            stream: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            buffer: String::new(),
        }
    }

    pub async fn next_frame(&mut self) -> Option<SseFrame> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                if let Some(frame) = parse_frame(&block) {
                    return Some(frame);
                }
                continue;
            }
            match self.stream.next().await {
                Some(Ok(chunk)) => self.buffer.push_str(&String::from_utf8_lossy(&chunk)),
                Some(Err(_)) | None => return None,
            }
        }
    }

    /// Next frame, panicking if none arrives in time.
    pub async fn expect_frame(&mut self) -> SseFrame {
        tokio::time::timeout(Duration::from_secs(5), self.next_frame())
            .await
            .expect("frame within 5s")
            .expect("stream still open")
    }
}

fn parse_frame(block: &str) -> Option<SseFrame> {
    let mut id = None;
    let mut event = None;
    let mut data = String::new();
    for line in block.lines() {
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "id" => id = Some(value.to_owned()),
            "event" => event = Some(value.to_owned()),
            "data" => {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(value);
            }
            _ => {}
        }
    }
    if data.is_empty() {
        return None;
    }
    Some(SseFrame {
        id,
        event,
        data: serde_json::from_str(&data).expect("frame data is JSON"),
    })
}
