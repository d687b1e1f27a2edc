//! Streamable HTTP server transport.
//!
//! One endpoint serves every session:
//!
//! - `POST` carries client messages. `initialize` without a known session
//!   creates one and returns its ID in `mcp-session-id`.
//! - `GET` opens the standalone SSE stream, or resumes any stream of the
//!   session when `last-event-id` is present.
//! - `DELETE` terminates the session.
//!
//! ```ignore
//! let service = StreamableHttpService::new(server, StreamableHttpServerConfig::default());
//! let router = service.router();
//! axum::serve(listener, router).await?;
//! ```

pub mod axum;
pub mod session;

use std::{sync::Arc, time::Duration};

pub use self::axum::StreamableHttpService;

use crate::transport::event_store::{EventStore, InMemoryEventStore};

pub type EventStoreFactory = Arc<dyn Fn() -> Arc<dyn EventStore> + Send + Sync>;

/// Configuration for the streamable HTTP server
#[derive(Clone)]
pub struct StreamableHttpServerConfig {
    /// Route of the MCP endpoint.
    pub path: String,
    /// The ping message interval for SSE connections.
    pub sse_keep_alive: Option<Duration>,
    /// How long a POSTed request may run before the answer switches from a
    /// plain JSON body to an SSE stream. `None` always waits for JSON unless
    /// the handler emits a notification first.
    pub sse_upgrade_after: Option<Duration>,
    /// Close sessions that saw no traffic and have no open stream for this long.
    pub session_idle_timeout: Option<Duration>,
    /// Buffer between a running request handler and its response stream.
    pub channel_capacity: usize,
    /// CORS: origins starting with one of these prefixes are echoed back.
    pub allowed_origin_prefixes: Vec<String>,
    /// Creates the event store of each new session.
    pub event_store_factory: EventStoreFactory,
}

impl StreamableHttpServerConfig {
    pub const DEFAULT_PATH: &'static str = "/mcp";

    pub fn with_event_store_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn EventStore> + Send + Sync + 'static,
    {
        self.event_store_factory = Arc::new(factory);
        self
    }
}

impl Default for StreamableHttpServerConfig {
    fn default() -> Self {
        Self {
            path: Self::DEFAULT_PATH.to_owned(),
            sse_keep_alive: Some(Duration::from_secs(15)),
            sse_upgrade_after: Some(Duration::from_secs(5)),
            session_idle_timeout: None,
            channel_capacity: 16,
            allowed_origin_prefixes: vec![
                "http://localhost:".to_owned(),
                "http://127.0.0.1:".to_owned(),
            ],
            event_store_factory: Arc::new(|| Arc::new(InMemoryEventStore::new()) as Arc<dyn EventStore>),
        }
    }
}

impl std::fmt::Debug for StreamableHttpServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpServerConfig")
            .field("path", &self.path)
            .field("sse_keep_alive", &self.sse_keep_alive)
            .field("sse_upgrade_after", &self.sse_upgrade_after)
            .field("session_idle_timeout", &self.session_idle_timeout)
            .field("channel_capacity", &self.channel_capacity)
            .field("allowed_origin_prefixes", &self.allowed_origin_prefixes)
            .finish_non_exhaustive()
    }
}
