//! Session registry for the Streamable HTTP transport.
//!
//! A session starts with an `initialize` request. The registry assigns it a
//! random [`SessionId`], which the client sends back in `mcp-session-id` on
//! every later request. The entry is removed when the session closes, no
//! matter who closed it (DELETE, idle timeout, transport fault, shutdown).

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

use tokio::sync::RwLock;

use super::StreamableHttpServerConfig;
use crate::handler::server::McpServer;

pub mod transport;

pub use transport::{
    CloseReason, RequestOutcome, ServerSseMessage, SessionError, SessionState, SessionTransport,
    SseStream,
};

pub type SessionId = Arc<str>;

pub fn session_id() -> SessionId {
    uuid::Uuid::new_v4().to_string().into()
}

pub(crate) type SessionTable = RwLock<HashMap<SessionId, Arc<SessionTransport>>>;

/// Concurrent map from session ID to the session's transport.
///
/// Only `create`, `get` and `remove` touch the map from outside; closing
/// transports remove their own entry.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<SessionTable>,
    server: Arc<McpServer>,
    config: Arc<StreamableHttpServerConfig>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("server", self.server.server_info())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    pub fn new(server: Arc<McpServer>, config: Arc<StreamableHttpServerConfig>) -> Self {
        Self {
            sessions: Default::default(),
            server,
            config,
        }
    }

    /// Register a fresh transport in [`SessionState::AwaitingInit`].
    pub async fn create(&self) -> Arc<SessionTransport> {
        let mut sessions = self.sessions.write().await;
        loop {
            let id = session_id();
            if let Entry::Vacant(entry) = sessions.entry(id.clone()) {
                let transport = SessionTransport::new(
                    id.clone(),
                    self.server.clone(),
                    self.config.clone(),
                    Arc::downgrade(&self.sessions),
                );
                entry.insert(transport.clone());
                tracing::info!(session_id = %id, "session created");
                return transport;
            }
        }
    }

    /// The live transport for `id`. Sessions that started closing are not returned.
    pub async fn get(&self, id: &str) -> Option<Arc<SessionTransport>> {
        self.sessions
            .read()
            .await
            .get(id)
            .filter(|transport| !transport.is_closing())
            .cloned()
    }

    /// Take `id` out of the registry and close it. Returns `None` (and changes
    /// nothing) when the ID is unknown.
    pub async fn remove(&self, id: &str) -> Option<Arc<SessionTransport>> {
        let transport = self.sessions.write().await.remove(id)?;
        transport.close(CloseReason::Terminated).await;
        Some(transport)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Close every session, e.g. on server shutdown.
    pub async fn close_all(&self) {
        let transports: Vec<_> = self
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, transport)| transport)
            .collect();
        tracing::info!(count = transports.len(), "closing all sessions");
        for transport in transports {
            transport.close(CloseReason::Shutdown).await;
        }
    }

    pub fn server(&self) -> &Arc<McpServer> {
        &self.server
    }

    pub fn config(&self) -> &Arc<StreamableHttpServerConfig> {
        &self.config
    }
}
