//! Per-session log of server-to-client messages delivered over SSE.
//!
//! Every message written to an SSE stream is appended first, so a client that
//! reconnects with `last-event-id` can be sent exactly what it missed. Event
//! IDs are unique and strictly increasing within one store; a store belongs
//! to exactly one session, so IDs are never shared between sessions.
use std::{fmt::Display, num::ParseIntError, str::FromStr, sync::Arc};

use tokio::sync::RwLock;

use crate::model::ServerJsonRpcMessage;

pub type StreamId = Arc<str>;

/// Position of a message in a session's event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    pub const fn new(value: u64) -> Self {
        EventId(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for EventId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(EventId)
    }
}

impl From<u64> for EventId {
    fn from(value: u64) -> Self {
        EventId(value)
    }
}

#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub event_id: EventId,
    pub stream_id: StreamId,
    pub message: Arc<ServerJsonRpcMessage>,
}

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("event store has been cleared")]
    Closed,
    #[error("event store backend failure: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Storage backend for replayable SSE events.
///
/// Implementations must hand out IDs in append order and must not reuse an ID
/// after [`EventStore::clear`].
#[async_trait::async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Record `message` as the next event of `stream_id` and return its ID.
    async fn append(
        &self,
        stream_id: &StreamId,
        message: Arc<ServerJsonRpcMessage>,
    ) -> Result<EventId, EventStoreError>;

    /// Every event of `stream_id` with an ID greater than `last_event_id`,
    /// in append order.
    async fn replay_after(
        &self,
        stream_id: &StreamId,
        last_event_id: EventId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// The stream that `event_id` was appended to, if the store knows it.
    async fn stream_of(&self, event_id: EventId) -> Result<Option<StreamId>, EventStoreError>;

    /// Drop all events and refuse further appends.
    async fn clear(&self);
}

#[derive(Debug, Default)]
struct EventLog {
    last_id: u64,
    events: Vec<StoredEvent>,
    cleared: bool,
}

/// Unbounded in-process [`EventStore`]; its contents live as long as the
/// session that owns it.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    log: RwLock<EventLog>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        stream_id: &StreamId,
        message: Arc<ServerJsonRpcMessage>,
    ) -> Result<EventId, EventStoreError> {
        let mut log = self.log.write().await;
        if log.cleared {
            return Err(EventStoreError::Closed);
        }
        log.last_id += 1;
        let event_id = EventId(log.last_id);
        log.events.push(StoredEvent {
            event_id,
            stream_id: stream_id.clone(),
            message,
        });
        Ok(event_id)
    }

    async fn replay_after(
        &self,
        stream_id: &StreamId,
        last_event_id: EventId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let log = self.log.read().await;
        if log.cleared {
            return Err(EventStoreError::Closed);
        }
        // ids are pushed in increasing order
        let start = log.events.partition_point(|e| e.event_id <= last_event_id);
        Ok(log.events[start..]
            .iter()
            .filter(|e| &e.stream_id == stream_id)
            .cloned()
            .collect())
    }

    async fn stream_of(&self, event_id: EventId) -> Result<Option<StreamId>, EventStoreError> {
        let log = self.log.read().await;
        if log.cleared {
            return Err(EventStoreError::Closed);
        }
        Ok(log
            .events
            .binary_search_by_key(&event_id, |e| e.event_id)
            .ok()
            .map(|index| log.events[index].stream_id.clone()))
    }

    async fn clear(&self) {
        let mut log = self.log.write().await;
        log.events = Vec::new();
        log.cleared = true;
    }
}
