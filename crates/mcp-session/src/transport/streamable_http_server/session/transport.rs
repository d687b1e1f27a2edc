//! Per-session server transport.
//!
//! Owns the session's event store, its live SSE streams and the requests it
//! is running. Every message bound for a stream is appended to the store and
//! forwarded while holding the session lock, so a replay followed by live
//! attachment never skips nor repeats an event.

use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::sync::{Mutex, MutexGuard, Notify, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use super::{SessionId, SessionTable};
use crate::{
    handler::server::{McpServer, Peer, RequestContext},
    model::{
        CancelledNotificationParam, ErrorData, InitializeRequestParam, JsonRpcMessage,
        JsonRpcNotification, JsonRpcRequest, ProtocolVersion, RequestId, ServerJsonRpcMessage,
        method, parse_params, to_json_object,
    },
    transport::{
        event_store::{EventId, EventStore, EventStoreError, StreamId},
        streamable_http_server::StreamableHttpServerConfig,
    },
};

/// Stream carrying server-initiated messages outside any request.
pub const STANDALONE_STREAM_ID: &str = "standalone";

#[derive(Debug, Clone)]
pub struct ServerSseMessage {
    pub event_id: Option<EventId>,
    pub message: Arc<ServerJsonRpcMessage>,
}

pub type SseStream = UnboundedReceiverStream<ServerSseMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    AwaitingInit,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// DELETE from the client.
    Terminated,
    IdleTimeout,
    Shutdown,
    /// The transport can no longer deliver messages; skips `Closing`.
    TransportFault,
}

/// How the answer to a POSTed request is delivered.
#[derive(Debug)]
pub enum RequestOutcome {
    /// The response was ready in time and nothing else was sent before it.
    Json(ServerJsonRpcMessage),
    /// Notifications and the eventual response follow on a resumable stream.
    Stream(SseStream),
    /// The request was cancelled; nothing will be delivered.
    Discarded,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} has not completed initialization")]
    NotInitialized(SessionId),
    #[error("session {0} is already initialized")]
    AlreadyInitialized(SessionId),
    #[error("session {0} is closed")]
    Closed(SessionId),
    #[error("session {0} already has a standalone stream attached")]
    StreamConflict(SessionId),
    #[error("event store of session {session} failed: {source}")]
    EventStore {
        session: SessionId,
        #[source]
        source: EventStoreError,
    },
}

struct Inner {
    state: SessionState,
    /// Active streams. `Some` while a client is attached to receive live events.
    streams: HashMap<StreamId, Option<mpsc::UnboundedSender<ServerSseMessage>>>,
    in_flight: HashMap<RequestId, CancellationToken>,
    protocol_version: Option<ProtocolVersion>,
    close_reason: Option<CloseReason>,
}

pub struct SessionTransport {
    id: SessionId,
    server: Arc<McpServer>,
    config: Arc<StreamableHttpServerConfig>,
    store: Arc<dyn EventStore>,
    inner: Mutex<Inner>,
    peer: Peer,
    standalone: StreamId,
    next_stream: AtomicU64,
    activity: Notify,
    ct: CancellationToken,
    table: Weak<SessionTable>,
}

impl std::fmt::Debug for SessionTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTransport")
            .field("id", &self.id)
            .field("closing", &self.ct.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SessionTransport {
    pub(crate) fn new(
        id: SessionId,
        server: Arc<McpServer>,
        config: Arc<StreamableHttpServerConfig>,
        table: Weak<SessionTable>,
    ) -> Arc<Self> {
        let (peer, peer_rx) = Peer::channel();
        let store = (config.event_store_factory)();
        let idle_timeout = config.session_idle_timeout;
        let session = Arc::new(Self {
            id,
            server,
            config,
            store,
            inner: Mutex::new(Inner {
                state: SessionState::AwaitingInit,
                streams: HashMap::new(),
                in_flight: HashMap::new(),
                protocol_version: None,
                close_reason: None,
            }),
            peer,
            standalone: STANDALONE_STREAM_ID.into(),
            next_stream: AtomicU64::new(0),
            activity: Notify::new(),
            ct: CancellationToken::new(),
            table,
        });
        tokio::spawn(forward_peer_messages(
            Arc::downgrade(&session),
            peer_rx,
            session.ct.clone(),
        ));
        if let Some(timeout) = idle_timeout {
            tokio::spawn(watch_idle(Arc::downgrade(&session), timeout, session.ct.clone()));
        }
        session
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// True once closing started; the session accepts nothing new.
    pub fn is_closing(&self) -> bool {
        self.ct.is_cancelled()
    }

    /// Why the session closed, once closing has started.
    pub async fn close_reason(&self) -> Option<CloseReason> {
        self.inner.lock().await.close_reason
    }

    pub async fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.inner.lock().await.protocol_version.clone()
    }

    fn touch(&self) {
        self.activity.notify_one();
    }

    fn ensure_active(&self, inner: &Inner) -> Result<(), SessionError> {
        match inner.state {
            SessionState::Active => Ok(()),
            SessionState::AwaitingInit => Err(SessionError::NotInitialized(self.id.clone())),
            SessionState::Closing | SessionState::Closed => {
                Err(SessionError::Closed(self.id.clone()))
            }
        }
    }

    /// Complete the handshake and move to [`SessionState::Active`].
    pub async fn initialize(
        &self,
        id: RequestId,
        param: &InitializeRequestParam,
    ) -> Result<ServerJsonRpcMessage, SessionError> {
        self.touch();
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::AwaitingInit => {}
            SessionState::Active => return Err(SessionError::AlreadyInitialized(self.id.clone())),
            SessionState::Closing | SessionState::Closed => {
                return Err(SessionError::Closed(self.id.clone()));
            }
        }
        let result = self.server.initialize(param);
        let response = match to_json_object(&result) {
            Ok(object) => JsonRpcMessage::response(id, object),
            Err(error) => return Ok(JsonRpcMessage::error(Some(id), error)),
        };
        inner.streams.insert(self.standalone.clone(), None);
        inner.protocol_version = Some(result.protocol_version.clone());
        inner.state = SessionState::Active;
        tracing::info!(
            session_id = %self.id,
            client = %param.client_info.name,
            protocol_version = %result.protocol_version,
            "session initialized"
        );
        Ok(response)
    }

    /// Run `request` and decide between a JSON answer and an SSE stream.
    pub async fn handle_request(
        self: &Arc<Self>,
        request: JsonRpcRequest,
    ) -> Result<RequestOutcome, SessionError> {
        self.touch();
        let request_ct = {
            let mut inner = self.inner.lock().await;
            self.ensure_active(&inner)?;
            if inner.in_flight.contains_key(&request.id) {
                return Ok(RequestOutcome::Json(JsonRpcMessage::error(
                    Some(request.id),
                    ErrorData::invalid_request("Invalid Request: request id is already in use", None),
                )));
            }
            let ct = self.ct.child_token();
            inner.in_flight.insert(request.id.clone(), ct.clone());
            ct
        };

        let (tx, mut rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let context = RequestContext::for_request(&request, self.peer.clone())
            .with_cancellation(request_ct.clone())
            .with_related_channel(tx.clone());
        let request_id = request.id.clone();
        tracing::debug!(session_id = %self.id, id = %request_id, method = %request.method, "request received");

        let session = self.clone();
        tokio::spawn(async move {
            let response = session.server.handle_request(request, context).await;
            if session.finish_request(&request_id).await {
                tracing::debug!(session_id = %session.id, id = %request_id, "discarding result of cancelled request");
                return;
            }
            if tx.send(response).await.is_err() {
                tracing::debug!(session_id = %session.id, id = %request_id, "response channel closed");
            }
        });

        let first = match self.config.sse_upgrade_after {
            Some(deadline) => tokio::time::timeout(deadline, next_message(&mut rx, &request_ct))
                .await
                .ok(),
            None => Some(next_message(&mut rx, &request_ct).await),
        };
        match first {
            Some(Some(message)) if message.is_final() => Ok(RequestOutcome::Json(message)),
            Some(None) => Ok(RequestOutcome::Discarded),
            Some(Some(message)) => self.upgrade_to_stream(rx, Some(message), request_ct).await,
            None => self.upgrade_to_stream(rx, None, request_ct).await,
        }
    }

    async fn upgrade_to_stream(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<ServerJsonRpcMessage>,
        pending: Option<ServerJsonRpcMessage>,
        request_ct: CancellationToken,
    ) -> Result<RequestOutcome, SessionError> {
        let stream_id: StreamId =
            format!("request-{}", self.next_stream.fetch_add(1, Ordering::Relaxed)).into();
        let (sse_tx, sse_rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.inner.lock().await;
            self.ensure_active(&inner)?;
            inner.streams.insert(stream_id.clone(), Some(sse_tx));
        }
        tracing::debug!(session_id = %self.id, %stream_id, "answering over sse");

        // runs until the final response, independent of the HTTP connection
        let session = self.clone();
        tokio::spawn(async move {
            let mut pending = pending;
            loop {
                let message = match pending.take() {
                    Some(message) => message,
                    None => match next_message(&mut rx, &request_ct).await {
                        Some(message) => message,
                        None => break,
                    },
                };
                let is_final = message.is_final();
                if let Err(error) = session.publish(&stream_id, message).await {
                    tracing::debug!(session_id = %session.id, %stream_id, %error, "stream publish failed");
                    break;
                }
                if is_final {
                    break;
                }
            }
            session.end_stream(&stream_id).await;
        });
        Ok(RequestOutcome::Stream(UnboundedReceiverStream::new(sse_rx)))
    }

    /// Removes the in-flight entry; true when the result must be dropped.
    async fn finish_request(&self, id: &RequestId) -> bool {
        let mut inner = self.inner.lock().await;
        inner
            .in_flight
            .remove(id)
            .is_none_or(|ct| ct.is_cancelled())
    }

    async fn end_stream(&self, stream_id: &StreamId) {
        self.inner.lock().await.streams.remove(stream_id);
    }

    /// Notifications from the client.
    pub async fn handle_notification(
        &self,
        notification: JsonRpcNotification,
    ) -> Result<(), SessionError> {
        self.touch();
        let inner = self.inner.lock().await;
        self.ensure_active(&inner)?;
        match notification.method.as_str() {
            method::CANCELLED => {
                match parse_params::<CancelledNotificationParam>(notification.params) {
                    Ok(param) => match inner.in_flight.get(&param.request_id) {
                        Some(ct) => {
                            tracing::info!(session_id = %self.id, id = %param.request_id, reason = ?param.reason, "request cancelled by client");
                            ct.cancel();
                        }
                        None => {
                            tracing::debug!(session_id = %self.id, id = %param.request_id, "cancellation for unknown request")
                        }
                    },
                    Err(error) => {
                        tracing::warn!(session_id = %self.id, %error, "malformed cancellation")
                    }
                }
            }
            method::INITIALIZED => {
                tracing::debug!(session_id = %self.id, "client finished initialization")
            }
            other => tracing::debug!(session_id = %self.id, method = %other, "ignoring notification"),
        }
        Ok(())
    }

    /// Append `message` to `stream_id` and forward it to an attached client.
    pub async fn publish(
        &self,
        stream_id: &StreamId,
        message: ServerJsonRpcMessage,
    ) -> Result<EventId, SessionError> {
        let message = Arc::new(message);
        let mut inner = self.inner.lock().await;
        self.ensure_active(&inner)?;
        let event_id = match self.store.append(stream_id, message.clone()).await {
            Ok(event_id) => event_id,
            Err(source) => return Err(self.store_failure(inner, source).await),
        };
        if let Some(slot) = inner.streams.get_mut(stream_id) {
            let detached = slot.as_ref().is_some_and(|tx| {
                tx.send(ServerSseMessage {
                    event_id: Some(event_id),
                    message,
                })
                .is_err()
            });
            if detached {
                tracing::debug!(session_id = %self.id, %stream_id, "client detached from stream");
                *slot = None;
            }
        }
        Ok(event_id)
    }

    /// Attach the standalone stream. Only one may be attached at a time.
    pub async fn open_standalone_stream(&self) -> Result<SseStream, SessionError> {
        self.touch();
        let mut inner = self.inner.lock().await;
        self.ensure_active(&inner)?;
        let slot = inner.streams.entry(self.standalone.clone()).or_default();
        if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(SessionError::StreamConflict(self.id.clone()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *slot = Some(tx);
        tracing::debug!(session_id = %self.id, "standalone stream attached");
        Ok(UnboundedReceiverStream::new(rx))
    }

    /// Replay the stream that `last_event_id` belongs to, strictly after it,
    /// then keep delivering live events if that stream is still active.
    pub async fn resume(&self, last_event_id: EventId) -> Result<SseStream, SessionError> {
        self.touch();
        let mut inner = self.inner.lock().await;
        self.ensure_active(&inner)?;
        let stream_id = match self.store.stream_of(last_event_id).await {
            Ok(stream_id) => stream_id.unwrap_or_else(|| self.standalone.clone()),
            Err(source) => return Err(self.store_failure(inner, source).await),
        };
        let events = match self.store.replay_after(&stream_id, last_event_id).await {
            Ok(events) => events,
            Err(source) => return Err(self.store_failure(inner, source).await),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let replayed = events.len();
        for event in events {
            let _ = tx.send(ServerSseMessage {
                event_id: Some(event.event_id),
                message: event.message,
            });
        }
        let live = match inner.streams.get_mut(&stream_id) {
            Some(slot) => {
                *slot = Some(tx);
                true
            }
            None => false,
        };
        tracing::info!(session_id = %self.id, %stream_id, %last_event_id, replayed, live, "stream resumed");
        Ok(UnboundedReceiverStream::new(rx))
    }

    async fn store_failure(&self, inner: MutexGuard<'_, Inner>, source: EventStoreError) -> SessionError {
        drop(inner);
        tracing::error!(session_id = %self.id, %source, "event store failed, closing session");
        self.close(CloseReason::TransportFault).await;
        SessionError::EventStore {
            session: self.id.clone(),
            source,
        }
    }

    async fn has_pending_work(&self) -> bool {
        let inner = self.inner.lock().await;
        !inner.in_flight.is_empty()
            || inner
                .streams
                .values()
                .flatten()
                .any(|tx| !tx.is_closed())
    }

    /// Close the session: end streams after what they already queued, stop
    /// in-flight requests, clear the event store and leave the registry.
    /// Idempotent.
    pub async fn close(&self, reason: CloseReason) {
        {
            let mut inner = self.inner.lock().await;
            if self.ct.is_cancelled()
                || matches!(inner.state, SessionState::Closing | SessionState::Closed)
            {
                return;
            }
            inner.close_reason = Some(reason);
            if reason != CloseReason::TransportFault {
                inner.state = SessionState::Closing;
                tracing::info!(session_id = %self.id, ?reason, "session closing");
            }
            self.ct.cancel();
        }
        {
            let mut inner = self.inner.lock().await;
            inner.state = SessionState::Closed;
            inner.streams.clear();
            inner.in_flight.clear();
        }
        self.store.clear().await;
        if let Some(table) = self.table.upgrade() {
            let mut sessions = table.write().await;
            if sessions
                .get(&self.id)
                .is_some_and(|entry| std::ptr::eq(entry.as_ref(), self))
            {
                sessions.remove(&self.id);
            }
        }
        tracing::info!(session_id = %self.id, ?reason, "session closed");
    }
}

async fn next_message(
    rx: &mut mpsc::Receiver<ServerJsonRpcMessage>,
    ct: &CancellationToken,
) -> Option<ServerJsonRpcMessage> {
    tokio::select! {
        message = rx.recv() => message,
        _ = ct.cancelled() => None,
    }
}

/// Pump messages sent through the session's [`Peer`] onto the standalone stream.
async fn forward_peer_messages(
    session: Weak<SessionTransport>,
    mut rx: mpsc::UnboundedReceiver<ServerJsonRpcMessage>,
    ct: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            message = rx.recv() => message,
            _ = ct.cancelled() => None,
        };
        let (Some(message), Some(session)) = (message, session.upgrade()) else {
            break;
        };
        let stream_id = session.standalone.clone();
        if let Err(error) = session.publish(&stream_id, message).await {
            tracing::debug!(session_id = %session.id, %error, "dropping server notification");
        }
    }
}

async fn watch_idle(session: Weak<SessionTransport>, timeout: Duration, ct: CancellationToken) {
    loop {
        let Some(session) = session.upgrade() else {
            return;
        };
        tokio::select! {
            _ = ct.cancelled() => return,
            _ = session.activity.notified() => continue,
            _ = tokio::time::sleep(timeout) => {
                if session.has_pending_work().await {
                    continue;
                }
                tracing::info!(session_id = %session.id, ?timeout, "session idle");
                session.close(CloseReason::IdleTimeout).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::{
        handler::server::router::tool::ToolRoute,
        model::{JsonRpcVersion2_0, Tool, object},
        transport::streamable_http_server::session::SessionRegistry,
    };

    fn server() -> McpServer {
        McpServer::builder("transport-test", "0.0.1")
            .tool(ToolRoute::new(
                Tool::new("echo", "echo", object(json!({ "type": "object" }))),
                |args, _ctx| async move { serde_json::Value::Object(args).to_string() },
            ))
            .tool(ToolRoute::new(
                Tool::new("slow", "sleeps, reporting progress", object(json!({ "type": "object" }))),
                |_args, ctx: RequestContext| async move {
                    let _ = ctx.notify_progress(0.5, Some(1.0), None).await;
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    "done"
                },
            ))
            .build()
            .unwrap()
    }

    async fn active_session(config: StreamableHttpServerConfig) -> (SessionRegistry, Arc<SessionTransport>) {
        let registry = SessionRegistry::new(Arc::new(server()), Arc::new(config));
        let session = registry.create().await;
        session
            .initialize(RequestId::Number(0), &InitializeRequestParam::default())
            .await
            .unwrap();
        (registry, session)
    }

    fn call(id: i64, name: &str) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: JsonRpcVersion2_0,
            id: RequestId::Number(id),
            method: method::CALL_TOOL.into(),
            params: Some(object(json!({
                "name": name,
                "arguments": {},
                "_meta": { "progressToken": format!("progress-{id}") },
            }))),
        }
    }

    #[tokio::test]
    async fn test_requests_before_initialize_are_rejected() {
        let registry = SessionRegistry::new(
            Arc::new(server()),
            Arc::new(StreamableHttpServerConfig::default()),
        );
        let session = registry.create().await;
        assert!(matches!(
            session.handle_request(call(1, "echo")).await,
            Err(SessionError::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_second_initialize_is_rejected() {
        let (_registry, session) = active_session(Default::default()).await;
        assert!(matches!(
            session
                .initialize(RequestId::Number(9), &InitializeRequestParam::default())
                .await,
            Err(SessionError::AlreadyInitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_fast_request_answers_with_json() {
        let (_registry, session) = active_session(Default::default()).await;
        let outcome = session.handle_request(call(1, "echo")).await.unwrap();
        let RequestOutcome::Json(message) = outcome else {
            panic!("expected json, got {outcome:?}");
        };
        assert!(message.responds_to(&RequestId::Number(1)));
    }

    #[tokio::test]
    async fn test_progress_switches_to_resumable_stream() {
        let (_registry, session) = active_session(Default::default()).await;
        let outcome = session.handle_request(call(2, "slow")).await.unwrap();
        let RequestOutcome::Stream(stream) = outcome else {
            panic!("expected a stream, got {outcome:?}");
        };
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(*events[0].message, JsonRpcMessage::Notification(_)));
        assert!(events[1].message.responds_to(&RequestId::Number(2)));

        // the whole request stream can be replayed from its first event
        let replay: Vec<_> = session
            .resume(events[0].event_id.unwrap())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].event_id, events[1].event_id);
    }

    #[tokio::test]
    async fn test_resume_standalone_replays_then_goes_live() {
        let (_registry, session) = active_session(Default::default()).await;
        let mut first = session.open_standalone_stream().await.unwrap();
        for n in 1..=10 {
            session
                .peer()
                .notify("notifications/message", Some(object(json!({ "level": "info", "data": n }))))
                .unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(first.next().await.unwrap().event_id.unwrap());
        }
        drop(first);

        let mut resumed = session.resume(seen[4]).await.unwrap();
        for expected in &seen[5..] {
            assert_eq!(resumed.next().await.unwrap().event_id.as_ref(), Some(expected));
        }
        session.peer().notify("notifications/message", None).unwrap();
        let live = resumed.next().await.unwrap();
        assert!(live.event_id.unwrap() > seen[9]);
    }

    #[tokio::test]
    async fn test_only_one_standalone_stream() {
        let (_registry, session) = active_session(Default::default()).await;
        let _stream = session.open_standalone_stream().await.unwrap();
        assert!(matches!(
            session.open_standalone_stream().await,
            Err(SessionError::StreamConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_request_is_discarded() {
        let config = StreamableHttpServerConfig {
            sse_upgrade_after: None,
            ..Default::default()
        };
        let (_registry, session) = active_session(config).await;
        let request = JsonRpcRequest {
            params: Some(object(json!({ "name": "slow" }))),
            ..call(3, "slow")
        };
        // no progress token, so nothing reaches the client before the response
        let running = {
            let session = session.clone();
            tokio::spawn(async move { session.handle_request(request).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        session
            .handle_notification(JsonRpcNotification {
                jsonrpc: JsonRpcVersion2_0,
                method: method::CANCELLED.into(),
                params: Some(object(json!({ "requestId": 3, "reason": "user aborted" }))),
            })
            .await
            .unwrap();
        let outcome = running.await.unwrap().unwrap();
        assert!(matches!(outcome, RequestOutcome::Discarded));
    }

    #[tokio::test]
    async fn test_close_ends_streams_and_rejects_work() {
        let (registry, session) = active_session(Default::default()).await;
        let stream = session.open_standalone_stream().await.unwrap();
        session.peer().notify("notifications/message", None).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.close(CloseReason::Terminated).await;

        // queued events drain, then the stream ends
        let drained: Vec<_> = stream.collect().await;
        assert_eq!(drained.len(), 1);
        assert_eq!(session.state().await, SessionState::Closed);
        assert_eq!(session.close_reason().await, Some(CloseReason::Terminated));
        assert!(registry.is_empty().await);
        assert!(matches!(
            session.handle_request(call(4, "echo")).await,
            Err(SessionError::Closed(_))
        ));
        session.close(CloseReason::Terminated).await;
    }

    #[tokio::test]
    async fn test_idle_session_is_closed() {
        let config = StreamableHttpServerConfig {
            session_idle_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (registry, session) = active_session(config).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(session.state().await, SessionState::Closed);
        assert_eq!(session.close_reason().await, Some(CloseReason::IdleTimeout));
        assert!(registry.is_empty().await);
    }

    /// Accepts nothing; remembers whether the session cleared it.
    #[derive(Debug, Default)]
    struct BrokenStore {
        cleared: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl EventStore for BrokenStore {
        async fn append(
            &self,
            _stream_id: &StreamId,
            _message: Arc<ServerJsonRpcMessage>,
        ) -> Result<EventId, EventStoreError> {
            Err(EventStoreError::Backend(Box::new(std::io::Error::other(
                "disk full",
            ))))
        }

        async fn replay_after(
            &self,
            _stream_id: &StreamId,
            _last_event_id: EventId,
        ) -> Result<Vec<crate::transport::event_store::StoredEvent>, EventStoreError> {
            Ok(Vec::new())
        }

        async fn stream_of(&self, _event_id: EventId) -> Result<Option<StreamId>, EventStoreError> {
            Ok(None)
        }

        async fn clear(&self) {
            self.cleared.store(true, Ordering::Release);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_event_store_fault_closes_directly() {
        let store = Arc::new(BrokenStore::default());
        let config = StreamableHttpServerConfig::default().with_event_store_factory({
            let store = store.clone();
            move || store.clone() as Arc<dyn EventStore>
        });
        let (registry, session) = active_session(config).await;
        let stream = session.open_standalone_stream().await.unwrap();

        let observer = {
            let session = session.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                loop {
                    let state = session.state().await;
                    if seen.last() != Some(&state) {
                        seen.push(state);
                    }
                    if state == SessionState::Closed {
                        return seen;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let standalone = session.standalone.clone();
        let published = session
            .publish(&standalone, JsonRpcMessage::notification(method::LOGGING_MESSAGE, None))
            .await;
        assert!(matches!(
            published,
            Err(SessionError::EventStore {
                source: EventStoreError::Backend(_),
                ..
            })
        ));
        assert_eq!(session.state().await, SessionState::Closed);
        assert_eq!(session.close_reason().await, Some(CloseReason::TransportFault));
        assert!(registry.is_empty().await);
        assert!(store.cleared.load(Ordering::Acquire));

        let seen = observer.await.unwrap();
        assert!(!seen.contains(&SessionState::Closing), "{seen:?}");
        assert_eq!(seen.last(), Some(&SessionState::Closed));

        // the event that failed to store was never delivered
        let delivered: Vec<_> = stream.collect().await;
        assert!(delivered.is_empty());
        assert!(matches!(
            session.handle_request(call(5, "echo")).await,
            Err(SessionError::Closed(_))
        ));
    }
}
