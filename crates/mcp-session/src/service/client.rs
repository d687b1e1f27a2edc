//! Client Session Adapter.
//!
//! [`McpClientAdapter`] models exactly one MCP session over Streamable HTTP:
//! `connect` performs the handshake, the typed calls run while the session is
//! active, and `disconnect` tears it down. Reconnection is never automatic.
//!
//! Errors produced while the adapter is closing its own session are tagged
//! [`ErrorKind::ExpectedOnClose`] where they originate, so the error hook
//! only ever sees genuine faults.

use std::{
    borrow::Cow,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    time::Duration,
};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    model::{
        CallToolRequestParam, CallToolResult, ClientCapabilities, ErrorCode, ErrorData,
        GetPromptRequestParam, GetPromptResult, Implementation, InitializeRequestParam,
        InitializeResult, JsonObject, JsonRpcMessage, JsonRpcNotification, ListPromptsResult,
        ListToolsResult, PaginatedRequestParam, ProtocolVersion, RequestId,
        ServerJsonRpcMessage, method, to_json_object,
    },
    transport::streamable_http_client::{
        ResumableSseStream, SseRetryConfig, StreamableHttpClient, StreamableHttpError,
        StreamableHttpPostResponse,
    },
};

/// Whether an error is a side effect of the adapter's own disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ExpectedOnClose,
    Unexpected,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Already connected. Disconnect first.")]
    AlreadyConnected,
    #[error("Not connected to server.")]
    NotConnected,
    #[error("server returned an error: {0}")]
    McpError(#[from] ErrorData),
    #[error("transport error when {context}: {source}")]
    Transport {
        kind: ErrorKind,
        context: Cow<'static, str>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("unexpected response: {0}")]
    UnexpectedResponse(Cow<'static, str>),
    #[error("request {request_id} was interrupted by disconnect")]
    Interrupted { request_id: RequestId },
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Transport { kind, .. } => *kind,
            ClientError::Interrupted { .. } => ErrorKind::ExpectedOnClose,
            _ => ErrorKind::Unexpected,
        }
    }

    fn transport<E>(
        kind: ErrorKind,
        context: impl Into<Cow<'static, str>>,
        source: StreamableHttpError<E>,
    ) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ClientError::Transport {
            kind,
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type NotificationHandler = Arc<dyn Fn(JsonRpcNotification) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&ClientError) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ClientAdapterConfig {
    pub uri: Arc<str>,
    pub client_info: Implementation,
    pub protocol_version: ProtocolVersion,
    pub retry_config: SseRetryConfig,
    /// How long `disconnect` lets the background stream wind down before
    /// aborting it.
    pub disconnect_grace: Duration,
}

impl ClientAdapterConfig {
    pub fn with_uri(uri: impl Into<Arc<str>>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }
}

impl Default for ClientAdapterConfig {
    fn default() -> Self {
        Self {
            uri: "http://127.0.0.1:4005/mcp".into(),
            client_info: Implementation::from_build_env(),
            protocol_version: ProtocolVersion::LATEST,
            retry_config: SseRetryConfig::default(),
            disconnect_grace: Duration::from_millis(200),
        }
    }
}

/// State of one connected session. Dropped with the session, so a later
/// `connect` never inherits its disconnecting flag.
struct ClientSession {
    id: Arc<str>,
    protocol_version: Arc<str>,
    server_info: InitializeResult,
    next_id: AtomicI64,
    ct: CancellationToken,
    disconnecting: AtomicBool,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl ClientSession {
    fn classify(&self) -> ErrorKind {
        if self.disconnecting.load(Ordering::Acquire) || self.ct.is_cancelled() {
            ErrorKind::ExpectedOnClose
        } else {
            ErrorKind::Unexpected
        }
    }

    fn transport_error<E>(
        &self,
        context: impl Into<Cow<'static, str>>,
        source: StreamableHttpError<E>,
    ) -> ClientError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ClientError::transport(self.classify(), context, source)
    }
}

/// The adapter's current session, shared with its background stream task.
type SessionSlot = Arc<Mutex<Option<Arc<ClientSession>>>>;

/// Forget `session` if it is still the current one and stop its in-flight work.
async fn release_session(slot: &SessionSlot, session: &Arc<ClientSession>) {
    {
        let mut current = slot.lock().await;
        if current
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            *current = None;
        }
    }
    tracing::warn!(session_id = %session.id, "transport fault, session closed locally");
    session.ct.cancel();
}

#[derive(Clone, Default)]
struct Hooks {
    on_notification: Option<NotificationHandler>,
    on_error: Option<ErrorHandler>,
}

impl Hooks {
    fn notify(&self, notification: JsonRpcNotification) {
        match &self.on_notification {
            Some(handler) => handler(notification),
            None => tracing::trace!(method = %notification.method, "notification without handler"),
        }
    }

    fn report(&self, error: &ClientError) {
        match error.kind() {
            ErrorKind::ExpectedOnClose => {
                tracing::debug!(%error, "suppressed error caused by disconnect")
            }
            ErrorKind::Unexpected => {
                tracing::error!(%error, "client session error");
                if let Some(handler) = &self.on_error {
                    handler(error);
                }
            }
        }
    }
}

pub struct McpClientAdapter<C: StreamableHttpClient> {
    client: C,
    config: ClientAdapterConfig,
    session: SessionSlot,
    hooks: Hooks,
}

impl<C: StreamableHttpClient> std::fmt::Debug for McpClientAdapter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClientAdapter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "__reqwest")]
impl McpClientAdapter<reqwest::Client> {
    pub fn new(uri: impl Into<Arc<str>>) -> Self {
        Self::from_config(ClientAdapterConfig::with_uri(uri))
    }

    pub fn from_config(config: ClientAdapterConfig) -> Self {
        Self::with_client(reqwest::Client::default(), config)
    }
}

impl<C: StreamableHttpClient> McpClientAdapter<C> {
    pub fn with_client(client: C, config: ClientAdapterConfig) -> Self {
        Self {
            client,
            config,
            session: SessionSlot::default(),
            hooks: Hooks::default(),
        }
    }

    /// Called for every notification the server sends, on any stream.
    pub fn on_notification(
        mut self,
        handler: impl Fn(JsonRpcNotification) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_notification = Some(Arc::new(handler));
        self
    }

    /// Called for unexpected background faults. Disconnect noise never
    /// reaches it.
    pub fn on_error(mut self, handler: impl Fn(&ClientError) + Send + Sync + 'static) -> Self {
        self.hooks.on_error = Some(Arc::new(handler));
        self
    }

    pub fn config(&self) -> &ClientAdapterConfig {
        &self.config
    }

    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    pub async fn session_id(&self) -> Option<Arc<str>> {
        self.session.lock().await.as_ref().map(|session| session.id.clone())
    }

    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.server_info.clone())
    }

    /// Run the initialize handshake. Fails if this adapter already has a session.
    pub async fn connect(&self) -> Result<InitializeResult, ClientError> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            return Err(ClientError::AlreadyConnected);
        }
        let uri = self.config.uri.clone();
        let init_id = RequestId::Number(0);
        let param = InitializeRequestParam {
            protocol_version: self.config.protocol_version.clone(),
            capabilities: ClientCapabilities::default(),
            client_info: self.config.client_info.clone(),
        };
        let request = JsonRpcMessage::request(
            init_id.clone(),
            method::INITIALIZE,
            Some(to_json_object(&param)?),
        );
        let response = self
            .client
            .post_message(uri.clone(), request, None, None)
            .await
            .and_then(|response| response.expect_json())
            .map_err(|e| {
                ClientError::transport(ErrorKind::Unexpected, "send initialize request", e)
            })?;
        let server_info: InitializeResult = parse_result(into_result(response.message, &init_id)?)?;
        let Some(session_id) = response.session_id else {
            return Err(ClientError::UnexpectedResponse(
                "missing session id in initialize response".into(),
            ));
        };
        let session_id: Arc<str> = session_id.into();
        let protocol_version: Arc<str> = server_info.protocol_version.as_str().into();

        let initialized = JsonRpcMessage::notification(method::INITIALIZED, None);
        let acknowledged = self
            .client
            .post_message(
                uri.clone(),
                initialized,
                Some(session_id.clone()),
                Some(protocol_version.clone()),
            )
            .await
            .and_then(|response| response.expect_accepted());
        if let Err(e) = acknowledged {
            if let Err(cleanup) = self
                .client
                .delete_session(uri, session_id.clone(), Some(protocol_version))
                .await
            {
                tracing::debug!(%session_id, error = %cleanup, "failed to delete half-open session");
            }
            return Err(ClientError::transport(
                ErrorKind::Unexpected,
                "send initialized notification",
                e,
            ));
        }

        let session = Arc::new(ClientSession {
            id: session_id,
            protocol_version,
            server_info: server_info.clone(),
            next_id: AtomicI64::new(1),
            ct: CancellationToken::new(),
            disconnecting: AtomicBool::new(false),
            background: Mutex::new(None),
        });
        let background = tokio::spawn(run_standalone_stream(
            self.client.clone(),
            self.config.clone(),
            session.clone(),
            self.session.clone(),
            self.hooks.clone(),
        ));
        *session.background.lock().await = Some(background);
        tracing::info!(
            session_id = %session.id,
            server = %server_info.server_info.name,
            protocol_version = %session.protocol_version,
            "connected"
        );
        *slot = Some(session);
        Ok(server_info)
    }

    /// End the session. Safe to call any number of times.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let Some(session) = self.session.lock().await.take() else {
            tracing::debug!("disconnect without session");
            return Ok(());
        };
        session.disconnecting.store(true, Ordering::Release);
        match self
            .client
            .delete_session(
                self.config.uri.clone(),
                session.id.clone(),
                Some(session.protocol_version.clone()),
            )
            .await
        {
            Ok(()) => tracing::info!(session_id = %session.id, "session deleted"),
            Err(StreamableHttpError::ServerDoesNotSupportDeleteSession) => {
                tracing::debug!(session_id = %session.id, "server doesn't support delete session")
            }
            Err(e)
                if e.status().is_some_and(|status| {
                    matches!(status, http::StatusCode::BAD_REQUEST | http::StatusCode::NOT_FOUND)
                }) =>
            {
                tracing::debug!(session_id = %session.id, error = %e, "session already gone")
            }
            Err(e) => self
                .hooks
                .report(&session.transport_error("delete session", e)),
        }
        self.shutdown(&session).await;
        Ok(())
    }

    async fn shutdown(&self, session: &ClientSession) {
        let background = session.background.lock().await.take();
        if let Some(mut background) = background {
            if tokio::time::timeout(self.config.disconnect_grace, &mut background)
                .await
                .is_err()
            {
                background.abort();
            }
        }
        session.ct.cancel();
    }

    /// Drop the session locally after an unexpected transport fault.
    async fn close_locally(&self, session: &Arc<ClientSession>) {
        release_session(&self.session, session).await;
        if let Some(background) = session.background.lock().await.take() {
            background.abort();
        }
    }

    async fn current(&self) -> Result<Arc<ClientSession>, ClientError> {
        self.session
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)
    }

    async fn request(
        &self,
        method: &str,
        params: Option<JsonObject>,
    ) -> Result<JsonObject, ClientError> {
        let session = self.current().await?;
        let id = RequestId::Number(session.next_id.fetch_add(1, Ordering::Relaxed));
        let message = JsonRpcMessage::request(id.clone(), method, params);
        let outcome = tokio::select! {
            outcome = self.exchange(&session, &id, message) => outcome,
            _ = session.ct.cancelled() => Err(ClientError::Interrupted { request_id: id.clone() }),
        };
        if session.disconnecting.load(Ordering::Acquire) {
            // nothing observed while closing counts as a completed call
            return match outcome {
                Err(error) => Err(error),
                Ok(_) => Err(ClientError::Interrupted { request_id: id }),
            };
        }
        let session_gone = match &outcome {
            Err(ClientError::Transport { kind, .. }) => *kind == ErrorKind::Unexpected,
            // the server no longer knows this session id
            Err(ClientError::McpError(error)) => error.code == ErrorCode::SESSION_ERROR,
            _ => false,
        };
        if session_gone {
            self.close_locally(&session).await;
        }
        outcome
    }

    async fn exchange(
        &self,
        session: &ClientSession,
        id: &RequestId,
        message: JsonRpcMessage,
    ) -> Result<JsonObject, ClientError> {
        let response = self
            .client
            .post_message(
                self.config.uri.clone(),
                message,
                Some(session.id.clone()),
                Some(session.protocol_version.clone()),
            )
            .await
            .map_err(|e| session.transport_error("send request", e))?;
        let reply = match response {
            StreamableHttpPostResponse::Json(json) => json.message,
            StreamableHttpPostResponse::Sse(stream, _) => {
                let mut stream = ResumableSseStream::new(
                    self.client.clone(),
                    self.config.uri.clone(),
                    session.id.clone(),
                    Some(session.protocol_version.clone()),
                    stream,
                    self.config.retry_config,
                );
                self.await_response(session, &mut stream, id).await?
            }
            StreamableHttpPostResponse::Accepted => {
                return Err(ClientError::UnexpectedResponse(
                    "request was answered with 202 Accepted".into(),
                ));
            }
        };
        into_result(reply, id)
    }

    async fn await_response(
        &self,
        session: &ClientSession,
        stream: &mut ResumableSseStream<C>,
        id: &RequestId,
    ) -> Result<ServerJsonRpcMessage, ClientError> {
        loop {
            match stream.next_message().await {
                Ok(Some(message)) if message.responds_to(id) => return Ok(message),
                Ok(Some(JsonRpcMessage::Notification(notification))) => {
                    self.hooks.notify(notification)
                }
                Ok(Some(other)) => tracing::debug!(?other, "ignoring unrelated message"),
                Ok(None) => {
                    if session.disconnecting.load(Ordering::Acquire) {
                        return Err(ClientError::Interrupted {
                            request_id: id.clone(),
                        });
                    }
                    stream
                        .reconnect(StreamableHttpError::UnexpectedEndOfStream)
                        .await
                        .map_err(|e| session.transport_error("resume response stream", e))?;
                }
                Err(e) => return Err(session.transport_error("read response stream", e)),
            }
        }
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        self.request(method::PING, None).await.map(|_| ())
    }

    pub async fn list_tools(&self) -> Result<ListToolsResult, ClientError> {
        let params = to_json_object(&PaginatedRequestParam::default())?;
        parse_result(self.request(method::LIST_TOOLS, Some(params)).await?)
    }

    pub async fn list_prompts(&self) -> Result<ListPromptsResult, ClientError> {
        let params = to_json_object(&PaginatedRequestParam::default())?;
        parse_result(self.request(method::LIST_PROMPTS, Some(params)).await?)
    }

    /// Tool failures come back as `Ok` with `is_error` set; only protocol
    /// and transport failures are `Err`.
    pub async fn call_tool(
        &self,
        name: impl Into<Cow<'static, str>>,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, ClientError> {
        let param = CallToolRequestParam {
            name: name.into(),
            arguments,
        };
        parse_result(
            self.request(method::CALL_TOOL, Some(to_json_object(&param)?))
                .await?,
        )
    }

    pub async fn get_prompt(
        &self,
        name: impl Into<String>,
        arguments: Option<JsonObject>,
    ) -> Result<GetPromptResult, ClientError> {
        let param = GetPromptRequestParam {
            name: name.into(),
            arguments,
        };
        parse_result(
            self.request(method::GET_PROMPT, Some(to_json_object(&param)?))
                .await?,
        )
    }
}

fn into_result(message: ServerJsonRpcMessage, id: &RequestId) -> Result<JsonObject, ClientError> {
    match message {
        JsonRpcMessage::Response(response) if &response.id == id => Ok(response.result),
        JsonRpcMessage::Error(error) => Err(ClientError::McpError(error.error)),
        other => Err(ClientError::UnexpectedResponse(
            format!("expected the response to request {id}, got {other:?}").into(),
        )),
    }
}

fn parse_result<T: DeserializeOwned>(result: JsonObject) -> Result<T, ClientError> {
    serde_json::from_value(Value::Object(result))
        .map_err(|e| ClientError::UnexpectedResponse(format!("malformed result: {e}").into()))
}

/// Background reader for the session's standalone GET stream.
///
/// An unexpected end of the stream closes the session locally before the
/// fault is reported.
async fn run_standalone_stream<C: StreamableHttpClient>(
    client: C,
    config: ClientAdapterConfig,
    session: Arc<ClientSession>,
    slot: SessionSlot,
    hooks: Hooks,
) {
    let Some(error) = read_standalone_stream(client, &config, &session, &hooks).await else {
        tracing::debug!(session_id = %session.id, "standalone stream finished");
        return;
    };
    if error.kind() == ErrorKind::Unexpected {
        release_session(&slot, &session).await;
    }
    hooks.report(&error);
}

async fn read_standalone_stream<C: StreamableHttpClient>(
    client: C,
    config: &ClientAdapterConfig,
    session: &ClientSession,
    hooks: &Hooks,
) -> Option<ClientError> {
    let opened = client
        .get_stream(
            config.uri.clone(),
            session.id.clone(),
            None,
            Some(session.protocol_version.clone()),
        )
        .await;
    let stream = match opened {
        Ok(stream) => stream,
        Err(StreamableHttpError::ServerDoesNotSupportSse) => {
            tracing::debug!(session_id = %session.id, "server has no standalone stream");
            return None;
        }
        Err(e) => return Some(session.transport_error("open standalone stream", e)),
    };
    let mut stream = ResumableSseStream::new(
        client,
        config.uri.clone(),
        session.id.clone(),
        Some(session.protocol_version.clone()),
        stream,
        config.retry_config,
    )
    .standalone();
    loop {
        let next = tokio::select! {
            _ = session.ct.cancelled() => return None,
            next = stream.next_message() => next,
        };
        match next {
            Ok(Some(JsonRpcMessage::Notification(notification))) => hooks.notify(notification),
            Ok(Some(other)) => tracing::debug!(?other, "ignoring message on standalone stream"),
            Ok(None) => {
                return Some(session.transport_error(
                    "read standalone stream",
                    StreamableHttpError::<C::Error>::UnexpectedEndOfStream,
                ));
            }
            Err(e) => return Some(session.transport_error("read standalone stream", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{ClientJsonRpcMessage, ServerCapabilities},
        transport::streamable_http_client::{BoxedSseResponse, StreamableHttpPostJsonResponse},
    };

    /// Completes the handshake, offers no standalone stream, then answers
    /// every request as if the session had expired. Never finds a session
    /// to delete.
    #[derive(Clone, Default)]
    struct ForgetfulServer {
        reject_initialized: bool,
        deletes: Arc<AtomicI64>,
    }

    impl StreamableHttpClient for ForgetfulServer {
        type Error = std::io::Error;

        async fn post_message(
            &self,
            _uri: Arc<str>,
            message: ClientJsonRpcMessage,
            _session_id: Option<Arc<str>>,
            _protocol_version: Option<Arc<str>>,
        ) -> Result<StreamableHttpPostResponse, StreamableHttpError<Self::Error>> {
            let JsonRpcMessage::Request(request) = message else {
                if self.reject_initialized {
                    return Err(StreamableHttpError::UnexpectedStatus {
                        status: http::StatusCode::INTERNAL_SERVER_ERROR,
                        body: "initialization failed".to_owned(),
                    });
                }
                return Ok(StreamableHttpPostResponse::Accepted);
            };
            let message = if request.method == method::INITIALIZE {
                let result = InitializeResult {
                    protocol_version: ProtocolVersion::LATEST,
                    capabilities: ServerCapabilities::default(),
                    server_info: Implementation::new("forgetful", "0.1.0"),
                    instructions: None,
                };
                JsonRpcMessage::response(request.id, to_json_object(&result).unwrap())
            } else {
                JsonRpcMessage::error(
                    Some(request.id),
                    ErrorData::session_error("Bad Request: No valid session ID provided"),
                )
            };
            Ok(StreamableHttpPostResponse::Json(
                StreamableHttpPostJsonResponse {
                    message,
                    session_id: Some("expired-session".to_owned()),
                },
            ))
        }

        async fn get_stream(
            &self,
            _uri: Arc<str>,
            _session_id: Arc<str>,
            _last_event_id: Option<String>,
            _protocol_version: Option<Arc<str>>,
        ) -> Result<BoxedSseResponse, StreamableHttpError<Self::Error>> {
            Err(StreamableHttpError::ServerDoesNotSupportSse)
        }

        async fn delete_session(
            &self,
            _uri: Arc<str>,
            _session_id: Arc<str>,
            _protocol_version: Option<Arc<str>>,
        ) -> Result<(), StreamableHttpError<Self::Error>> {
            self.deletes.fetch_add(1, Ordering::Relaxed);
            Err(StreamableHttpError::UnexpectedStatus {
                status: http::StatusCode::NOT_FOUND,
                body: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_session_error_reply_closes_the_session() {
        let server = ForgetfulServer::default();
        let adapter = McpClientAdapter::with_client(server.clone(), ClientAdapterConfig::default());
        adapter.connect().await.unwrap();
        assert!(adapter.is_connected().await);

        match adapter.list_tools().await {
            Err(ClientError::McpError(error)) => assert_eq!(error.code, ErrorCode::SESSION_ERROR),
            other => panic!("expected a session error, got {other:?}"),
        }
        assert!(!adapter.is_connected().await);
        assert!(adapter.session_id().await.is_none());
        assert!(matches!(adapter.ping().await, Err(ClientError::NotConnected)));

        // nothing left to delete
        adapter.disconnect().await.unwrap();
        assert_eq!(server.deletes.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_failed_handshake_deletes_the_half_open_session() {
        let server = ForgetfulServer {
            reject_initialized: true,
            ..Default::default()
        };
        let adapter = McpClientAdapter::with_client(server.clone(), ClientAdapterConfig::default());
        let error = adapter.connect().await.unwrap_err();
        assert!(matches!(error, ClientError::Transport { .. }));
        assert_eq!(error.kind(), ErrorKind::Unexpected);
        // cleanup was attempted even though it failed
        assert_eq!(server.deletes.load(Ordering::Relaxed), 1);
        assert!(!adapter.is_connected().await);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(ClientError::NotConnected.kind(), ErrorKind::Unexpected);
        assert_eq!(
            ClientError::Interrupted {
                request_id: RequestId::Number(1)
            }
            .kind(),
            ErrorKind::ExpectedOnClose
        );
        let error = ClientError::transport(
            ErrorKind::ExpectedOnClose,
            "read standalone stream",
            StreamableHttpError::<std::io::Error>::UnexpectedEndOfStream,
        );
        assert_eq!(error.kind(), ErrorKind::ExpectedOnClose);
        assert_eq!(
            error.to_string(),
            "transport error when read standalone stream: unexpected end of stream"
        );
    }

    #[test]
    fn test_connection_state_messages() {
        assert_eq!(
            ClientError::AlreadyConnected.to_string(),
            "Already connected. Disconnect first."
        );
        assert_eq!(ClientError::NotConnected.to_string(), "Not connected to server.");
    }

    #[test]
    fn test_into_result() {
        let id = RequestId::Number(7);
        let ok = JsonRpcMessage::response(id.clone(), JsonObject::new());
        assert!(into_result(ok, &id).unwrap().is_empty());

        let failed = JsonRpcMessage::error(Some(id.clone()), ErrorData::method_not_found("x/y"));
        assert!(matches!(into_result(failed, &id), Err(ClientError::McpError(_))));

        let other = JsonRpcMessage::response(RequestId::Number(8), JsonObject::new());
        assert!(matches!(
            into_result(other, &id),
            Err(ClientError::UnexpectedResponse(_))
        ));
    }
}
