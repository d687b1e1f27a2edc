use std::{borrow::Cow, sync::Arc, time::Duration};

use futures::StreamExt;
pub use sse_stream::Error as SseError;
use thiserror::Error;

pub use super::common::sse::{BoxedSseResponse, SseRetryConfig};
use crate::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};

#[derive(Error, Debug)]
pub enum StreamableHttpError<E: std::error::Error + Send + Sync + 'static> {
    #[error("SSE error: {0}")]
    Sse(#[from] SseError),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Client error: {0}")]
    Client(E),
    #[error("unexpected end of stream")]
    UnexpectedEndOfStream,
    #[error("unexpected server response: {0}")]
    UnexpectedServerResponse(Cow<'static, str>),
    #[error("Unexpected content type: {0:?}")]
    UnexpectedContentType(Option<String>),
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: http::StatusCode, body: String },
    #[error("Server does not support SSE")]
    ServerDoesNotSupportSse,
    #[error("Server does not support delete session")]
    ServerDoesNotSupportDeleteSession,
    #[error("Deserialize error: {0}")]
    Deserialize(#[from] serde_json::Error),
}

impl<E: std::error::Error + Send + Sync + 'static> StreamableHttpError<E> {
    /// The status of a rejected HTTP exchange, if that is what this is.
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            StreamableHttpError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub enum StreamableHttpPostResponse {
    Accepted,
    Json(StreamableHttpPostJsonResponse),
    Sse(BoxedSseResponse, Option<String>),
}

impl std::fmt::Debug for StreamableHttpPostResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "Accepted"),
            Self::Json(json) => f.debug_tuple("Json").field(json).finish(),
            Self::Sse(_, session_id) => f.debug_tuple("Sse").field(session_id).finish(),
        }
    }
}

#[derive(Debug)]
pub struct StreamableHttpPostJsonResponse {
    pub message: ServerJsonRpcMessage,
    pub session_id: Option<String>,
}

impl StreamableHttpPostResponse {
    pub fn expect_json<E>(self) -> Result<StreamableHttpPostJsonResponse, StreamableHttpError<E>>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match self {
            Self::Json(message) => Ok(message),
            _ => Err(StreamableHttpError::UnexpectedServerResponse(
                "expected json".into(),
            )),
        }
    }

    pub fn expect_accepted<E>(self) -> Result<(), StreamableHttpError<E>>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match self {
            Self::Accepted => Ok(()),
            _ => Err(StreamableHttpError::UnexpectedServerResponse(
                "expected accepted".into(),
            )),
        }
    }
}

/// HTTP side of a Streamable HTTP client. Implemented for `reqwest::Client`
/// with the `reqwest` feature.
///
/// Non-2xx answers whose body is a JSON-RPC error come back as
/// [`StreamableHttpPostResponse::Json`]; other rejections become
/// [`StreamableHttpError::UnexpectedStatus`].
pub trait StreamableHttpClient: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn post_message(
        &self,
        uri: Arc<str>,
        message: ClientJsonRpcMessage,
        session_id: Option<Arc<str>>,
        protocol_version: Option<Arc<str>>,
    ) -> impl Future<Output = Result<StreamableHttpPostResponse, StreamableHttpError<Self::Error>>>
    + Send
    + '_;

    fn get_stream(
        &self,
        uri: Arc<str>,
        session_id: Arc<str>,
        last_event_id: Option<String>,
        protocol_version: Option<Arc<str>>,
    ) -> impl Future<Output = Result<BoxedSseResponse, StreamableHttpError<Self::Error>>> + Send + '_;

    fn delete_session(
        &self,
        uri: Arc<str>,
        session_id: Arc<str>,
        protocol_version: Option<Arc<str>>,
    ) -> impl Future<Output = Result<(), StreamableHttpError<Self::Error>>> + Send + '_;
}

/// Reads JSON-RPC messages off an SSE stream, reconnecting with
/// `last-event-id` when the connection breaks.
pub struct ResumableSseStream<C: StreamableHttpClient> {
    client: C,
    uri: Arc<str>,
    session_id: Arc<str>,
    protocol_version: Option<Arc<str>>,
    stream: BoxedSseResponse,
    last_event_id: Option<String>,
    /// The standalone stream can be reopened even before it delivered an event.
    standalone: bool,
    retry_config: SseRetryConfig,
    retry_interval: Duration,
    attempts: usize,
}

impl<C: StreamableHttpClient> ResumableSseStream<C> {
    pub fn new(
        client: C,
        uri: Arc<str>,
        session_id: Arc<str>,
        protocol_version: Option<Arc<str>>,
        stream: BoxedSseResponse,
        retry_config: SseRetryConfig,
    ) -> Self {
        Self {
            client,
            uri,
            session_id,
            protocol_version,
            stream,
            last_event_id: None,
            standalone: false,
            retry_interval: retry_config.min_duration,
            retry_config,
            attempts: 0,
        }
    }

    pub fn standalone(mut self) -> Self {
        self.standalone = true;
        self
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Next message, `Ok(None)` when the server ended the stream.
    ///
    /// Transport errors trigger [`ResumableSseStream::reconnect`]; the error
    /// is returned once the retry budget is spent.
    pub async fn next_message(
        &mut self,
    ) -> Result<Option<ServerJsonRpcMessage>, StreamableHttpError<C::Error>> {
        loop {
            let sse = match self.stream.next().await {
                Some(Ok(sse)) => sse,
                Some(Err(error)) => {
                    tracing::warn!(session_id = %self.session_id, %error, "sse stream error");
                    self.reconnect(error.into()).await?;
                    continue;
                }
                None => return Ok(None),
            };
            if let Some(retry) = sse.retry {
                self.retry_interval = self
                    .retry_config
                    .min_duration
                    .max(Duration::from_millis(retry));
            }
            if let Some(id) = sse.id {
                self.last_event_id = Some(id);
            }
            let Some(data) = sse.data else {
                continue;
            };
            match serde_json::from_str::<ServerJsonRpcMessage>(&data) {
                Ok(message) => {
                    self.attempts = 0;
                    return Ok(Some(message));
                }
                Err(error) => {
                    tracing::warn!(session_id = %self.session_id, %error, "failed to deserialize server message")
                }
            }
        }
    }

    /// Reopen the stream after `cause` broke it, resuming after the last
    /// event seen.
    pub async fn reconnect(
        &mut self,
        cause: StreamableHttpError<C::Error>,
    ) -> Result<(), StreamableHttpError<C::Error>> {
        if self.last_event_id.is_none() && !self.standalone {
            return Err(cause);
        }
        let mut cause = cause;
        loop {
            if !self.retry_config.allows(self.attempts) {
                tracing::error!(session_id = %self.session_id, error = %cause, "sse stream lost, max retry times reached");
                return Err(cause);
            }
            self.attempts += 1;
            tracing::debug!(
                session_id = %self.session_id,
                last_event_id = ?self.last_event_id,
                retry_in = ?self.retry_interval,
                "reconnecting sse stream"
            );
            tokio::time::sleep(self.retry_interval).await;
            match self
                .client
                .get_stream(
                    self.uri.clone(),
                    self.session_id.clone(),
                    self.last_event_id.clone(),
                    self.protocol_version.clone(),
                )
                .await
            {
                Ok(stream) => {
                    self.stream = stream;
                    return Ok(());
                }
                Err(error) => cause = error,
            }
        }
    }
}
