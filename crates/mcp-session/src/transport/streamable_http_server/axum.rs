use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header, request::Parts},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::post,
};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use tower_http::cors::{AllowOrigin, CorsLayer};

use super::{
    StreamableHttpServerConfig,
    session::{
        RequestOutcome, ServerSseMessage, SessionError, SessionRegistry, SessionTransport,
        SseStream,
    },
};
use crate::{
    handler::server::McpServer,
    model::{
        ClientJsonRpcMessage, ErrorData, InitializeRequestParam, JsonRpcMessage, JsonRpcRequest,
        ProtocolVersion, RequestId, method, parse_params,
    },
    transport::{
        common::http_header::{
            EVENT_STREAM_MIME_TYPE, HEADER_LAST_EVENT_ID, HEADER_MCP_PROTOCOL_VERSION,
            HEADER_SESSION_ID, HEADER_X_ACCEL_BUFFERING, JSON_MIME_TYPE,
        },
        event_store::EventId,
    },
};

const INVALID_SESSION: &str = "Invalid or missing session ID";

/// axum front end of the Streamable HTTP transport.
///
/// Cheap to clone; every clone shares the same [`SessionRegistry`].
#[derive(Clone, Debug)]
pub struct StreamableHttpService {
    config: Arc<StreamableHttpServerConfig>,
    registry: SessionRegistry,
}

impl StreamableHttpService {
    pub fn new(server: McpServer, config: StreamableHttpServerConfig) -> Self {
        let config = Arc::new(config);
        let registry = SessionRegistry::new(Arc::new(server), config.clone());
        Self { config, registry }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &StreamableHttpServerConfig {
        &self.config
    }

    /// A router serving the MCP endpoint at `config.path`, CORS included.
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                &self.config.path,
                post(handle_post)
                    .get(handle_get)
                    .delete(handle_delete)
                    .options(handle_options),
            )
            .layer(cors_layer(&self.config.allowed_origin_prefixes))
            .with_state(self.clone())
    }
}

fn cors_layer(allowed_origin_prefixes: &[String]) -> CorsLayer {
    let prefixes = allowed_origin_prefixes.to_vec();
    let session_id = HeaderName::from_static(HEADER_SESSION_ID);
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                origin
                    .to_str()
                    .is_ok_and(|origin| prefixes.iter().any(|prefix| origin.starts_with(prefix)))
            },
        ))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(HEADER_MCP_PROTOCOL_VERSION),
            HeaderName::from_static(HEADER_LAST_EVENT_ID),
            session_id.clone(),
        ])
        .expose_headers([session_id, header::CONTENT_TYPE])
        .allow_credentials(true)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn accepts(headers: &HeaderMap, mime: &str) -> bool {
    header_str(headers, header::ACCEPT.as_str()).is_some_and(|accept| accept.contains(mime))
}

fn json_response(status: StatusCode, message: &JsonRpcMessage) -> Response {
    (status, axum::Json(message)).into_response()
}

fn error_response(status: StatusCode, id: Option<RequestId>, error: ErrorData) -> Response {
    json_response(status, &JsonRpcMessage::error(id, error))
}

fn no_valid_session() -> Response {
    error_response(
        StatusCode::BAD_REQUEST,
        None,
        ErrorData::session_error("Bad Request: No valid session ID provided"),
    )
}

/// A present but unsupported `mcp-protocol-version` header.
fn check_protocol_version(headers: &HeaderMap) -> Result<(), Response> {
    match header_str(headers, HEADER_MCP_PROTOCOL_VERSION) {
        Some(version) if !ProtocolVersion::is_supported(version) => {
            tracing::debug!(%version, "rejecting unsupported protocol version");
            Err(error_response(
                StatusCode::BAD_REQUEST,
                None,
                ErrorData::session_error("Bad Request: Unsupported protocol version"),
            ))
        }
        _ => Ok(()),
    }
}

fn session_error_response(error: SessionError, id: Option<RequestId>) -> Response {
    match error {
        SessionError::NotInitialized(_) => error_response(
            StatusCode::BAD_REQUEST,
            id,
            ErrorData::session_error("Bad Request: Server not initialized"),
        ),
        SessionError::AlreadyInitialized(_) => error_response(
            StatusCode::BAD_REQUEST,
            id,
            ErrorData::invalid_request("Invalid Request: Server already initialized", None),
        ),
        SessionError::Closed(_) => no_valid_session(),
        SessionError::StreamConflict(_) => (
            StatusCode::CONFLICT,
            "Conflict: Only one standalone SSE stream is allowed per session",
        )
            .into_response(),
        SessionError::EventStore { .. } => {
            tracing::error!(%error, "session failed while handling request");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                id,
                ErrorData::internal_error(error.to_string(), None),
            )
        }
    }
}

fn sse_response(stream: SseStream, keep_alive: Option<Duration>) -> Response {
    let events = stream.map(|ServerSseMessage { event_id, message }| {
        let event = Event::default().event("message");
        let event = match event_id {
            Some(event_id) => event.id(event_id.to_string()),
            None => event,
        };
        event.json_data(message.as_ref())
    });
    let headers = [
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        (
            HeaderName::from_static(HEADER_X_ACCEL_BUFFERING),
            HeaderValue::from_static("no"),
        ),
    ];
    match keep_alive {
        Some(interval) => (
            headers,
            Sse::new(events).keep_alive(KeepAlive::new().interval(interval)),
        )
            .into_response(),
        None => (headers, Sse::new(events)).into_response(),
    }
}

async fn handle_post(
    State(service): State<StreamableHttpService>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !(accepts(&headers, JSON_MIME_TYPE) && accepts(&headers, EVENT_STREAM_MIME_TYPE)) {
        return (
            StatusCode::NOT_ACCEPTABLE,
            "Not Acceptable: Client must accept both application/json and text/event-stream",
        )
            .into_response();
    }
    if !header_str(&headers, header::CONTENT_TYPE.as_str())
        .is_some_and(|content_type| content_type.starts_with(JSON_MIME_TYPE))
    {
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Unsupported Media Type: Content-Type must be application/json",
        )
            .into_response();
    }
    if let Err(response) = check_protocol_version(&headers) {
        return response;
    }

    let message = match parse_message(&body) {
        Ok(message) => message,
        Err(error) => {
            tracing::debug!(%error, "rejecting malformed message");
            return error_response(StatusCode::BAD_REQUEST, None, error);
        }
    };

    let session = match header_str(&headers, HEADER_SESSION_ID) {
        Some(session_id) => service.registry.get(session_id).await,
        None => None,
    };
    match (session, message) {
        (Some(session), JsonRpcMessage::Request(request)) => {
            tracing::debug!(session_id = %session.id(), method = %request.method, "POST request");
            if request.method == method::INITIALIZE {
                let param: InitializeRequestParam = match parse_params(request.params) {
                    Ok(param) => param,
                    Err(error) => {
                        return error_response(StatusCode::BAD_REQUEST, Some(request.id), error);
                    }
                };
                match session.initialize(request.id.clone(), &param).await {
                    Ok(response) => json_response(StatusCode::OK, &response),
                    Err(error) => session_error_response(error, Some(request.id)),
                }
            } else {
                run_request(&service, &session, request).await
            }
        }
        (Some(session), JsonRpcMessage::Notification(notification)) => {
            match session.handle_notification(notification).await {
                Ok(()) => StatusCode::ACCEPTED.into_response(),
                Err(error) => session_error_response(error, None),
            }
        }
        (Some(session), JsonRpcMessage::Response(_) | JsonRpcMessage::Error(_)) => {
            tracing::debug!(session_id = %session.id(), "client response accepted");
            StatusCode::ACCEPTED.into_response()
        }
        (None, JsonRpcMessage::Request(request)) if request.method == method::INITIALIZE => {
            create_session(&service, request).await
        }
        (None, _) => no_valid_session(),
    }
}

fn parse_message(body: &[u8]) -> Result<ClientJsonRpcMessage, ErrorData> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ErrorData::parse_error(format!("Parse error: {e}"), None))?;
    if value.is_array() {
        return Err(ErrorData::invalid_request(
            "Invalid Request: batch messages are not supported",
            None,
        ));
    }
    serde_json::from_value(value).map_err(|e| {
        ErrorData::invalid_request(format!("Invalid Request: not a JSON-RPC 2.0 message: {e}"), None)
    })
}

async fn create_session(service: &StreamableHttpService, request: JsonRpcRequest) -> Response {
    let param: InitializeRequestParam = match parse_params(request.params.clone()) {
        Ok(param) => param,
        Err(error) => return error_response(StatusCode::BAD_REQUEST, Some(request.id), error),
    };
    let session = service.registry.create().await;
    let id = request.id.clone();
    match session.initialize(request.id, &param).await {
        Ok(response) => (
            StatusCode::OK,
            [(HeaderName::from_static(HEADER_SESSION_ID), session.id().as_ref())],
            axum::Json(response),
        )
            .into_response(),
        Err(error) => {
            service.registry.remove(session.id()).await;
            session_error_response(error, Some(id))
        }
    }
}

async fn run_request(
    service: &StreamableHttpService,
    session: &Arc<SessionTransport>,
    request: JsonRpcRequest,
) -> Response {
    let id = request.id.clone();
    match session.handle_request(request).await {
        Ok(RequestOutcome::Json(message)) => json_response(StatusCode::OK, &message),
        Ok(RequestOutcome::Stream(stream)) => sse_response(stream, service.config.sse_keep_alive),
        Ok(RequestOutcome::Discarded) => StatusCode::ACCEPTED.into_response(),
        Err(error) => session_error_response(error, Some(id)),
    }
}

async fn handle_get(State(service): State<StreamableHttpService>, headers: HeaderMap) -> Response {
    if !accepts(&headers, EVENT_STREAM_MIME_TYPE) {
        return (
            StatusCode::NOT_ACCEPTABLE,
            "Not Acceptable: Client must accept text/event-stream",
        )
            .into_response();
    }
    if let Err(response) = check_protocol_version(&headers) {
        return response;
    }
    let session = match header_str(&headers, HEADER_SESSION_ID) {
        Some(session_id) => service.registry.get(session_id).await,
        None => None,
    };
    let Some(session) = session else {
        return (StatusCode::BAD_REQUEST, INVALID_SESSION).into_response();
    };

    let stream = match header_str(&headers, HEADER_LAST_EVENT_ID) {
        Some(last_event_id) => match last_event_id.parse::<EventId>() {
            Ok(last_event_id) => {
                tracing::debug!(session_id = %session.id(), %last_event_id, "resuming stream");
                session.resume(last_event_id).await
            }
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("Bad Request: invalid last-event-id {last_event_id:?}"),
                )
                    .into_response();
            }
        },
        None => session.open_standalone_stream().await,
    };
    match stream {
        Ok(stream) => sse_response(stream, service.config.sse_keep_alive),
        Err(error) => session_error_response(error, None),
    }
}

async fn handle_delete(
    State(service): State<StreamableHttpService>,
    headers: HeaderMap,
) -> Response {
    let Some(session_id) = header_str(&headers, HEADER_SESSION_ID) else {
        return (StatusCode::BAD_REQUEST, INVALID_SESSION).into_response();
    };
    match service.registry.remove(session_id).await {
        Some(_) => {
            tracing::debug!(%session_id, "session terminated by client");
            StatusCode::OK.into_response()
        }
        None => (StatusCode::BAD_REQUEST, INVALID_SESSION).into_response(),
    }
}

async fn handle_options() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ErrorCode;

    #[test]
    fn test_parse_message_errors() {
        let error = parse_message(b"{not json").unwrap_err();
        assert_eq!(error.code, ErrorCode::PARSE_ERROR);

        let error = parse_message(br#"[{"jsonrpc":"2.0","id":1,"method":"ping"}]"#).unwrap_err();
        assert_eq!(error.code, ErrorCode::INVALID_REQUEST);

        let error = parse_message(br#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#).unwrap_err();
        assert_eq!(error.code, ErrorCode::INVALID_REQUEST);

        let message = parse_message(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert!(matches!(message, JsonRpcMessage::Request(_)));
    }

    #[test]
    fn test_accept_header_matching() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        assert!(accepts(&headers, JSON_MIME_TYPE));
        assert!(accepts(&headers, EVENT_STREAM_MIME_TYPE));
        assert!(!accepts(&HeaderMap::new(), JSON_MIME_TYPE));
    }

    #[tokio::test]
    async fn test_sse_response_with_and_without_keep_alive() {
        for keep_alive in [None, Some(Duration::from_secs(15))] {
            let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
            let response = sse_response(
                tokio_stream::wrappers::UnboundedReceiverStream::new(rx),
                keep_alive,
            );
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[header::CONTENT_TYPE], EVENT_STREAM_MIME_TYPE);
            assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
            assert_eq!(response.headers()[HEADER_X_ACCEL_BUFFERING], "no");
        }
    }

    #[test]
    fn test_protocol_version_header() {
        let mut headers = HeaderMap::new();
        assert!(check_protocol_version(&headers).is_ok());
        headers.insert(
            HEADER_MCP_PROTOCOL_VERSION,
            HeaderValue::from_static("2025-03-26"),
        );
        assert!(check_protocol_version(&headers).is_ok());
        headers.insert(
            HEADER_MCP_PROTOCOL_VERSION,
            HeaderValue::from_static("1999-01-01"),
        );
        let response = check_protocol_version(&headers).unwrap_err();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
