use std::sync::Arc;

use futures::StreamExt;
use reqwest::{
    StatusCode,
    header::{ACCEPT, CONTENT_TYPE},
};
use sse_stream::SseStream;

use super::{
    http_header::{
        EVENT_STREAM_MIME_TYPE, HEADER_LAST_EVENT_ID, HEADER_MCP_PROTOCOL_VERSION,
        HEADER_SESSION_ID, JSON_MIME_TYPE,
    },
    sse::BoxedSseResponse,
};
use crate::{
    model::{ClientJsonRpcMessage, JsonRpcMessage, ServerJsonRpcMessage},
    transport::streamable_http_client::{
        StreamableHttpClient, StreamableHttpError, StreamableHttpPostJsonResponse,
        StreamableHttpPostResponse,
    },
};

impl From<reqwest::Error> for StreamableHttpError<reqwest::Error> {
    fn from(e: reqwest::Error) -> Self {
        StreamableHttpError::Client(e)
    }
}

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

async fn rejected(response: reqwest::Response) -> StreamableHttpError<reqwest::Error> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    StreamableHttpError::UnexpectedStatus { status, body }
}

fn with_session(
    mut request: reqwest::RequestBuilder,
    session_id: Option<&str>,
    protocol_version: Option<&str>,
) -> reqwest::RequestBuilder {
    if let Some(session_id) = session_id {
        request = request.header(HEADER_SESSION_ID, session_id);
    }
    if let Some(protocol_version) = protocol_version {
        request = request.header(HEADER_MCP_PROTOCOL_VERSION, protocol_version);
    }
    request
}

impl StreamableHttpClient for reqwest::Client {
    type Error = reqwest::Error;

    async fn post_message(
        &self,
        uri: Arc<str>,
        message: ClientJsonRpcMessage,
        session_id: Option<Arc<str>>,
        protocol_version: Option<Arc<str>>,
    ) -> Result<StreamableHttpPostResponse, StreamableHttpError<Self::Error>> {
        let request = self
            .post(&*uri)
            .header(ACCEPT, [EVENT_STREAM_MIME_TYPE, JSON_MIME_TYPE].join(", "))
            .json(&message);
        let response = with_session(request, session_id.as_deref(), protocol_version.as_deref())
            .send()
            .await?;
        let status = response.status();
        if matches!(status, StatusCode::ACCEPTED | StatusCode::NO_CONTENT) {
            return Ok(StreamableHttpPostResponse::Accepted);
        }
        let content_type = header_string(&response, CONTENT_TYPE.as_str());
        let session_id = header_string(&response, HEADER_SESSION_ID);
        match content_type.as_deref() {
            Some(ct) if status.is_success() && ct.starts_with(EVENT_STREAM_MIME_TYPE) => {
                let stream = SseStream::from_bytes_stream(response.bytes_stream()).boxed();
                Ok(StreamableHttpPostResponse::Sse(stream, session_id))
            }
            Some(ct) if ct.starts_with(JSON_MIME_TYPE) => {
                let body = response.bytes().await?;
                match serde_json::from_slice::<ServerJsonRpcMessage>(&body) {
                    Ok(message)
                        if status.is_success() || matches!(message, JsonRpcMessage::Error(_)) =>
                    {
                        Ok(StreamableHttpPostResponse::Json(
                            StreamableHttpPostJsonResponse {
                                message,
                                session_id,
                            },
                        ))
                    }
                    Err(e) if status.is_success() => Err(e.into()),
                    _ => Err(StreamableHttpError::UnexpectedStatus {
                        status,
                        body: String::from_utf8_lossy(&body).into_owned(),
                    }),
                }
            }
            _ if !status.is_success() => Err(rejected(response).await),
            _ => Err(StreamableHttpError::UnexpectedContentType(content_type)),
        }
    }

    async fn get_stream(
        &self,
        uri: Arc<str>,
        session_id: Arc<str>,
        last_event_id: Option<String>,
        protocol_version: Option<Arc<str>>,
    ) -> Result<BoxedSseResponse, StreamableHttpError<Self::Error>> {
        let mut request = self.get(&*uri).header(ACCEPT, EVENT_STREAM_MIME_TYPE);
        if let Some(last_event_id) = last_event_id {
            request = request.header(HEADER_LAST_EVENT_ID, last_event_id);
        }
        let response = with_session(request, Some(&*session_id), protocol_version.as_deref())
            .send()
            .await?;
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            return Err(StreamableHttpError::ServerDoesNotSupportSse);
        }
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        match header_string(&response, CONTENT_TYPE.as_str()) {
            Some(ct) if ct.starts_with(EVENT_STREAM_MIME_TYPE) => {
                Ok(SseStream::from_bytes_stream(response.bytes_stream()).boxed())
            }
            other => Err(StreamableHttpError::UnexpectedContentType(other)),
        }
    }

    async fn delete_session(
        &self,
        uri: Arc<str>,
        session_id: Arc<str>,
        protocol_version: Option<Arc<str>>,
    ) -> Result<(), StreamableHttpError<Self::Error>> {
        let request = self.delete(&*uri);
        let response = with_session(request, Some(&*session_id), protocol_version.as_deref())
            .send()
            .await?;
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            return Err(StreamableHttpError::ServerDoesNotSupportDeleteSession);
        }
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        Ok(())
    }
}
