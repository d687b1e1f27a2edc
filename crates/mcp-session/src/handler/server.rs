//! RPC server core: tool and prompt tables plus method dispatch.
//!
//! [`McpServer`] is transport agnostic. A transport hands every request of an
//! initialized session to [`McpServer::handle_request`] together with a
//! [`RequestContext`], and writes back whatever message it returns.
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::model::{
    CallToolRequestParam, CallToolResult, ErrorData, GetPromptRequestParam, GetPromptResult,
    Implementation, InitializeRequestParam, InitializeResult, JsonObject, JsonRpcMessage,
    JsonRpcRequest, ListPromptsResult, ListToolsResult, LoggingLevel,
    LoggingMessageNotificationParam, PaginatedRequestParam, ProgressNotificationParam,
    ProgressToken, PromptsCapability, ProtocolVersion, RequestId, ServerCapabilities,
    ServerJsonRpcMessage, SetLevelRequestParam, ToolsCapability, method, parse_params,
    to_json_object,
};

pub mod common;
pub mod router;
pub mod wrapper;

use router::{
    RegistrationError,
    prompt::{PromptRoute, PromptRouter},
    tool::{ToolCallContext, ToolRoute, ToolRouter},
};

#[derive(Debug, thiserror::Error)]
#[error("the session this peer belongs to is closed")]
pub struct PeerClosed;

/// Server-side handle for pushing messages to one client session.
///
/// Messages sent through a `Peer` are not tied to a request; the transport
/// delivers them on the session's standalone stream.
#[derive(Debug, Clone)]
pub struct Peer {
    tx: mpsc::UnboundedSender<ServerJsonRpcMessage>,
    logging_level: Arc<watch::Sender<LoggingLevel>>,
}

impl Peer {
    /// A peer plus the receiving end the transport drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerJsonRpcMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (logging_level, _) = watch::channel(LoggingLevel::default());
        (
            Peer {
                tx,
                logging_level: Arc::new(logging_level),
            },
            rx,
        )
    }

    pub fn send(&self, message: ServerJsonRpcMessage) -> Result<(), PeerClosed> {
        self.tx.send(message).map_err(|_| PeerClosed)
    }

    pub fn notify(&self, method: &str, params: Option<JsonObject>) -> Result<(), PeerClosed> {
        self.send(JsonRpcMessage::notification(method, params))
    }

    /// Send `notifications/message` unless it is below the session's level.
    pub fn notify_logging_message(
        &self,
        param: LoggingMessageNotificationParam,
    ) -> Result<(), PeerClosed> {
        match logging_notification(self.logging_level(), param) {
            Some(message) => self.send(message),
            None => Ok(()),
        }
    }

    pub fn logging_level(&self) -> LoggingLevel {
        *self.logging_level.borrow()
    }

    pub fn set_logging_level(&self, level: LoggingLevel) {
        self.logging_level.send_replace(level);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn logging_notification(
    minimum: LoggingLevel,
    param: LoggingMessageNotificationParam,
) -> Option<ServerJsonRpcMessage> {
    if param.level < minimum {
        return None;
    }
    let params = to_json_object(&param).ok()?;
    Some(JsonRpcMessage::notification(method::LOGGING_MESSAGE, Some(params)))
}

/// Everything a handler knows about the request it is serving.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: RequestId,
    /// Fires when the client cancels the request or the session closes.
    pub ct: CancellationToken,
    pub peer: Peer,
    progress_token: Option<ProgressToken>,
    related: Option<mpsc::Sender<ServerJsonRpcMessage>>,
}

impl RequestContext {
    pub fn new(id: RequestId, peer: Peer) -> Self {
        RequestContext {
            id,
            ct: CancellationToken::new(),
            peer,
            progress_token: None,
            related: None,
        }
    }

    pub fn for_request(request: &JsonRpcRequest, peer: Peer) -> Self {
        Self::new(request.id.clone(), peer).with_progress_token(request.progress_token())
    }

    pub fn with_cancellation(mut self, ct: CancellationToken) -> Self {
        self.ct = ct;
        self
    }

    pub fn with_progress_token(mut self, progress_token: Option<ProgressToken>) -> Self {
        self.progress_token = progress_token;
        self
    }

    /// Route request-related notifications into `tx` (the request's own stream).
    pub fn with_related_channel(mut self, tx: mpsc::Sender<ServerJsonRpcMessage>) -> Self {
        self.related = Some(tx);
        self
    }

    pub fn progress_token(&self) -> Option<&ProgressToken> {
        self.progress_token.as_ref()
    }

    /// Report progress; a no-op when the caller did not ask for it.
    pub async fn notify_progress(
        &self,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> Result<(), PeerClosed> {
        let Some(progress_token) = self.progress_token.clone() else {
            return Ok(());
        };
        let param = ProgressNotificationParam {
            progress_token,
            progress,
            total,
            message,
        };
        let params = to_json_object(&param).map_err(|_| PeerClosed)?;
        self.send_related(JsonRpcMessage::notification(method::PROGRESS, Some(params)))
            .await
    }

    /// Log line attached to this request.
    pub async fn log(
        &self,
        level: LoggingLevel,
        logger: Option<String>,
        data: Value,
    ) -> Result<(), PeerClosed> {
        let param = LoggingMessageNotificationParam {
            level,
            logger,
            data,
        };
        match logging_notification(self.peer.logging_level(), param) {
            Some(message) => self.send_related(message).await,
            None => Ok(()),
        }
    }

    async fn send_related(&self, message: ServerJsonRpcMessage) -> Result<(), PeerClosed> {
        match &self.related {
            Some(tx) => tx.send(message).await.map_err(|_| PeerClosed),
            None => self.peer.send(message),
        }
    }
}

#[derive(Debug)]
pub struct McpServer {
    server_info: Implementation,
    instructions: Option<String>,
    tool_router: ToolRouter,
    prompt_router: PromptRouter,
}

impl McpServer {
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> McpServerBuilder {
        McpServerBuilder {
            server_info: Implementation::new(name, version),
            instructions: None,
            tools: Vec::new(),
            prompts: Vec::new(),
        }
    }

    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    pub fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            logging: Some(JsonObject::new()),
            tools: (!self.tool_router.is_empty()).then(|| ToolsCapability {
                list_changed: Some(false),
            }),
            prompts: (!self.prompt_router.is_empty()).then(|| PromptsCapability {
                list_changed: Some(false),
            }),
        }
    }

    /// Build the answer to an `initialize` request.
    pub fn initialize(&self, param: &InitializeRequestParam) -> InitializeResult {
        InitializeResult {
            protocol_version: ProtocolVersion::negotiate(&param.protocol_version),
            capabilities: self.capabilities(),
            server_info: self.server_info.clone(),
            instructions: self.instructions.clone(),
        }
    }

    /// Registered tools in registration order.
    pub fn list_tools(&self) -> ListToolsResult {
        ListToolsResult {
            tools: self.tool_router.list_all(),
            next_cursor: None,
        }
    }

    pub fn list_prompts(&self) -> ListPromptsResult {
        ListPromptsResult {
            prompts: self.prompt_router.list_all(),
            next_cursor: None,
        }
    }

    pub async fn call_tool(
        &self,
        param: CallToolRequestParam,
        context: RequestContext,
    ) -> Result<CallToolResult, ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(param.name, param.arguments, context))
            .await
    }

    pub async fn get_prompt(
        &self,
        param: GetPromptRequestParam,
        context: RequestContext,
    ) -> Result<GetPromptResult, ErrorData> {
        self.prompt_router
            .get(&param.name, param.arguments, context)
            .await
    }

    /// Run `method` for an initialized session and return the result object.
    pub async fn dispatch(
        &self,
        method: &str,
        params: Option<JsonObject>,
        context: RequestContext,
    ) -> Result<JsonObject, ErrorData> {
        tracing::debug!(%method, id = %context.id, "dispatching request");
        match method {
            method::PING => Ok(JsonObject::new()),
            method::LIST_TOOLS => {
                let _: PaginatedRequestParam = parse_params(params)?;
                to_json_object(&self.list_tools())
            }
            method::CALL_TOOL => {
                let param: CallToolRequestParam = parse_params(params)?;
                to_json_object(&self.call_tool(param, context).await?)
            }
            method::LIST_PROMPTS => {
                let _: PaginatedRequestParam = parse_params(params)?;
                to_json_object(&self.list_prompts())
            }
            method::GET_PROMPT => {
                let param: GetPromptRequestParam = parse_params(params)?;
                to_json_object(&self.get_prompt(param, context).await?)
            }
            method::SET_LOGGING_LEVEL => {
                let SetLevelRequestParam { level } = parse_params(params)?;
                context.peer.set_logging_level(level);
                Ok(JsonObject::new())
            }
            method::INITIALIZE => Err(ErrorData::invalid_request(
                "Invalid Request: Server already initialized",
                None,
            )),
            other => Err(ErrorData::method_not_found(other)),
        }
    }

    /// Wrap [`McpServer::dispatch`] into a JSON-RPC response or error.
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        context: RequestContext,
    ) -> ServerJsonRpcMessage {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        match self.dispatch(&method, params, context).await {
            Ok(result) => JsonRpcMessage::response(id, result),
            Err(error) => {
                tracing::debug!(%method, %id, %error, "request failed");
                JsonRpcMessage::error(Some(id), error)
            }
        }
    }
}

pub struct McpServerBuilder {
    server_info: Implementation,
    instructions: Option<String>,
    tools: Vec<ToolRoute>,
    prompts: Vec<PromptRoute>,
}

impl McpServerBuilder {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.server_info.title = Some(title.into());
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn tool(mut self, route: ToolRoute) -> Self {
        self.tools.push(route);
        self
    }

    pub fn prompt(mut self, route: PromptRoute) -> Self {
        self.prompts.push(route);
        self
    }

    /// Freeze the tool and prompt tables. Names must be unique.
    pub fn build(self) -> Result<McpServer, RegistrationError> {
        let mut tool_router = ToolRouter::new();
        for route in self.tools {
            tool_router.add_route(route)?;
        }
        let mut prompt_router = PromptRouter::new();
        for route in self.prompts {
            prompt_router.add_route(route)?;
        }
        Ok(McpServer {
            server_info: self.server_info,
            instructions: self.instructions,
            tool_router,
            prompt_router,
        })
    }
}
