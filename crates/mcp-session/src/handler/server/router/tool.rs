use std::{
    any::Any, borrow::Cow, collections::HashMap, fmt::Display, future::Future,
    panic::AssertUnwindSafe, sync::Arc,
};

use futures::{FutureExt, future::BoxFuture};
use schemars::JsonSchema;
use serde::{Serialize, de::DeserializeOwned};

use super::RegistrationError;
use crate::{
    handler::server::{
        RequestContext,
        common::{schema_for_type, validate_output_schema},
        wrapper::Json,
    },
    model::{CallToolResult, Content, ErrorData, JsonObject, Tool, parse_params},
};

/// Conversion from whatever a tool handler returns into a `tools/call` result.
///
/// `Err` from the outer `Result` means the call could not be executed at all
/// and is reported as a JSON-RPC error.
pub trait IntoCallToolResult {
    fn into_call_tool_result(self) -> Result<CallToolResult, ErrorData>;
}

impl IntoCallToolResult for CallToolResult {
    fn into_call_tool_result(self) -> Result<CallToolResult, ErrorData> {
        Ok(self)
    }
}

impl IntoCallToolResult for Content {
    fn into_call_tool_result(self) -> Result<CallToolResult, ErrorData> {
        Ok(CallToolResult::success(vec![self]))
    }
}

impl IntoCallToolResult for Vec<Content> {
    fn into_call_tool_result(self) -> Result<CallToolResult, ErrorData> {
        Ok(CallToolResult::success(self))
    }
}

impl IntoCallToolResult for String {
    fn into_call_tool_result(self) -> Result<CallToolResult, ErrorData> {
        Content::text(self).into_call_tool_result()
    }
}

impl IntoCallToolResult for &'static str {
    fn into_call_tool_result(self) -> Result<CallToolResult, ErrorData> {
        Content::text(self).into_call_tool_result()
    }
}

/// A failing handler still produces a result, flagged `isError`.
impl<T, E> IntoCallToolResult for Result<T, E>
where
    T: IntoCallToolResult,
    E: Display,
{
    fn into_call_tool_result(self) -> Result<CallToolResult, ErrorData> {
        match self {
            Ok(value) => value.into_call_tool_result(),
            Err(error) => Ok(CallToolResult::error(vec![Content::text(error.to_string())])),
        }
    }
}

pub struct ToolCallContext {
    pub name: Cow<'static, str>,
    pub arguments: Option<JsonObject>,
    pub request_context: RequestContext,
}

impl ToolCallContext {
    pub fn new(
        name: Cow<'static, str>,
        arguments: Option<JsonObject>,
        request_context: RequestContext,
    ) -> Self {
        Self {
            name,
            arguments,
            request_context,
        }
    }
}

pub type DynCallToolHandler =
    dyn Fn(ToolCallContext) -> BoxFuture<'static, Result<CallToolResult, ErrorData>> + Send + Sync;

#[derive(Clone)]
pub struct ToolRoute {
    pub call: Arc<DynCallToolHandler>,
    pub attr: Tool,
}

impl std::fmt::Debug for ToolRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRoute")
            .field("name", &self.attr.name)
            .field("description", &self.attr.description)
            .field("input_schema", &self.attr.input_schema)
            .finish()
    }
}

impl ToolRoute {
    pub fn new_dyn<C>(attr: Tool, call: C) -> Self
    where
        C: Fn(ToolCallContext) -> BoxFuture<'static, Result<CallToolResult, ErrorData>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            call: Arc::new(call),
            attr,
        }
    }

    /// Handler receiving the raw argument object (`{}` when absent).
    pub fn new<F, Fut, R>(attr: Tool, handler: F) -> Self
    where
        F: Fn(JsonObject, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoCallToolResult,
    {
        Self::new_dyn(attr, move |context: ToolCallContext| {
            let fut = handler(
                context.arguments.unwrap_or_default(),
                context.request_context,
            );
            async move { fut.await.into_call_tool_result() }.boxed()
        })
    }

    /// Handler receiving arguments deserialized into `P`; the input schema is
    /// generated from `P`.
    pub fn typed<P, F, Fut, R>(
        name: impl Into<Cow<'static, str>>,
        description: impl Into<Cow<'static, str>>,
        handler: F,
    ) -> Self
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoCallToolResult,
    {
        let attr = Tool::new(name, description, schema_for_type::<P>());
        Self::new_dyn(attr, move |context: ToolCallContext| {
            let params: P = match parse_params(context.arguments) {
                Ok(params) => params,
                Err(error) => return futures::future::ready(Err(error)).boxed(),
            };
            let fut = handler(params, context.request_context);
            async move { fut.await.into_call_tool_result() }.boxed()
        })
    }

    /// Typed handler whose `Ok` value becomes `structuredContent`; the output
    /// schema is generated from `O`.
    pub fn structured<P, O, E, F, Fut>(
        name: impl Into<Cow<'static, str>>,
        description: impl Into<Cow<'static, str>>,
        handler: F,
    ) -> Self
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        O: Serialize + JsonSchema + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
    {
        let route = Self::typed(name, description, move |params: P, context| {
            let fut = handler(params, context);
            async move { fut.await.map(Json) }
        });
        route.with_output_schema(schema_for_type::<O>())
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.attr = self.attr.with_title(title);
        self
    }

    pub fn with_output_schema(mut self, schema: JsonObject) -> Self {
        self.attr = self.attr.with_output_schema(schema);
        self
    }

    pub fn name(&self) -> &str {
        &self.attr.name
    }
}

/// Tools in registration order, looked up by unique name.
#[derive(Debug, Clone, Default)]
pub struct ToolRouter {
    routes: Vec<ToolRoute>,
    index: HashMap<Cow<'static, str>, usize>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, route: ToolRoute) -> Result<(), RegistrationError> {
        let name = route.attr.name.clone();
        if self.index.contains_key(&name) {
            return Err(RegistrationError::DuplicateTool(name));
        }
        if let Some(schema) = &route.attr.output_schema {
            validate_output_schema(schema)
                .map_err(|reason| RegistrationError::InvalidOutputSchema {
                    tool: name.clone(),
                    reason,
                })?;
        }
        self.index.insert(name, self.routes.len());
        self.routes.push(route);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolRoute> {
        self.index.get(name).map(|&i| &self.routes[i])
    }

    pub fn has_route(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn list_all(&self) -> Vec<Tool> {
        self.routes.iter().map(|route| route.attr.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub async fn call(&self, context: ToolCallContext) -> Result<CallToolResult, ErrorData> {
        let Some(route) = self.get(&context.name) else {
            return Err(ErrorData::invalid_params(
                format!("tool not found: {}", context.name),
                None,
            ));
        };
        let name = context.name.clone();
        let call = route.call.clone();
        match AssertUnwindSafe(async move { call(context).await })
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!(tool = %name, %reason, "tool handler panicked");
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "tool {name} failed: {reason}"
                ))]))
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        handler::server::Peer,
        model::{ErrorCode, RequestId, object},
    };

    #[derive(serde::Deserialize, schemars::JsonSchema)]
    struct TemperatureRequest {
        city: String,
        unit: String,
    }

    #[derive(Serialize, schemars::JsonSchema)]
    struct Temperature {
        temperature: i32,
        unit: String,
    }

    fn context(name: &'static str, arguments: serde_json::Value) -> ToolCallContext {
        let (peer, _rx) = Peer::channel();
        ToolCallContext::new(
            name.into(),
            Some(object(arguments)),
            RequestContext::new(RequestId::Number(1), peer),
        )
    }

    fn router() -> ToolRouter {
        let mut router = ToolRouter::new();
        router
            .add_route(ToolRoute::structured(
                "get_current_temperature",
                "Current temperature of a city",
                |TemperatureRequest { city, unit }: TemperatureRequest, _ctx| async move {
                    if city.is_empty() {
                        return Err("city must not be empty");
                    }
                    Ok(Temperature {
                        temperature: 20,
                        unit,
                    })
                },
            ))
            .unwrap();
        router
            .add_route(ToolRoute::new(
                Tool::new("panics", "always panics", object(json!({ "type": "object" }))),
                |_args, _ctx| async move {
                    if true {
                        panic!("kaboom");
                    }
                    "unreachable"
                },
            ))
            .unwrap();
        router
    }

    #[tokio::test]
    async fn test_structured_tool() {
        let router = router();
        let tool = router.get("get_current_temperature").unwrap();
        assert_eq!(
            tool.attr.output_schema.as_ref().unwrap()["type"],
            json!("object")
        );
        let result = router
            .call(context(
                "get_current_temperature",
                json!({ "city": "Paris", "unit": "celsius" }),
            ))
            .await
            .unwrap();
        assert_eq!(
            result.structured_content,
            Some(json!({ "temperature": 20, "unit": "celsius" }))
        );
        assert!(!result.is_error());
    }

    #[tokio::test]
    async fn test_tool_error_is_reported_in_band() {
        let result = router()
            .call(context(
                "get_current_temperature",
                json!({ "city": "", "unit": "celsius" }),
            ))
            .await
            .unwrap();
        assert!(result.is_error());
        assert_eq!(result.text(), "city must not be empty");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let error = router()
            .call(context("nope", json!({})))
            .await
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::INVALID_PARAMS);
        assert_eq!(error.message, "tool not found: nope");
    }

    #[tokio::test]
    async fn test_bad_arguments_are_invalid_params() {
        let error = router()
            .call(context("get_current_temperature", json!({ "city": 3 })))
            .await
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_error_result() {
        let result = router().call(context("panics", json!({}))).await.unwrap();
        assert!(result.is_error());
        assert!(result.text().contains("kaboom"));
    }

    #[test]
    fn test_registration_order_is_kept() {
        let names: Vec<_> = router().list_all().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["get_current_temperature", "panics"]);
    }

    #[test]
    fn test_non_object_output_schema_is_rejected() {
        let mut router = ToolRouter::new();
        let route = ToolRoute::structured(
            "count",
            "returns a bare number",
            |_: JsonObject, _ctx| async move { Ok::<_, String>(1u32) },
        );
        assert!(matches!(
            router.add_route(route),
            Err(RegistrationError::InvalidOutputSchema { .. })
        ));
    }
}
