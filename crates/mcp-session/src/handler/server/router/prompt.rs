use std::{collections::HashMap, future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{RegistrationError, tool::panic_message};
use crate::{
    handler::server::{RequestContext, common::arguments_from_schema},
    model::{ErrorData, GetPromptResult, JsonObject, Prompt, PromptMessage, parse_params},
};

impl From<Vec<PromptMessage>> for GetPromptResult {
    fn from(messages: Vec<PromptMessage>) -> Self {
        GetPromptResult {
            description: None,
            messages,
        }
    }
}

pub struct PromptContext {
    pub name: String,
    pub arguments: JsonObject,
    pub request_context: RequestContext,
}

pub type DynGetPromptHandler =
    dyn Fn(PromptContext) -> BoxFuture<'static, Result<GetPromptResult, ErrorData>> + Send + Sync;

#[derive(Clone)]
pub struct PromptRoute {
    pub get: Arc<DynGetPromptHandler>,
    pub attr: Prompt,
}

impl std::fmt::Debug for PromptRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRoute")
            .field("name", &self.attr.name)
            .field("arguments", &self.attr.arguments)
            .finish()
    }
}

impl PromptRoute {
    /// Handler receiving the raw argument object.
    pub fn new<F, Fut, R>(attr: Prompt, handler: F) -> Self
    where
        F: Fn(JsonObject, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ErrorData>> + Send + 'static,
        R: Into<GetPromptResult>,
    {
        PromptRoute {
            get: Arc::new(move |context: PromptContext| {
                let fut = handler(context.arguments, context.request_context);
                async move { fut.await.map(Into::into) }.boxed()
            }),
            attr,
        }
    }

    /// Handler receiving arguments deserialized into `A`; the declared
    /// arguments are derived from `A`'s schema.
    pub fn typed<A, F, Fut, R>(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(A, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ErrorData>> + Send + 'static,
        R: Into<GetPromptResult>,
    {
        let attr = Prompt::new(name, Some(description), arguments_from_schema::<A>());
        PromptRoute {
            get: Arc::new(move |context: PromptContext| {
                let arguments: A = match parse_params(Some(context.arguments)) {
                    Ok(arguments) => arguments,
                    Err(error) => return futures::future::ready(Err(error)).boxed(),
                };
                let fut = handler(arguments, context.request_context);
                async move { fut.await.map(Into::into) }.boxed()
            }),
            attr,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.attr = self.attr.with_title(title);
        self
    }

    /// Reject calls that omit a declared required argument (or pass `null`).
    fn check_required(&self, arguments: &JsonObject) -> Result<(), ErrorData> {
        for argument in self.attr.required_arguments() {
            if matches!(arguments.get(&argument.name), None | Some(Value::Null)) {
                return Err(ErrorData::invalid_params(
                    format!(
                        "missing required argument `{}` for prompt `{}`",
                        argument.name, self.attr.name
                    ),
                    Some(json!({ "argument": argument.name })),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptRouter {
    routes: Vec<PromptRoute>,
    index: HashMap<String, usize>,
}

impl PromptRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, route: PromptRoute) -> Result<(), RegistrationError> {
        let name = route.attr.name.clone();
        if self.index.contains_key(&name) {
            return Err(RegistrationError::DuplicatePrompt(name));
        }
        self.index.insert(name, self.routes.len());
        self.routes.push(route);
        Ok(())
    }

    pub fn get_route(&self, name: &str) -> Option<&PromptRoute> {
        self.index.get(name).map(|&i| &self.routes[i])
    }

    pub fn list_all(&self) -> Vec<Prompt> {
        self.routes.iter().map(|route| route.attr.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub async fn get(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        request_context: RequestContext,
    ) -> Result<GetPromptResult, ErrorData> {
        let Some(route) = self.get_route(name) else {
            return Err(ErrorData::invalid_params(
                format!("prompt not found: {name}"),
                None,
            ));
        };
        let arguments = arguments.unwrap_or_default();
        route.check_required(&arguments)?;
        let get = route.get.clone();
        let context = PromptContext {
            name: name.to_owned(),
            arguments,
            request_context,
        };
        match AssertUnwindSafe(async move { get(context).await })
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!(prompt = %name, %reason, "prompt handler panicked");
                Err(ErrorData::internal_error(
                    format!("prompt {name} failed: {reason}"),
                    None,
                ))
            }
        }
    }
}
