use std::time::Duration;

use mcp_session::{
    ErrorData, McpServer, RequestContext,
    handler::server::{
        PeerClosed,
        router::{RegistrationError, prompt::PromptRoute, tool::ToolRoute},
    },
    model::{LoggingLevel, LoggingMessageNotificationParam, PromptMessage, PromptMessageRole},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ForecastRequest {
    /// Name of the city
    pub city: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct TemperatureRequest {
    pub city: String,
    pub unit: TemperatureUnit,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct Temperature {
    pub temperature: i64,
    pub unit: TemperatureUnit,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GreetingArgs {
    /// Name to include in greeting
    pub name: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CountRequest {
    pub steps: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct BroadcastRequest {
    pub count: u32,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct AnnounceRequest {
    pub text: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct Empty {}

pub const TOOL_NAMES: [&str; 7] = [
    "mcp_get_forecast",
    "get_current_temperature",
    "slow_count",
    "broadcast",
    "announce",
    "explode",
    "detonate",
];

fn forecast() -> ToolRoute {
    ToolRoute::typed(
        "mcp_get_forecast",
        "Get weather forecast for a city",
        |ForecastRequest { city }: ForecastRequest, _ctx: RequestContext| async move {
            json!({ "message": format!("Forecast for {city} is 200 degrees") }).to_string()
        },
    )
}

fn current_temperature() -> ToolRoute {
    ToolRoute::structured(
        "get_current_temperature",
        "Get current temperature for a city",
        |TemperatureRequest { unit, .. }: TemperatureRequest, _ctx: RequestContext| async move {
            let temperature = match unit {
                TemperatureUnit::Celsius => 20,
                TemperatureUnit::Fahrenheit => 68,
            };
            Ok::<_, String>(Temperature { temperature, unit })
        },
    )
}

/// Reports progress after every step; stops early when cancelled.
fn slow_count() -> ToolRoute {
    ToolRoute::typed(
        "slow_count",
        "Count slowly, reporting progress",
        |CountRequest { steps, delay_ms }: CountRequest, ctx: RequestContext| async move {
            for step in 1..=steps {
                tokio::select! {
                    _ = ctx.ct.cancelled() => return Ok(format!("cancelled at {step}")),
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                }
                ctx.notify_progress(step as f64, Some(steps as f64), None)
                    .await?;
            }
            Ok::<_, PeerClosed>(format!("counted {steps}"))
        },
    )
}

/// Pushes `count` log notifications through the session peer.
fn broadcast() -> ToolRoute {
    ToolRoute::typed(
        "broadcast",
        "Send notifications on the standalone stream",
        |BroadcastRequest { count }: BroadcastRequest, ctx: RequestContext| async move {
            for seq in 1..=count {
                ctx.peer.notify_logging_message(LoggingMessageNotificationParam {
                    level: LoggingLevel::Info,
                    logger: Some("broadcast".to_owned()),
                    data: json!({ "seq": seq }),
                })?;
            }
            Ok::<_, PeerClosed>(format!("sent {count}"))
        },
    )
}

fn announce() -> ToolRoute {
    ToolRoute::typed(
        "announce",
        "Log a line on the request stream, then echo it",
        |AnnounceRequest { text }: AnnounceRequest, ctx: RequestContext| async move {
            ctx.log(LoggingLevel::Info, Some("announce".to_owned()), json!(text))
                .await?;
            Ok::<_, PeerClosed>(text)
        },
    )
}

fn explode() -> ToolRoute {
    ToolRoute::typed(
        "explode",
        "Always fails",
        |Empty {}: Empty, _ctx: RequestContext| async move {
            Err::<String, _>("weather station offline")
        },
    )
}

fn detonate() -> ToolRoute {
    ToolRoute::typed(
        "detonate",
        "Always panics",
        |Empty {}: Empty, _ctx: RequestContext| async move {
            let fire = || -> String { panic!("kaboom") };
            fire()
        },
    )
}

fn greeting_template() -> PromptRoute {
    PromptRoute::typed(
        "greeting-template",
        "A simple greeting prompt template",
        |GreetingArgs { name }: GreetingArgs, _ctx: RequestContext| async move {
            Ok::<_, ErrorData>(vec![PromptMessage::new_text(
                PromptMessageRole::User,
                format!(
                    "Please greet {name} in a friendly manner and add a sign BigTeam in the end of the message."
                ),
            )])
        },
    )
}

pub fn test_server() -> Result<McpServer, RegistrationError> {
    McpServer::builder("mock-mcp-server", "1.0.0")
        .tool(forecast())
        .tool(current_temperature())
        .tool(slow_count())
        .tool(broadcast())
        .tool(announce())
        .tool(explode())
        .tool(detonate())
        .prompt(greeting_template())
        .build()
}
