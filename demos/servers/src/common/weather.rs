use mcp_session::{
    ErrorData, McpServer, RequestContext,
    handler::server::router::{
        RegistrationError,
        prompt::PromptRoute,
        tool::ToolRoute,
    },
    model::{PromptMessage, PromptMessageRole},
};
use serde::{Deserialize, Serialize};

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
    /// Name of the city
    pub city: String,
    /// Unit of the reported temperature
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

fn forecast() -> ToolRoute {
    ToolRoute::typed(
        "mcp_get_forecast",
        "Get weather forecast for a city",
        |ForecastRequest { city }: ForecastRequest, _ctx: RequestContext| async move {
            serde_json::json!({ "message": format!("Forecast for {city} is 200 degrees") })
                .to_string()
        },
    )
}

fn current_temperature() -> ToolRoute {
    ToolRoute::structured(
        "get_current_temperature",
        "Get current temperature for a city",
        |TemperatureRequest { city, unit }: TemperatureRequest, _ctx: RequestContext| async move {
            tracing::debug!(%city, ?unit, "temperature requested");
            let temperature = match unit {
                TemperatureUnit::Celsius => 20,
                TemperatureUnit::Fahrenheit => 68,
            };
            Ok::<_, String>(Temperature { temperature, unit })
        },
    )
    .with_title("Current Temperature")
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
    .with_title("Greeting Template")
}

pub fn weather_server() -> Result<McpServer, RegistrationError> {
    McpServer::builder("mock-mcp-server", "1.0.0")
        .instructions("Weather tools for testing MCP sessions")
        .tool(forecast())
        .tool(current_temperature())
        .prompt(greeting_template())
        .build()
}
