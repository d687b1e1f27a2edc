use anyhow::Result;
use clap::Parser;
use mcp_session::{
    McpClientAdapter,
    model::{Implementation, object},
    service::client::ClientAdapterConfig,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "weather-client")]
#[command(about = "Talk to the weather demo server over Streamable HTTP")]
struct Cli {
    /// MCP endpoint
    #[arg(long, env = "MCP_URL", default_value = "http://127.0.0.1:4005/mcp")]
    url: String,

    #[arg(long, default_value = "London")]
    city: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut config = ClientAdapterConfig::with_uri(cli.url);
    config.client_info = Implementation::new("web-client", "1.0.0");
    let client = McpClientAdapter::from_config(config)
        .on_notification(|notification| tracing::info!(method = %notification.method, "server notification"))
        .on_error(|error| tracing::warn!(%error, "client error"));

    let server_info = client.connect().await?;
    tracing::info!("Connected to server: {server_info:#?}");

    let tools = client.list_tools().await?;
    tracing::info!("Available tools: {tools:#?}");

    let prompts = client.list_prompts().await?;
    tracing::info!("Available prompts: {prompts:#?}");

    let temperature = client
        .call_tool(
            "get_current_temperature",
            Some(object(json!({ "city": cli.city, "unit": "celsius" }))),
        )
        .await?;
    tracing::info!("Tool result: {temperature:#?}");

    let greeting = client
        .get_prompt("greeting-template", Some(object(json!({ "name": "Ada" }))))
        .await?;
    tracing::info!("Prompt result: {greeting:#?}");

    client.disconnect().await?;
    Ok(())
}
