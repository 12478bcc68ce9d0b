mod repl;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use forecast_core::{
    ForecastAgentBuilder, ForecastConfig, McpClient, OpenAiProvider, ToolCallPolicy,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Ask a language model about the weather, backed by a tool provider process.
#[derive(Debug, Parser)]
#[command(name = "forecast", version)]
struct Args {
    /// Chat model to use.
    #[arg(long, env = "FORECAST_MODEL")]
    model: Option<String>,

    /// OpenAI-compatible API base URL.
    #[arg(long, env = "FORECAST_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "FORECAST_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Command that starts the tool provider.
    #[arg(long)]
    server_command: Option<String>,

    /// Argument passed to the provider command; repeat for several.
    #[arg(long = "server-arg", allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Model invocations allowed per question.
    #[arg(long)]
    max_turns: Option<usize>,

    /// Run every tool call the model requests instead of only the first.
    #[arg(long)]
    all_tool_calls: bool,

    /// Print each answer as JSON, transcript included.
    #[arg(long)]
    json: bool,
}

impl Args {
    fn apply(&self, config: &mut ForecastConfig) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(api_key) = &self.api_key {
            config.api_key = api_key.clone();
        }
        if let Some(command) = &self.server_command {
            config.server.command = command.clone();
            config.server.args = self.server_args.clone();
        } else if !self.server_args.is_empty() {
            config.server.args = self.server_args.clone();
        }
        if let Some(max_turns) = self.max_turns {
            config.max_turns = max_turns;
        }
        if self.all_tool_calls {
            config.tool_call_policy = ToolCallPolicy::All;
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let args = Args::parse();

    let mut config = ForecastConfig::load().context("failed to load configuration")?;
    args.apply(&mut config);
    config.validate()?;
    debug!("using model {} at {}", config.model, config.base_url);

    let client = McpClient::connect_stdio(
        &config.server.name,
        &config.server.command,
        &config.server.args,
        config.client_options(),
    )
    .await
    .with_context(|| format!("could not start tool provider '{}'", config.server.command))?;
    let client = Arc::new(client);
    info!("connected to {}", client.server_name);

    if let Err(e) = repl::print_capabilities(&client).await {
        client.close().await;
        return Err(e);
    }

    let provider = OpenAiProvider::new(&config.base_url, &config.api_key, &config.model)
        .with_max_tokens(config.max_tokens);
    let agent = ForecastAgentBuilder::new(&config, provider, Arc::clone(&client)).build();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let result = repl::run(&agent, &cancel, args.json).await;
    client.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = Args::parse_from([
            "forecast",
            "--model",
            "gpt-test",
            "--server-command",
            "node",
            "--server-arg",
            "../server/dist/index.js",
            "--max-turns",
            "3",
            "--all-tool-calls",
        ]);
        let mut config = ForecastConfig::default();
        args.apply(&mut config);

        assert_eq!(config.model, "gpt-test");
        assert_eq!(config.server.command, "node");
        assert_eq!(config.server.args, vec!["../server/dist/index.js"]);
        assert_eq!(config.max_turns, 3);
        assert_eq!(config.tool_call_policy, ToolCallPolicy::All);
    }

    #[test]
    fn no_flags_keep_config() {
        let args = Args::parse_from(["forecast"]);
        let mut config = ForecastConfig::default();
        let before = config.server.command.clone();
        args.apply(&mut config);
        assert_eq!(config.server.command, before);
        assert_eq!(config.tool_call_policy, ToolCallPolicy::FirstOnly);
    }
}
