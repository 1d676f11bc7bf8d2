//! Agentify - natural-language task gateway for MCP tool backends
//!
//! Runs the gateway as a JSON-RPC server over stdin/stdout. The upstream
//! client (typically an editor extension) initializes it with a backend
//! fleet; each orchestrate request is routed to one backend via a
//! language-model tool-selection step.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use agentify_core::backend::BackendsFile;
use agentify_core::gateway::{GatewayConfig, GatewayServer};
use agentify_core::trace::LogTraceSink;

/// Agentify - natural-language task gateway
#[derive(Parser)]
#[command(name = "agentify")]
#[command(about = "Routes natural-language tasks to MCP tool backends", long_about = None)]
struct Cli {
    /// Backend config file (mcpServers JSON); defaults to ./.mcp.json
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Completion model
    #[arg(long)]
    model: Option<String>,

    /// Chat completions endpoint
    #[arg(long)]
    completions_url: Option<String>,

    /// External agent to expose as a passthrough method (repeatable)
    #[arg(long = "agent")]
    agents: Vec<String>,

    /// Log directory (stdout carries the protocol, so logs go to a file)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn init_logging(log_dir: Option<PathBuf>) -> Result<()> {
    let log_dir = log_dir.unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("agentify")
            .join("logs")
    });
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::File::create(log_dir.join("agentify.log"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

async fn load_config(cli: &Cli) -> Result<GatewayConfig> {
    let mut config = GatewayConfig::from_env();

    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(url) = &cli.completions_url {
        config.completions_url = url.clone();
    }
    config.agents = cli.agents.clone();

    let config_path = cli
        .config
        .clone()
        .or_else(|| Path::new(".mcp.json").exists().then(|| ".mcp.json".into()));
    if let Some(path) = config_path {
        let file = BackendsFile::load(&path).await?;
        config.backends = file.descriptors()?;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_dir.clone())?;

    let config = load_config(&cli).await?;
    tracing::info!(
        backends = config.backends.len(),
        agents = config.agents.len(),
        model = %config.model,
        "starting gateway"
    );

    let server = GatewayServer::new(config, Arc::new(LogTraceSink));
    server.run(tokio::io::stdin(), tokio::io::stdout()).await
}
