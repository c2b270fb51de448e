use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chat_broker::MemoryBroker;
use chat_core::{ChatConfig, ChatContext};
use chat_tools::{ToolDispatcher, ToolRegistry};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod mcp;

use crate::mcp::McpServer;

#[derive(Debug, Parser)]
#[command(name = "agent-chatd")]
#[command(about = "Agent chat MCP server (stdio)")]
struct Cli {
    /// NATS server with JetStream enabled. Falls back to `NATS_URL`, then the local default.
    #[arg(long)]
    nats_url: Option<String>,
    /// Serve from an in-process broker; history lives only as long as the process.
    #[arg(long)]
    memory: bool,
    /// Upper bound on waiting for messages during a read.
    #[arg(long, default_value_t = 5_000)]
    fetch_expiry_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = ChatConfig::from_env()
        .broker_url_override(cli.nats_url)
        .fetch_expiry(Duration::from_millis(cli.fetch_expiry_ms));

    let mut builder = ChatContext::builder(config);
    if cli.memory {
        builder = builder.in_memory(MemoryBroker::new());
    }
    let chat = builder.build();

    chat.provision_all()
        .await
        .with_context(|| format!("failed to start against {}", chat.config().broker_url))?;

    let dispatcher = ToolDispatcher::new(Arc::new(ToolRegistry::with_chat_tools()), chat.clone());
    let server = McpServer::new(dispatcher);
    info!(broker = %chat.config().broker_url, memory = cli.memory, "agent chat MCP server running on stdio");

    tokio::select! {
        result = server.serve_stdio() => result?,
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
    }

    chat.shutdown().await;
    Ok(())
}
