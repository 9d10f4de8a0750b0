//! Library root for `botforge`.
//!
//! Botforge is an LLM-backed Discord bot designed to:
//! - Answer when mentioned, replied to, or triggered by a configured word
//! - Keep a per-user, per-channel conversation history as context
//! - Let the model look things up through Discord, store and MCP tools
//! - Publish its store and filesystem tools as an MCP server
//!
//! The bot integrates with Discord for chat, SurrealDB for storage,
//! and OpenAI, Anthropic or xAI for responses. The architecture is built around
//! extensible traits that allow for different implementations of each service.

pub mod base;
pub mod interaction;
pub mod runtime;
pub mod server;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

use std::{path::PathBuf, sync::Arc};

use anyhow::anyhow;
use base::{config::Config, types::Void};
use poise::serenity_prelude::Http;
use rustls::crypto;
use service::{
    db::DbClient,
    llm::LlmGateway,
    mcp::server::McpToolServer,
    tools::{ToolExecutor, ToolRouter, discord::DiscordTools, filesystem::FilesystemTools, store::StoreTools},
};
use tracing::info;

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the botforge runtime:
/// - Initializes the crypto provider
/// - Creates the runtime context with database, LLM, chat and tool clients
/// - Starts the Discord listener and the management server
pub async fn start(config: Config) -> Void {
    info!("Starting botforge ...");

    install_crypto_provider()?;

    let runtime = runtime::Runtime::new(config).await?;

    runtime.start().await?;

    Ok(())
}

/// Public async entry for the `mcp-server` subcommand.
///
/// Serves the store tools, the filesystem tools confined to `roots` (or the configured
/// `filesystem_roots`), and the Discord tools when a token is configured, over MCP on stdio.
pub async fn serve_mcp(config: Config, roots: Vec<PathBuf>) -> Void {
    install_crypto_provider()?;

    let roots = if roots.is_empty() { config.filesystem_roots.clone() } else { roots };

    let db = DbClient::surreal(&config).await?;
    let llm = LlmGateway::from_config(&config);

    let mut executors: Vec<ToolExecutor> = vec![StoreTools::operator(db, llm).into(), FilesystemTools::new(&roots).into()];

    if config.discord_token.is_empty() {
        info!("No Discord token configured; serving without Discord tools.");
    } else {
        executors.push(DiscordTools::operator(Arc::new(Http::new(&config.discord_token))).into());
    }

    let tools = ToolRouter::new(executors);

    McpToolServer::new(tools.into()).serve_stdio().await
}

fn install_crypto_provider() -> Void {
    if crypto::CryptoProvider::get_default().is_some() {
        return Ok(());
    }

    crypto::ring::default_provider().install_default().map_err(|_| anyhow!("Failed to install the rustls crypto provider."))
}
