//! Runtime services and shared state for botforge.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::anyhow;
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::{
    base::{
        config::{BotConfig, Config},
        types::{Res, Void},
    },
    interaction::chat_event::handle_chat_event,
    server,
    service::{
        chat::{ChatClient, InboundCallback, discord::DiscordChatClient},
        db::DbClient,
        llm::LlmGateway,
        mcp::McpClient,
        tools::{ToolExecutor, ToolRouter, discord::DiscordTools, store::StoreTools},
    },
};

/// Runtime service context that can be shared across the application.
///
/// This struct holds the configuration, the selected bot, and every service client.
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The bot this process runs as.
    pub bot: BotConfig,
    /// The database client instance.
    pub db: DbClient,
    /// The LLM gateway instance.
    pub llm: LlmGateway,
    /// The chat client instance.
    pub chat: ChatClient,
    /// Every tool the model may call.
    pub tools: ToolExecutor,
    /// Runtime on/off switch, toggled over HTTP.
    pub enabled: Arc<AtomicBool>,
}

impl Runtime {
    /// Create a new runtime instance.
    ///
    /// Fails when the bot is unknown or disabled, when its provider has no API key, or when
    /// Discord or the database cannot be reached.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        let bot = config.bot()?;

        if !bot.enabled {
            return Err(anyhow!("Bot `{}` is disabled in the configuration.", bot.name));
        }

        // Initialize the LLM gateway.
        let llm = LlmGateway::from_config(&config);

        if !llm.has(bot.llm_provider) {
            return Err(anyhow!("Bot `{}` uses `{}`, but no API key is configured for it.", bot.name, bot.llm_provider));
        }

        // Initialize the database.
        let db = DbClient::surreal(&config).await?;

        // Initialize the Discord client.
        let discord = DiscordChatClient::new(&config).await?;
        let discord_tools = DiscordTools::new(discord.http());

        // Connect to any remote tool servers.
        let mcp = McpClient::new(&config.mcp_config_path).await?;

        let tools = ToolRouter::new(vec![discord_tools.into(), StoreTools::new(db.clone(), llm.clone()).into(), mcp.into()]).into();

        info!("Running as bot `{}` on `{}` / `{}`.", bot.name, bot.llm_provider, bot.llm_model);

        Ok(Self {
            config,
            bot,
            db,
            llm,
            chat: discord.into(),
            tools,
            enabled: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Runs the chat listener and the management server until either stops or Ctrl-C.
    pub async fn start(&self) -> Void {
        let listener = TcpListener::bind(&self.config.http_bind).await?;

        info!("Management server listening on `{}`.", self.config.http_bind);

        let runtime = self.clone();
        let on_message: InboundCallback = Arc::new(move |message| handle_chat_event(message, runtime.clone()));

        tokio::select! {
            result = self.chat.start(on_message) => result,
            result = server::serve(listener, self.clone()) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down ...");
                Ok(())
            }
        }
    }
}
