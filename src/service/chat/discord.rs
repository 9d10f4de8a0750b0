//! Discord integration over the gateway (via `poise`) and the REST API.

use std::{
    error::Error as StdError,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::{
    Framework, FrameworkOptions,
    serenity_prelude::{ChannelId, ClientBuilder, Context, CreateMessage, FullEvent, GatewayIntents, Http, Message, MessageId, Timestamp},
};
use tracing::{info, instrument, warn};

use super::{ChatClient, GenericChatClient, InboundCallback};
use crate::base::{
    config::Config,
    types::{Author, InboundMessage, ReplyReference, Res, Void},
};

type EventResult = Result<(), Box<dyn StdError + Send + Sync>>;

// Extra methods on `ChatClient` applied by the discord implementation.

impl From<DiscordChatClient> for ChatClient {
    fn from(client: DiscordChatClient) -> Self {
        Self::new(Arc::new(client))
    }
}

// Structs.

/// Framework state handed to every gateway event.
struct DiscordData {
    on_message: InboundCallback,
}

/// Discord client implementation.
#[derive(Clone)]
pub struct DiscordChatClient {
    token: String,
    http: Arc<Http>,
    bot_user_id: String,
    connected: Arc<AtomicBool>,
}

impl DiscordChatClient {
    /// Create a new Discord chat client and resolve the bot's own user id.
    #[instrument(name = "DiscordChatClient::new", skip_all)]
    pub async fn new(config: &Config) -> Res<Self> {
        if config.discord_token.is_empty() {
            return Err(anyhow!("A Discord token is required (`BOTFORGE_DISCORD_TOKEN`)."));
        }

        let http = Arc::new(Http::new(&config.discord_token));

        let bot_user = http.get_current_user().await.context("Failed to authenticate with Discord")?;
        let bot_user_id = bot_user.id.to_string();

        info!("Discord bot user ID: {}", bot_user_id);

        Ok(Self {
            token: config.discord_token.clone(),
            http,
            bot_user_id,
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The REST client, shared with the Discord tools.
    pub fn http(&self) -> Arc<Http> {
        self.http.clone()
    }
}

#[async_trait]
impl GenericChatClient for DiscordChatClient {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn start(&self, on_message: InboundCallback) -> Void {
        let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;
        let connected = self.connected.clone();

        let framework = Framework::builder()
            .options(FrameworkOptions {
                event_handler: |ctx, event, _framework, data| Box::pin(handle_event(ctx, event, data)),
                ..Default::default()
            })
            .setup(move |_ctx, ready, _framework| {
                Box::pin(async move {
                    info!("Discord gateway ready as `{}`.", ready.user.name);
                    connected.store(true, Ordering::SeqCst);

                    Ok(DiscordData { on_message })
                })
            })
            .build();

        let mut client = ClientBuilder::new(&self.token, intents).framework(framework).await?;

        let result = client.start().await;

        self.connected.store(false, Ordering::SeqCst);
        warn!("Discord gateway connection closed.");

        Ok(result?)
    }

    #[instrument(skip_all)]
    async fn send_message(&self, channel_id: &str, text: &str, reply_to: Option<&str>) -> Res<String> {
        let channel = ChannelId::new(parse_snowflake(channel_id)?);

        let mut builder = CreateMessage::new().content(text);

        if let Some(reply_to) = reply_to {
            builder = builder.reference_message((channel, MessageId::new(parse_snowflake(reply_to)?)));
        }

        let sent = channel.send_message(&self.http, builder).await?;

        Ok(sent.id.to_string())
    }

    async fn broadcast_typing(&self, channel_id: &str) -> Void {
        let channel = ChannelId::new(parse_snowflake(channel_id)?);

        channel.broadcast_typing(&self.http).await?;

        Ok(())
    }
}

// Handlers.

async fn handle_event(_ctx: &Context, event: &FullEvent, data: &DiscordData) -> EventResult {
    if let FullEvent::Message { new_message } = event {
        (data.on_message)(to_inbound(new_message));
    }

    Ok(())
}

// Helpers.

/// Normalizes a gateway message.
fn to_inbound(message: &Message) -> InboundMessage {
    let author = &message.author;

    let reply_to = message.message_reference.as_ref().and_then(|r| r.message_id).map(|id| ReplyReference {
        message_id: id.to_string(),
        author_id: message.referenced_message.as_ref().map(|m| m.author.id.to_string()),
    });

    InboundMessage {
        id: message.id.to_string(),
        channel_id: message.channel_id.to_string(),
        guild_id: message.guild_id.map(|g| g.to_string()),
        author: Author {
            id: author.id.to_string(),
            username: author.global_name.clone().unwrap_or_else(|| author.name.clone()),
            bot: author.bot,
        },
        content: message.content.clone(),
        mentions: message.mentions.iter().map(|u| u.id.to_string()).collect(),
        reply_to,
        created_at: to_utc(&message.timestamp),
    }
}

/// Converts a Discord timestamp to UTC, keeping sub-second precision.
fn to_utc(timestamp: &Timestamp) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&timestamp.to_string())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::from_timestamp(timestamp.unix_timestamp(), 0).unwrap_or_else(Utc::now))
}

/// Parses a Discord snowflake id, which must be a non-zero integer.
pub fn parse_snowflake(raw: &str) -> Res<u64> {
    let id = raw.trim().parse::<u64>().with_context(|| format!("`{raw}` is not a Discord id"))?;

    if id == 0 {
        return Err(anyhow!("`0` is not a Discord id"));
    }

    Ok(id)
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snowflake() {
        assert_eq!(parse_snowflake("123456789012345678").unwrap(), 123456789012345678);
        assert_eq!(parse_snowflake(" 42 ").unwrap(), 42);
        assert!(parse_snowflake("0").is_err());
        assert!(parse_snowflake("general").is_err());
    }

    #[test]
    fn test_to_utc_keeps_milliseconds() {
        let timestamp = Timestamp::parse("2024-03-01T12:30:45.678+00:00").unwrap();

        let converted = to_utc(&timestamp);

        assert_eq!(converted.timestamp(), 1_709_296_245);
        assert_eq!(converted.timestamp_subsec_millis(), 678);
    }
}
