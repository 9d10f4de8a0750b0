//! Discord tools backed by the REST API.

use std::{collections::HashMap, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, ChannelType, CreateMessage, GetMessages, GuildChannel, GuildId, Http, Message, UserId};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use super::{GenericToolExecutor, ToolCallContext, ToolExecutor, arg_limit, arg_str, object_schema, require_str};
use crate::{
    base::types::Res,
    service::{chat::discord::parse_snowflake, llm::ToolDescriptor},
};

/// Channels scanned by `search_messages` when no channel is given.
const SEARCH_CHANNEL_LIMIT: usize = 5;

/// Members fetched by `get_channel_members`.
const MEMBER_FETCH_LIMIT: u64 = 1000;

// Structs.

/// Executes Discord lookups for the model.
///
/// The operator set adds tools that post to channels; it is only published over MCP.
pub struct DiscordTools {
    http: Arc<Http>,
    operator: bool,
}

impl DiscordTools {
    /// The read-only tools offered to the chat model.
    pub fn new(http: Arc<Http>) -> Self {
        Self { http, operator: false }
    }

    /// The read-only tools plus `send_message`, `get_channel_members` and `mention_user`.
    pub fn operator(http: Arc<Http>) -> Self {
        Self { http, operator: true }
    }

    fn channel_id(arguments: &Value, context: &ToolCallContext) -> Res<ChannelId> {
        let raw = arg_str(arguments, "channel_id", context.channel_id.as_deref()).ok_or_else(|| anyhow!("Channel not found"))?;

        Ok(ChannelId::new(parse_snowflake(raw)?))
    }

    async fn guild_channel(&self, channel_id: ChannelId) -> Res<GuildChannel> {
        channel_id.to_channel(&self.http).await?.guild().ok_or_else(|| anyhow!("Channel {channel_id} is not a server channel"))
    }

    fn guild_id(arguments: &Value, context: &ToolCallContext) -> Res<GuildId> {
        let raw = arg_str(arguments, "guild_id", context.guild_id.as_deref()).ok_or_else(|| anyhow!("Guild not found"))?;

        Ok(GuildId::new(parse_snowflake(raw)?))
    }

    async fn sorted_channels(&self, guild_id: GuildId) -> Res<Vec<GuildChannel>> {
        let mut channels = guild_id.channels(&self.http).await?.into_values().collect::<Vec<_>>();
        channels.sort_by_key(|c| (c.position, c.id));

        Ok(channels)
    }

    #[instrument(skip_all)]
    async fn list_channels(&self, arguments: &Value, context: &ToolCallContext) -> Res<Value> {
        let guild_id = Self::guild_id(arguments, context)?;
        let channel_type = arg_str(arguments, "channel_type", None);

        let channels = self.sorted_channels(guild_id).await?;
        let categories = channels
            .iter()
            .filter(|c| c.kind == ChannelType::Category)
            .map(|c| (c.id, c.name.clone()))
            .collect::<HashMap<_, _>>();

        let listed = channels
            .iter()
            .filter(|c| channel_type.is_none_or(|t| c.kind.name().eq_ignore_ascii_case(t)))
            .map(|c| {
                json!({
                    "id": c.id.to_string(),
                    "name": c.name,
                    "type": c.kind.name(),
                    "category": c.parent_id.and_then(|p| categories.get(&p)),
                })
            })
            .collect::<Vec<_>>();

        Ok(json!({
            "success": true,
            "guild_id": guild_id.to_string(),
            "count": listed.len(),
            "channels": listed,
        }))
    }

    #[instrument(skip_all)]
    async fn get_channel_history(&self, arguments: &Value, context: &ToolCallContext) -> Res<Value> {
        let channel_id = Self::channel_id(arguments, context)?;
        let limit = arg_limit(arguments, "limit", 10, 100);

        let channel = channel_id.to_channel(&self.http).await?;
        let channel_name = channel.guild().map(|c| c.name).unwrap_or_else(|| channel_id.to_string());

        let messages = channel_id.messages(&self.http, GetMessages::new().limit(limit as u8)).await?;

        Ok(json!({
            "success": true,
            "channel": channel_name,
            "channel_id": channel_id.to_string(),
            "messages": messages.iter().map(message_json).collect::<Vec<_>>(),
        }))
    }

    #[instrument(skip_all)]
    async fn get_server_info(&self, arguments: &Value, context: &ToolCallContext) -> Res<Value> {
        let guild_id = Self::guild_id(arguments, context)?;

        let guild = guild_id.to_partial_guild_with_counts(&self.http).await?;
        let channel_count = guild_id.channels(&self.http).await?.len();

        let owner = match guild.owner_id.to_user(&self.http).await {
            Ok(user) => user.global_name.clone().unwrap_or(user.name),
            Err(err) => {
                warn!("Failed to resolve guild owner: {}", err);
                guild.owner_id.to_string()
            }
        };

        Ok(json!({
            "success": true,
            "server": {
                "id": guild_id.to_string(),
                "name": guild.name,
                "member_count": guild.approximate_member_count.unwrap_or_default(),
                "channel_count": channel_count,
                "owner": owner,
                "created_at": guild_id.created_at().to_rfc3339().unwrap_or_default(),
            },
        }))
    }

    #[instrument(skip_all)]
    async fn search_messages(&self, arguments: &Value, context: &ToolCallContext) -> Res<Value> {
        let query = require_str(arguments, "query")?;
        let needle = query.to_lowercase();
        let limit = arg_limit(arguments, "limit", 20, 100);

        let channels = match arg_str(arguments, "channel_id", None) {
            Some(raw) => vec![ChannelId::new(parse_snowflake(raw)?)],
            None => self
                .sorted_channels(Self::guild_id(arguments, context)?)
                .await?
                .into_iter()
                .filter(|c| c.kind == ChannelType::Text)
                .take(SEARCH_CHANNEL_LIMIT)
                .map(|c| c.id)
                .collect(),
        };

        if channels.is_empty() {
            return Ok(json!({ "error": "No accessible channels to search" }));
        }

        let mut results = Vec::new();

        for channel_id in channels {
            let messages = match channel_id.messages(&self.http, GetMessages::new().limit(100)).await {
                Ok(messages) => messages,
                Err(err) => {
                    warn!("Skipping channel {} during search: {}", channel_id, err);
                    continue;
                }
            };

            let channel_name = match channel_id.to_channel(&self.http).await {
                Ok(channel) => channel.guild().map(|c| c.name).unwrap_or_else(|| channel_id.to_string()),
                Err(_) => channel_id.to_string(),
            };

            for message in messages.iter().filter(|m| m.content.to_lowercase().contains(&needle)) {
                let mut found = message_json(message);
                found["channel"] = json!(channel_name);
                found["channel_id"] = json!(channel_id.to_string());
                results.push(found);

                if results.len() >= limit {
                    break;
                }
            }

            if results.len() >= limit {
                break;
            }
        }

        Ok(json!({
            "success": true,
            "query": query,
            "count": results.len(),
            "results": results,
        }))
    }

    #[instrument(skip_all)]
    async fn get_user_info(&self, arguments: &Value) -> Res<Value> {
        let user_id = UserId::new(parse_snowflake(require_str(arguments, "user_id")?)?);
        let user = user_id.to_user(&self.http).await?;

        Ok(json!({
            "success": true,
            "user": {
                "id": user.id.to_string(),
                "username": user.name,
                "display_name": user.global_name.clone().unwrap_or_else(|| user.name.clone()),
                "bot": user.bot,
                "created_at": user.id.created_at().to_rfc3339().unwrap_or_default(),
            },
        }))
    }

    #[instrument(skip_all)]
    async fn send_message(&self, arguments: &Value, context: &ToolCallContext) -> Res<Value> {
        let channel_id = Self::channel_id(arguments, context)?;
        let content = require_str(arguments, "content")?;

        let (message, channel) = self.post(channel_id, content).await?;

        Ok(json!({
            "success": true,
            "message_id": message.id.to_string(),
            "channel_name": channel.name,
            "content": content,
        }))
    }

    #[instrument(skip_all)]
    async fn mention_user(&self, arguments: &Value, context: &ToolCallContext) -> Res<Value> {
        let user_id = UserId::new(parse_snowflake(require_str(arguments, "user_id")?)?);
        let channel_id = Self::channel_id(arguments, context)?;
        let content = mention_text(user_id, require_str(arguments, "message")?);

        let (message, channel) = self.post(channel_id, &content).await?;

        Ok(json!({
            "success": true,
            "message_id": message.id.to_string(),
            "channel_name": channel.name,
            "mentioned_user": user_id.to_string(),
            "content": content,
        }))
    }

    async fn post(&self, channel_id: ChannelId, content: &str) -> Res<(Message, GuildChannel)> {
        if content.trim().is_empty() {
            return Err(anyhow!("Cannot send an empty message"));
        }

        let channel = self.guild_channel(channel_id).await?;
        let message = channel_id.send_message(&self.http, CreateMessage::new().content(content)).await?;

        info!("Posted message {} to #{}.", message.id, channel.name);

        Ok((message, channel))
    }

    #[instrument(skip_all)]
    async fn get_channel_members(&self, arguments: &Value, context: &ToolCallContext) -> Res<Value> {
        let channel_id = Self::channel_id(arguments, context)?;
        let channel = self.guild_channel(channel_id).await?;

        let guild = channel.guild_id.to_partial_guild(&self.http).await?;
        let members = channel.guild_id.members(&self.http, Some(MEMBER_FETCH_LIMIT), None).await?;

        let visible = members
            .iter()
            .filter(|m| guild.user_permissions_in(&channel, m).view_channel())
            .map(|m| {
                let roles = m.roles.iter().filter_map(|r| guild.roles.get(r)).map(|r| r.name.clone()).collect::<Vec<_>>();

                json!({
                    "id": m.user.id.to_string(),
                    "username": m.user.name,
                    "display_name": m.display_name(),
                    "bot": m.user.bot,
                    "roles": roles,
                })
            })
            .collect::<Vec<_>>();

        Ok(json!({
            "success": true,
            "channel_name": channel.name,
            "member_count": visible.len(),
            "members": visible,
        }))
    }
}

impl From<DiscordTools> for ToolExecutor {
    fn from(tools: DiscordTools) -> Self {
        Self::new(Arc::new(tools))
    }
}

#[async_trait]
impl GenericToolExecutor for DiscordTools {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors = discord_tool_descriptors();

        if self.operator {
            descriptors.extend(operator_descriptors());
        }

        descriptors
    }

    async fn execute(&self, name: &str, arguments: &Value, context: &ToolCallContext) -> Res<Value> {
        match name {
            "list_channels" => self.list_channels(arguments, context).await,
            "get_channel_history" => self.get_channel_history(arguments, context).await,
            "get_server_info" => self.get_server_info(arguments, context).await,
            "search_messages" => self.search_messages(arguments, context).await,
            "get_user_info" => self.get_user_info(arguments).await,
            "send_message" if self.operator => self.send_message(arguments, context).await,
            "get_channel_members" if self.operator => self.get_channel_members(arguments, context).await,
            "mention_user" if self.operator => self.mention_user(arguments, context).await,
            _ => Err(anyhow!("Unknown tool: {name}")),
        }
    }
}

// Helpers.

fn mention_text(user_id: UserId, message: &str) -> String {
    format!("<@{user_id}> {message}")
}

fn message_json(message: &Message) -> Value {
    json!({
        "id": message.id.to_string(),
        "author": message.author.global_name.clone().unwrap_or_else(|| message.author.name.clone()),
        "author_id": message.author.id.to_string(),
        "content": message.content,
        "timestamp": message.timestamp.to_rfc3339().unwrap_or_default(),
    })
}

/// Descriptors of the Discord tools.
pub fn discord_tool_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "list_channels".to_string(),
            description: "List the channels of the current Discord server.".to_string(),
            parameters: object_schema(
                json!({
                    "guild_id": { "type": "string", "description": "Server id; defaults to the current server." },
                    "channel_type": { "type": "string", "enum": ["text", "voice", "category"], "description": "Only list channels of this type." },
                }),
                &[],
            ),
        },
        ToolDescriptor {
            name: "get_channel_history".to_string(),
            description: "Get the most recent messages of a channel.".to_string(),
            parameters: object_schema(
                json!({
                    "channel_id": { "type": "string", "description": "Channel id; defaults to the current channel." },
                    "limit": { "type": "integer", "description": "How many messages to fetch (1-100, default 10)." },
                }),
                &[],
            ),
        },
        ToolDescriptor {
            name: "get_server_info".to_string(),
            description: "Get the name, owner, member count and channel count of the current Discord server.".to_string(),
            parameters: object_schema(
                json!({
                    "guild_id": { "type": "string", "description": "Server id; defaults to the current server." },
                }),
                &[],
            ),
        },
        ToolDescriptor {
            name: "search_messages".to_string(),
            description: "Search recent messages of the server for a piece of text.".to_string(),
            parameters: object_schema(
                json!({
                    "query": { "type": "string", "description": "Text to look for (case-insensitive)." },
                    "channel_id": { "type": "string", "description": "Only search this channel." },
                    "limit": { "type": "integer", "description": "Maximum results (default 20)." },
                }),
                &["query"],
            ),
        },
        ToolDescriptor {
            name: "get_user_info".to_string(),
            description: "Get information about a Discord user.".to_string(),
            parameters: object_schema(
                json!({
                    "user_id": { "type": "string", "description": "The user's id." },
                }),
                &["user_id"],
            ),
        },
    ]
}

/// Descriptors of the Discord tools that post or list members; MCP only.
fn operator_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "send_message".to_string(),
            description: "Send a message to a Discord channel.".to_string(),
            parameters: object_schema(
                json!({
                    "channel_id": { "type": "string" },
                    "content": { "type": "string", "description": "The message text." },
                }),
                &["channel_id", "content"],
            ),
        },
        ToolDescriptor {
            name: "get_channel_members".to_string(),
            description: "List the server members who can see a channel, with their roles.".to_string(),
            parameters: object_schema(
                json!({
                    "channel_id": { "type": "string" },
                }),
                &["channel_id"],
            ),
        },
        ToolDescriptor {
            name: "mention_user".to_string(),
            description: "Send a message to a channel that mentions a user.".to_string(),
            parameters: object_schema(
                json!({
                    "user_id": { "type": "string", "description": "The user to mention." },
                    "message": { "type": "string", "description": "Text after the mention." },
                    "channel_id": { "type": "string" },
                }),
                &["user_id", "message", "channel_id"],
            ),
        },
    ]
}

// Tests.
