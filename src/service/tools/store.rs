//! Tools over the conversation history and document store.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use tracing::{info, instrument};

use super::{GenericToolExecutor, ToolCallContext, ToolExecutor, arg_limit, arg_str, object_schema, require_str};
use crate::{
    base::types::{DocumentCollection, MessageRole, NewDocument, Res, StoredMessage},
    service::{
        db::DbClient,
        llm::{LlmGateway, ToolDescriptor},
    },
};

// Structs.

/// Executes store lookups for the model, and store writes for MCP clients.
pub struct StoreTools {
    db: DbClient,
    llm: LlmGateway,
    operator: bool,
}

impl StoreTools {
    /// Read-only tools scoped to the conversation being answered.
    pub fn new(db: DbClient, llm: LlmGateway) -> Self {
        Self { db, llm, operator: false }
    }

    /// The full set, including writes and store-wide statistics.
    pub fn operator(db: DbClient, llm: LlmGateway) -> Self {
        Self { db, llm, operator: true }
    }

    #[instrument(skip_all)]
    async fn get_conversation_history(&self, arguments: &Value, context: &ToolCallContext) -> Res<Value> {
        // The chat model only ever sees the conversation it is answering.
        let (user_id, channel_id) = if self.operator {
            (arg_str(arguments, "user_id", context.user_id.as_deref()), arg_str(arguments, "channel_id", context.channel_id.as_deref()))
        } else {
            (context.user_id.as_deref(), context.channel_id.as_deref())
        };

        let user_id = user_id.ok_or_else(|| anyhow!("Missing required argument `user_id`."))?;
        let channel_id = channel_id.ok_or_else(|| anyhow!("Missing required argument `channel_id`."))?;
        let limit = arg_limit(arguments, "limit", 10, 50);

        let mut history = self.db.get_history(user_id, channel_id, limit).await?;
        history.reverse();

        let messages = history
            .iter()
            .map(|m| {
                json!({
                    "id": m.id,
                    "role": m.role,
                    "username": m.username,
                    "content": m.content,
                    "timestamp": m.created_at.to_rfc3339(),
                })
            })
            .collect::<Vec<_>>();

        Ok(json!({
            "success": true,
            "count": messages.len(),
            "messages": messages,
        }))
    }

    #[instrument(skip_all)]
    async fn search_conversations(&self, arguments: &Value) -> Res<Value> {
        let query = require_str(arguments, "query")?;
        let limit = arg_limit(arguments, "limit", 10, 100);

        let found = self.db.search_messages(query, arg_str(arguments, "channel_id", None), limit).await?;

        Ok(json!({
            "success": true,
            "query": query,
            "count": found.len(),
            "results": found,
        }))
    }

    /// Stores a batch of messages for a channel, skipping ids that are already stored.
    #[instrument(skip_all)]
    async fn save_conversation(&self, arguments: &Value) -> Res<Value> {
        let channel_id = require_str(arguments, "channel_id")?;
        let default_user = arg_str(arguments, "user_id", None);
        let agent_type = arg_str(arguments, "agent_type", None);
        let messages = arguments.get("messages").and_then(Value::as_array).ok_or_else(|| anyhow!("Missing required argument `messages`."))?;

        let received_at = Utc::now();
        let (mut saved, mut duplicates) = (0usize, 0usize);

        for (index, message) in messages.iter().enumerate() {
            let stored = saved_message(message, index, channel_id, default_user, agent_type, received_at)?;

            if self.db.add_message(&stored).await? {
                saved += 1;
            } else {
                duplicates += 1;
            }
        }

        info!("Saved {} message(s) to channel {} ({} already stored).", saved, channel_id, duplicates);

        Ok(json!({
            "success": true,
            "channel_id": channel_id,
            "messages_saved": saved,
            "duplicates": duplicates,
        }))
    }

    #[instrument(skip_all)]
    async fn get_database_stats(&self) -> Res<Value> {
        let stats = self.db.get_stats().await?;

        Ok(json!({
            "success": true,
            "stats": stats,
        }))
    }

    #[instrument(skip_all)]
    async fn search_documents(&self, arguments: &Value) -> Res<Value> {
        let query = require_str(arguments, "query")?;
        let collection = parse_collection(arguments)?;
        let limit = arg_limit(arguments, "limit", 5, 20);

        let embedding = self.llm.embed(query).await?;
        let documents = self.db.search_documents(collection, &embedding, limit).await?;

        Ok(json!({
            "success": true,
            "query": query,
            "collection": collection,
            "count": documents.len(),
            "documents": documents,
        }))
    }

    #[instrument(skip_all)]
    async fn add_document(&self, arguments: &Value) -> Res<Value> {
        let content = require_str(arguments, "content")?;
        let collection = parse_collection(arguments)?;
        let metadata = arguments.get("metadata").cloned().filter(Value::is_object).unwrap_or_else(|| json!({}));

        let embedding = self.llm.embed(content).await?;
        let id = self
            .db
            .add_document(&NewDocument {
                collection,
                content: content.to_string(),
                embedding,
                metadata,
            })
            .await?;

        Ok(json!({
            "success": true,
            "id": id,
            "collection": collection,
        }))
    }
}

impl From<StoreTools> for ToolExecutor {
    fn from(tools: StoreTools) -> Self {
        Self::new(Arc::new(tools))
    }
}

#[async_trait]
impl GenericToolExecutor for StoreTools {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors = vec![conversation_history_descriptor(self.operator), search_documents_descriptor()];

        if self.operator {
            descriptors.extend(operator_descriptors());
        }

        descriptors
    }

    async fn execute(&self, name: &str, arguments: &Value, context: &ToolCallContext) -> Res<Value> {
        match name {
            "get_conversation_history" => self.get_conversation_history(arguments, context).await,
            "search_documents" => self.search_documents(arguments).await,
            "search_conversations" if self.operator => self.search_conversations(arguments).await,
            "get_database_stats" if self.operator => self.get_database_stats().await,
            "add_document" if self.operator => self.add_document(arguments).await,
            "save_conversation" if self.operator => self.save_conversation(arguments).await,
            _ => Err(anyhow!("Unknown tool: {name}")),
        }
    }
}

// Helpers.

fn parse_collection(arguments: &Value) -> Res<DocumentCollection> {
    match arg_str(arguments, "collection", None) {
        Some(raw) => DocumentCollection::parse(raw).ok_or_else(|| anyhow!("Unknown collection `{raw}`.")),
        None => Ok(DocumentCollection::default()),
    }
}

/// Builds one stored row from a `save_conversation` message object.
fn saved_message(message: &Value, index: usize, channel_id: &str, default_user: Option<&str>, agent_type: Option<&str>, received_at: DateTime<Utc>) -> Res<StoredMessage> {
    let content = arg_str(message, "content", None).ok_or_else(|| anyhow!("Message {index} has no `content`."))?;

    let role = match arg_str(message, "role", None).or_else(|| arg_str(message, "type", None)).unwrap_or("user") {
        "user" => MessageRole::User,
        "assistant" | "agent" | "bot" => MessageRole::Assistant,
        other => return Err(anyhow!("Message {index} has unknown role `{other}`.")),
    };

    let user_id = arg_str(message, "user_id", default_user).unwrap_or("0");
    let created_at = arg_str(message, "timestamp", None)
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| received_at + Duration::microseconds(index as i64));

    let mut metadata = message.get("metadata").cloned().filter(Value::is_object).unwrap_or_else(|| json!({}));
    metadata["channelId"] = json!(channel_id);
    if let Some(agent_type) = agent_type {
        metadata["agentType"] = json!(agent_type);
    }

    Ok(StoredMessage {
        id: arg_str(message, "id", None)
            .map(str::to_string)
            .unwrap_or_else(|| format!("saved-{channel_id}-{}-{index}", received_at.timestamp_micros())),
        channel_id: channel_id.to_string(),
        user_id: user_id.to_string(),
        username: arg_str(message, "username", None).unwrap_or(user_id).to_string(),
        content: content.to_string(),
        role,
        bot_name: arg_str(message, "agent_name", None).map(str::to_string),
        created_at,
        metadata,
    })
}

fn conversation_history_descriptor(operator: bool) -> ToolDescriptor {
    let mut properties = json!({
        "limit": { "type": "integer", "description": "How many messages to return (default 10)." },
    });

    if operator {
        properties["user_id"] = json!({ "type": "string", "description": "The user whose conversation to read." });
        properties["channel_id"] = json!({ "type": "string", "description": "The channel of the conversation." });
    }

    ToolDescriptor {
        name: "get_conversation_history".to_string(),
        description: if operator {
            "Get the stored conversation between the bot and a user in a channel, oldest first."
        } else {
            "Get the stored conversation with the current user in this channel, oldest first."
        }
        .to_string(),
        parameters: object_schema(properties, &[]),
    }
}

fn search_documents_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "search_documents".to_string(),
        description: "Semantic search over stored documents.".to_string(),
        parameters: object_schema(
            json!({
                "query": { "type": "string", "description": "What to look for." },
                "collection": { "type": "string", "enum": ["documents", "code", "conversations"] },
                "limit": { "type": "integer", "description": "Maximum results (default 5)." },
            }),
            &["query"],
        ),
    }
}

fn operator_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "search_conversations".to_string(),
            description: "Case-insensitive text search over all stored messages.".to_string(),
            parameters: object_schema(
                json!({
                    "query": { "type": "string" },
                    "channel_id": { "type": "string" },
                    "limit": { "type": "integer" },
                }),
                &["query"],
            ),
        },
        ToolDescriptor {
            name: "save_conversation".to_string(),
            description: "Store a batch of conversation messages for a channel; ids that are already stored are skipped.".to_string(),
            parameters: object_schema(
                json!({
                    "channel_id": { "type": "string" },
                    "user_id": { "type": "string", "description": "Default user for messages without one." },
                    "agent_type": { "type": "string" },
                    "messages": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": { "type": "string" },
                                "user_id": { "type": "string" },
                                "username": { "type": "string" },
                                "content": { "type": "string" },
                                "role": { "type": "string", "enum": ["user", "assistant"] },
                                "agent_name": { "type": "string" },
                                "timestamp": { "type": "string", "description": "RFC 3339." },
                                "metadata": { "type": "object" },
                            },
                            "required": ["content"],
                        },
                    },
                }),
                &["channel_id", "messages"],
            ),
        },
        ToolDescriptor {
            name: "get_database_stats".to_string(),
            description: "Counts of users and messages, overall and over the last 24 hours.".to_string(),
            parameters: object_schema(json!({}), &[]),
        },
        ToolDescriptor {
            name: "add_document".to_string(),
            description: "Embed and store a document for later semantic search.".to_string(),
            parameters: object_schema(
                json!({
                    "content": { "type": "string" },
                    "collection": { "type": "string", "enum": ["documents", "code", "conversations"] },
                    "metadata": { "type": "object" },
                }),
                &["content"],
            ),
        },
    ]
}

// Tests.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::base::types::{MessageRole, StoredMessage};

    async fn tools(operator: bool) -> (StoreTools, DbClient) {
        let db = DbClient::surreal_memory().await.unwrap();
        let llm = LlmGateway::new(Vec::new(), "text-embedding-3-small", Duration::from_secs(1));
        let tools = if operator { StoreTools::operator(db.clone(), llm) } else { StoreTools::new(db.clone(), llm) };

        (tools, db)
    }

    #[tokio::test]
    async fn test_conversation_history_uses_context() {
        let (tools, db) = tools(false).await;

        db.add_message(&StoredMessage {
            id: "1".to_string(),
            channel_id: "C1".to_string(),
            user_id: "U1".to_string(),
            username: "alice".to_string(),
            content: "hello there".to_string(),
            role: MessageRole::User,
            bot_name: None,
            created_at: Utc::now(),
            metadata: json!({}),
        })
        .await
        .unwrap();

        let context = ToolCallContext {
            channel_id: Some("C1".to_string()),
            user_id: Some("U1".to_string()),
            guild_id: None,
        };

        let result = tools.execute("get_conversation_history", &json!({}), &context).await.unwrap();

        assert_eq!(result["success"], true);
        assert_eq!(result["count"], 1);
        assert_eq!(result["messages"][0]["content"], "hello there");
        assert_eq!(result["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_chat_history_ignores_requested_ids() {
        let (reader, db) = tools(false).await;

        db.add_message(&StoredMessage {
            id: "secret".to_string(),
            channel_id: "C2".to_string(),
            user_id: "VICTIM".to_string(),
            username: "bob".to_string(),
            content: "my secret".to_string(),
            role: MessageRole::User,
            bot_name: None,
            created_at: Utc::now(),
            metadata: json!({}),
        })
        .await
        .unwrap();

        let context = ToolCallContext {
            channel_id: Some("C1".to_string()),
            user_id: Some("ATTACKER".to_string()),
            guild_id: None,
        };

        let result = reader.execute("get_conversation_history", &json!({ "user_id": "VICTIM", "channel_id": "C2" }), &context).await.unwrap();
        assert_eq!(result["count"], 0);

        let schema = &reader.descriptors()[0].parameters["properties"];
        assert!(schema.get("user_id").is_none());
        assert!(schema.get("channel_id").is_none());

        let (operator, db) = tools(true).await;
        db.add_message(&StoredMessage {
            id: "kept".to_string(),
            channel_id: "C2".to_string(),
            user_id: "VICTIM".to_string(),
            username: "bob".to_string(),
            content: "visible to operators".to_string(),
            role: MessageRole::User,
            bot_name: None,
            created_at: Utc::now(),
            metadata: json!({}),
        })
        .await
        .unwrap();

        let result = operator.execute("get_conversation_history", &json!({ "user_id": "VICTIM", "channel_id": "C2" }), &ToolCallContext::default()).await.unwrap();
        assert_eq!(result["count"], 1);
    }

    #[tokio::test]
    async fn test_save_conversation() {
        let (operator, db) = tools(true).await;

        let arguments = json!({
            "channel_id": "C9",
            "user_id": "U9",
            "agent_type": "support",
            "messages": [
                { "id": "m1", "content": "how do I reset my password?", "username": "carol" },
                { "id": "m2", "content": "Use the account page.", "role": "assistant", "agent_name": "Helper" },
                { "content": "thanks" },
            ],
        });

        let result = operator.execute("save_conversation", &arguments, &ToolCallContext::default()).await.unwrap();
        assert_eq!(result["messages_saved"], 3);
        assert_eq!(result["duplicates"], 0);

        let history = db.get_history("U9", "C9", 10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "thanks");
        assert_eq!(history[1].role, MessageRole::Assistant);
        assert_eq!(history[1].bot_name.as_deref(), Some("Helper"));
        assert_eq!(history[2].metadata["agentType"], "support");

        let replay = json!({ "channel_id": "C9", "user_id": "U9", "messages": [{ "id": "m1", "content": "again" }] });
        let result = operator.execute("save_conversation", &replay, &ToolCallContext::default()).await.unwrap();
        assert_eq!(result["duplicates"], 1);

        let (reader, _) = tools(false).await;
        assert!(reader.execute("save_conversation", &arguments, &ToolCallContext::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_operator_tools_are_gated() {
        let (reader, _) = tools(false).await;
        let (operator, _) = tools(true).await;

        assert_eq!(reader.descriptors().len(), 2);
        assert_eq!(operator.descriptors().len(), 6);

        assert!(reader.execute("get_database_stats", &json!({}), &ToolCallContext::default()).await.is_err());

        let stats = operator.execute("get_database_stats", &json!({}), &ToolCallContext::default()).await.unwrap();
        assert_eq!(stats["stats"]["total_messages"], 0);
    }

    #[tokio::test]
    async fn test_search_documents_without_embeddings_fails() {
        let (tools, _) = tools(false).await;

        let err = tools.execute("search_documents", &json!({ "query": "rust" }), &ToolCallContext::default()).await.unwrap_err();

        assert!(err.to_string().contains("not configured"));
    }
}
