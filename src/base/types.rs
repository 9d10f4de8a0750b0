use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

// Providers.

/// The closed set of LLM providers the gateway can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Xai,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Xai => "xai",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Messages.

/// Who authored a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A message persisted in the conversation history store.
///
/// Rows are append-only. Assistant rows carry the `user_id` of the user being answered,
/// so that a (user, channel) history contains both sides of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
    pub content: String,
    pub role: MessageRole,
    pub bot_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub metadata: Value,
}

/// The author of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub username: String,
    pub bot: bool,
}

/// The message an inbound message replies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyReference {
    pub message_id: String,
    pub author_id: Option<String>,
}

/// A normalized inbound chat message, whether it came from the gateway or the webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub author: Author,
    pub content: String,
    pub mentions: Vec<String>,
    pub reply_to: Option<ReplyReference>,
    pub created_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some()
    }
}

/// Aggregate counters reported by `/stats` and the `get_database_stats` tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub users: u64,
    pub total_messages: u64,
    pub messages_24h: u64,
    pub active_users_24h: u64,
}

// Documents.

/// Vector collections available for retrieval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentCollection {
    #[default]
    Documents,
    Code,
    Conversations,
}

impl DocumentCollection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "documents" => Some(Self::Documents),
            "code" => Some(Self::Code),
            "conversations" => Some(Self::Conversations),
            _ => None,
        }
    }
}

/// A document to be embedded and stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub collection: DocumentCollection,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Value,
}

/// A document returned by a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub id: String,
    pub collection: DocumentCollection,
    pub content: String,
    pub metadata: Value,
    pub score: f32,
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_serde_names() {
        assert_eq!(serde_json::to_string(&LlmProvider::OpenAi).unwrap(), "\"openai\"");
        assert_eq!(serde_json::from_str::<LlmProvider>("\"xai\"").unwrap(), LlmProvider::Xai);
        assert_eq!(serde_json::from_str::<LlmProvider>("\"anthropic\"").unwrap(), LlmProvider::Anthropic);
        assert!(serde_json::from_str::<LlmProvider>("\"gemini\"").is_err());
    }

    #[test]
    fn test_collection_parse() {
        assert_eq!(DocumentCollection::parse("Code"), Some(DocumentCollection::Code));
        assert_eq!(DocumentCollection::parse("nope"), None);
    }
}
