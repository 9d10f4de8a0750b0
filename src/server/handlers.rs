//! Handlers of the management HTTP API.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use crate::{
    base::types::{Author, Err, InboundMessage, ReplyReference},
    interaction::chat_event::{ChatEventOutcome, handle_chat_event_internal},
    runtime::Runtime,
};

// Types.

/// Error response: logs the error and answers `500 {"success": false, "error": ...}`.
pub struct ApiError(Err);

impl<E: Into<Err>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("Request failed: {}", self.0);

        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "success": false, "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

/// Body of `POST /bot/enabled`.
#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

/// Body of `POST /webhook`.
#[derive(Debug, Deserialize)]
pub struct WebhookMessage {
    pub id: String,
    pub content: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub author: WebhookAuthor,
    #[serde(default)]
    pub mentions: Vec<WebhookMention>,
    #[serde(default)]
    pub reply_to_message_id: Option<String>,
    #[serde(default)]
    pub reply_to_author_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookAuthor {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMention {
    pub id: String,
}

impl From<WebhookMessage> for InboundMessage {
    fn from(message: WebhookMessage) -> Self {
        let reply_to_author_id = message.reply_to_author_id;

        Self {
            id: message.id,
            channel_id: message.channel_id,
            guild_id: message.guild_id,
            author: Author {
                id: message.author.id,
                username: message.author.username,
                bot: message.author.bot,
            },
            content: message.content,
            mentions: message.mentions.into_iter().map(|m| m.id).collect(),
            reply_to: message.reply_to_message_id.map(|message_id| ReplyReference {
                message_id,
                author_id: reply_to_author_id,
            }),
            created_at: Utc::now(),
        }
    }
}

// Handlers.

/// `GET /health`
#[instrument(skip_all)]
pub async fn get_health(State(runtime): State<Runtime>) -> Response {
    match runtime.db.ping().await {
        Ok(()) => Json(json!({
            "status": "healthy",
            "database": "connected",
            "discord": if runtime.chat.is_connected() { "connected" } else { "disconnected" },
            "ai_providers": runtime.llm.providers(),
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .into_response(),
        Err(err) => {
            error!("Health check failed: {}", err);

            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "status": "unhealthy", "error": err.to_string() }))).into_response()
        }
    }
}

/// `GET /stats`
#[instrument(skip_all)]
pub async fn get_stats(State(runtime): State<Runtime>) -> ApiResult {
    let stats = runtime.db.get_stats().await?;

    Ok(Json(json!({
        "users": stats.users,
        "total_messages": stats.total_messages,
        "messages_24h": stats.messages_24h,
        "active_users_24h": stats.active_users_24h,
        "ai_providers": runtime.llm.providers(),
        "bot": runtime.bot.name,
        "enabled": runtime.is_enabled(),
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

/// `GET /bot`
pub async fn get_bot(State(runtime): State<Runtime>) -> Json<Value> {
    let bot = &runtime.bot;

    Json(json!({
        "name": bot.name,
        "llm_provider": bot.llm_provider,
        "llm_model": bot.llm_model,
        "trigger_words": bot.trigger_words,
        "max_context_messages": bot.max_context_messages,
        "tools_enabled": bot.tools_enabled,
        "enabled": runtime.is_enabled(),
    }))
}

/// `POST /bot/enabled`
#[instrument(skip_all)]
pub async fn post_bot_enabled(State(runtime): State<Runtime>, Json(body): Json<EnabledRequest>) -> Json<Value> {
    runtime.set_enabled(body.enabled);

    info!("Bot `{}` {}.", runtime.bot.name, if body.enabled { "enabled" } else { "disabled" });

    Json(json!({ "success": true, "enabled": body.enabled }))
}

/// `POST /webhook`
///
/// Runs the message pipeline inline and reports what it did.
#[instrument(skip_all)]
pub async fn post_webhook(State(runtime): State<Runtime>, Json(body): Json<WebhookMessage>) -> ApiResult {
    let message = InboundMessage::from(body);

    let outcome = handle_chat_event_internal(&message, &runtime).await?;

    let (responded, chunks) = match &outcome {
        ChatEventOutcome::Responded { sent } => (true, sent.len()),
        _ => (false, 0),
    };

    Ok(Json(json!({
        "success": true,
        "responded": responded,
        "chunks": chunks,
        "duplicate": outcome == ChatEventOutcome::Duplicate,
    })))
}
