//! Assembles the message list sent to the model.

use tracing::{debug, instrument};

use crate::{
    base::types::{MessageRole, Res, StoredMessage},
    service::{db::DbClient, llm::ChatMessage},
};

/// Maximum number of messages submitted to the model per request, system prompt included.
pub const CONTEXT_CEILING: usize = 25;

/// Fetches the recent (user, channel) history and assembles the context for `current`.
///
/// Must run before `current` is stored. Does not write to the store.
#[instrument(skip(db, system_prompt, current))]
pub async fn build_context(db: &DbClient, prior_history_limit: usize, channel_id: &str, user_id: &str, system_prompt: &str, current: &str) -> Res<Vec<ChatMessage>> {
    let mut history = db.get_history(user_id, channel_id, prior_history_limit).await?;
    history.reverse();

    let messages = assemble(system_prompt, &history, current, CONTEXT_CEILING);

    debug!("Assembled {} context messages from {} history entries.", messages.len(), history.len());

    Ok(messages)
}

/// Builds `[system, ..history, current]` from chronological `history`.
///
/// `current` is not appended when it is byte-identical to the last history entry. When the result
/// exceeds `ceiling`, the oldest history entries are dropped and the system message is kept.
pub fn assemble(system_prompt: &str, history: &[StoredMessage], current: &str, ceiling: usize) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);

    messages.push(ChatMessage::system(system_prompt));

    messages.extend(history.iter().map(|m| match m.role {
        MessageRole::User => ChatMessage::user(&m.content),
        MessageRole::Assistant => ChatMessage::assistant(&m.content),
    }));

    if history.last().is_none_or(|last| last.content != current) {
        messages.push(ChatMessage::user(current));
    }

    if messages.len() > ceiling && ceiling > 0 {
        let excess = messages.len() - ceiling;
        messages.drain(1..=excess);
    }

    messages
}

// Tests.
