//! Sends replies to the channel in message-sized chunks and records them.

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::{
    base::types::{MessageRole, StoredMessage},
    service::{chat::ChatClient, db::DbClient},
};

/// Prefix of every chunk after the first.
pub const CONTINUATION_MARKER: &str = "*...continued*\n\n";

const PARAGRAPH_BREAK: &str = "\n\n";

// Structs.

/// Who a reply is for, and where it goes.
#[derive(Debug, Clone)]
pub struct Outbound<'a> {
    pub channel_id: &'a str,
    /// The inbound message the first chunk references, if any.
    pub reply_to: Option<&'a str>,
    /// The user being answered; assistant rows are filed under this user.
    pub user_id: &'a str,
    pub bot_name: &'a str,
    pub model: &'a str,
}

/// Splits replies, sends them, and stores each sent chunk as an assistant message.
pub struct ResponseDispatcher<'a> {
    pub chat: &'a ChatClient,
    pub db: &'a DbClient,
    /// Maximum characters per message, continuation marker included.
    pub limit: usize,
}

impl ResponseDispatcher<'_> {
    /// Sends `text` and returns the ids of the messages that were sent, in order.
    ///
    /// A failed send stops the dispatch. A failed store is logged and does not.
    #[instrument(skip_all, fields(channel_id = outbound.channel_id))]
    pub async fn send(&self, outbound: &Outbound<'_>, text: &str) -> Vec<String> {
        let chunks = split_message(text, self.limit);
        let mut sent = Vec::with_capacity(chunks.len());

        for (index, chunk) in chunks.iter().enumerate() {
            let reply_to = if index == 0 { outbound.reply_to } else { None };

            let message_id = match self.chat.send_message(outbound.channel_id, chunk, reply_to).await {
                Ok(id) => id,
                Err(err) => {
                    error!("Failed to send chunk {} of {}: {}", index + 1, chunks.len(), err);
                    break;
                }
            };

            let row = StoredMessage {
                id: message_id.clone(),
                channel_id: outbound.channel_id.to_string(),
                user_id: outbound.user_id.to_string(),
                username: outbound.bot_name.to_string(),
                content: chunk.clone(),
                role: MessageRole::Assistant,
                bot_name: Some(outbound.bot_name.to_string()),
                created_at: Utc::now(),
                metadata: json!({
                    "channelId": outbound.channel_id,
                    "model": outbound.model,
                    "isReply": outbound.reply_to.is_some(),
                }),
            };

            if let Err(err) = self.db.add_message(&row).await {
                warn!("Failed to store sent message {}: {}", message_id, err);
            }

            sent.push(message_id);
        }

        info!("Sent {} of {} chunk(s).", sent.len(), chunks.len());

        sent
    }
}

// Helpers.

/// Splits `text` into chunks of at most `limit` characters.
///
/// Paragraphs are packed greedily; a paragraph longer than a chunk is cut at its last newline or
/// space in range, or at the limit. Every chunk after the first starts with
/// [`CONTINUATION_MARKER`], and the chunk bodies concatenate back to `text`.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let continued_budget = limit.saturating_sub(CONTINUATION_MARKER.chars().count()).max(1);
    let budget = |index: usize| if index == 0 { limit.max(1) } else { continued_budget };

    let mut bodies: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for paragraph in text.split_inclusive(PARAGRAPH_BREAK) {
        let mut rest = paragraph;

        while !rest.is_empty() {
            let room = budget(bodies.len()) - current_len;
            let rest_len = rest.chars().count();

            if rest_len <= room {
                current.push_str(rest);
                current_len += rest_len;
                break;
            }

            if !current.is_empty() {
                bodies.push(std::mem::take(&mut current));
                current_len = 0;
                continue;
            }

            let (head, tail) = hard_split(rest, room);
            bodies.push(head.to_string());
            rest = tail;
        }
    }

    if !current.is_empty() {
        bodies.push(current);
    }

    bodies
        .into_iter()
        .enumerate()
        .map(|(index, body)| if index == 0 { body } else { format!("{CONTINUATION_MARKER}{body}") })
        .collect()
}

/// Cuts `text` after at most `max` characters, preferring the last newline or space.
fn hard_split(text: &str, max: usize) -> (&str, &str) {
    let end = text.char_indices().nth(max).map(|(i, _)| i).unwrap_or(text.len());
    let window = &text[..end];

    let cut = window
        .rfind(['\n', ' '])
        .map(|i| i + 1)
        .filter(|&cut| window[..cut].chars().count() >= max / 2)
        .unwrap_or(end);

    text.split_at(cut)
}

// Tests.
