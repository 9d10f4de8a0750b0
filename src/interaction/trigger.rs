//! Decides whether an inbound message warrants a reply.

use std::{
    collections::BTreeSet,
    fmt,
    sync::LazyLock,
};

use regex::Regex;

use crate::base::types::InboundMessage;

/// User (`<@id>`, `<@!id>`) and role (`<@&id>`) mentions.
static MENTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<@[!&]?\d+>").expect("mention pattern is valid"));

// Types.

/// Why the bot decided to respond.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Mention,
    TriggerWord(String),
    ReplyToBot,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Mention => write!(f, "mention"),
            Trigger::TriggerWord(word) => write!(f, "trigger word `{word}`"),
            Trigger::ReplyToBot => write!(f, "reply to bot"),
        }
    }
}

// Helpers.

/// Returns the reason to respond, or `None` when the message should be ignored.
///
/// Never responds to the bot's own messages. Messages from other bots are ignored unless
/// `respond_to_bots` is set.
pub fn should_respond(message: &InboundMessage, bot_user_id: &str, trigger_words: &BTreeSet<String>, respond_to_bots: bool) -> Option<Trigger> {
    if message.author.id == bot_user_id {
        return None;
    }

    if message.author.bot && !respond_to_bots {
        return None;
    }

    if is_mentioned(message, bot_user_id) {
        return Some(Trigger::Mention);
    }

    let content = message.content.to_lowercase();

    if let Some(word) = trigger_words.iter().find(|w| !w.is_empty() && content.contains(&w.to_lowercase())) {
        return Some(Trigger::TriggerWord(word.clone()));
    }

    if message.reply_to.as_ref().and_then(|r| r.author_id.as_deref()) == Some(bot_user_id) {
        return Some(Trigger::ReplyToBot);
    }

    None
}

fn is_mentioned(message: &InboundMessage, bot_user_id: &str) -> bool {
    message.mentions.iter().any(|id| id == bot_user_id) || message.content.contains(&format!("<@{bot_user_id}>")) || message.content.contains(&format!("<@!{bot_user_id}>"))
}

/// Strips user and role mentions, then trims.
pub fn clean_content(content: &str) -> String {
    MENTION_PATTERN.replace_all(content, "").trim().to_string()
}

// Tests.

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::base::types::{Author, ReplyReference};

    const BOT: &str = "1000";

    fn message(author: &str, content: &str) -> InboundMessage {
        InboundMessage {
            id: "1".to_string(),
            channel_id: "10".to_string(),
            guild_id: None,
            author: Author {
                id: author.to_string(),
                username: "alice".to_string(),
                bot: false,
            },
            content: content.to_string(),
            mentions: Vec::new(),
            reply_to: None,
            created_at: Utc::now(),
        }
    }

    fn words(words: &[&str]) -> BTreeSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_never_responds_to_itself() {
        let mut own = message(BOT, "<@1000> hello");
        own.mentions.push(BOT.to_string());

        assert_eq!(should_respond(&own, BOT, &words(&["hello"]), true), None);
    }

    #[test]
    fn test_mentions() {
        let mut by_list = message("2", "hey there");
        by_list.mentions.push(BOT.to_string());
        assert_eq!(should_respond(&by_list, BOT, &words(&[]), false), Some(Trigger::Mention));

        let by_text = message("2", "<@!1000> hey");
        assert_eq!(should_respond(&by_text, BOT, &words(&[]), false), Some(Trigger::Mention));
    }

    #[test]
    fn test_trigger_words_are_case_insensitive_substrings() {
        let msg = message("2", "Does anyone know RUSTACEANS here?");

        assert_eq!(should_respond(&msg, BOT, &words(&["rust"]), false), Some(Trigger::TriggerWord("rust".to_string())));
        assert_eq!(should_respond(&msg, BOT, &words(&["python"]), false), None);
    }

    #[test]
    fn test_replies_to_the_bot() {
        let mut msg = message("2", "thanks!");
        msg.reply_to = Some(ReplyReference {
            message_id: "5".to_string(),
            author_id: Some(BOT.to_string()),
        });
        assert_eq!(should_respond(&msg, BOT, &words(&[]), false), Some(Trigger::ReplyToBot));

        msg.reply_to = Some(ReplyReference {
            message_id: "5".to_string(),
            author_id: Some("3".to_string()),
        });
        assert_eq!(should_respond(&msg, BOT, &words(&[]), false), None);
    }

    #[test]
    fn test_other_bots_are_opt_in() {
        let mut msg = message("2", "<@1000> ping");
        msg.author.bot = true;

        assert_eq!(should_respond(&msg, BOT, &words(&[]), false), None);
        assert_eq!(should_respond(&msg, BOT, &words(&[]), true), Some(Trigger::Mention));
    }

    #[test]
    fn test_clean_content() {
        assert_eq!(clean_content("<@1000> what's in #general"), "what's in #general");
        assert_eq!(clean_content("hi <@!42> and <@&7>  "), "hi  and");
    }
}
