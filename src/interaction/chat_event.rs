use chrono::Utc;
use serde_json::json;
use tracing::{Instrument, debug, error, info, instrument, warn};

use super::{
    context::build_context,
    dispatch::{Outbound, ResponseDispatcher},
    round_trip::RoundTrip,
    trigger::{clean_content, should_respond},
};
use crate::{
    base::{
        prompts::{self, EMPTY_REPLY},
        types::{InboundMessage, MessageRole, Res, StoredMessage},
    },
    runtime::Runtime,
    service::{llm::GenerationSettings, tools::ToolCallContext},
};

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEventOutcome {
    /// No trigger matched.
    Ignored,
    /// The bot is switched off.
    Disabled,
    /// The message id was already stored; it has been handled before.
    Duplicate,
    /// A reply was sent as these message ids.
    Responded { sent: Vec<String> },
}

/// Handles an inbound message on its own task, logging any error.
#[instrument(skip_all, fields(message_id = %message.id))]
pub fn handle_chat_event(message: InboundMessage, runtime: Runtime) {
    tokio::spawn(
        async move {
            let result = handle_chat_event_internal(&message, &runtime).await;

            match result {
                Ok(outcome) => debug!("Handled message: {:?}", outcome),
                Err(err) => error!("Error while handling: {}", err),
            }
        }
        .in_current_span(),
    );
}

/// Runs the full pipeline for one inbound message.
#[instrument(skip_all, fields(message_id = %message.id, channel_id = %message.channel_id))]
pub async fn handle_chat_event_internal(message: &InboundMessage, runtime: &Runtime) -> Res<ChatEventOutcome> {
    let bot = &runtime.bot;

    // Decide whether to respond at all.

    if !runtime.is_enabled() {
        return Ok(ChatEventOutcome::Disabled);
    }

    let Some(trigger) = should_respond(message, runtime.chat.bot_user_id(), &bot.trigger_words, bot.respond_to_bots) else {
        return Ok(ChatEventOutcome::Ignored);
    };

    info!("Responding to {} ({}).", message.author.username, trigger);

    if let Err(err) = runtime.chat.broadcast_typing(&message.channel_id).await {
        warn!("Failed to show typing indicator: {}", err);
    }

    let question = clean_content(&message.content);

    runtime.db.upsert_user(&message.author.id, &message.author.username).await?;

    // Assemble the context from history, before the message itself is stored.

    let tools = bot.tools_enabled.then_some(&runtime.tools);
    let descriptors = tools.map(|t| t.descriptors()).unwrap_or_default();
    let system_prompt = prompts::system_prompt(bot, descriptors.iter().map(|d| (d.name.as_str(), d.description.as_str())), Utc::now());

    let context = build_context(&runtime.db, bot.max_context_messages, &message.channel_id, &message.author.id, &system_prompt, &question).await?;

    // Store the inbound message; a replayed delivery stops here.

    let inbound = StoredMessage {
        id: message.id.clone(),
        channel_id: message.channel_id.clone(),
        user_id: message.author.id.clone(),
        username: message.author.username.clone(),
        content: question.clone(),
        role: MessageRole::User,
        bot_name: None,
        created_at: message.created_at,
        metadata: json!({
            "channelId": message.channel_id,
            "replyToId": message.reply_to.as_ref().map(|r| &r.message_id),
            "originalContent": message.content,
        }),
    };

    if !runtime.db.add_message(&inbound).await? {
        info!("Message {} was already handled.", message.id);
        return Ok(ChatEventOutcome::Duplicate);
    }

    // Ask the model, running tools if it wants them.

    let settings = GenerationSettings::from(bot);
    let call_context = ToolCallContext {
        channel_id: Some(message.channel_id.clone()),
        guild_id: message.guild_id.clone(),
        user_id: Some(message.author.id.clone()),
    };

    let outcome = RoundTrip {
        llm: &runtime.llm,
        settings: &settings,
        tools,
        call_context: &call_context,
    }
    .run(&context, &question)
    .await;

    let reply = post_process(outcome.into_text(), runtime.chat.bot_user_id());

    // Send and record the reply.

    let dispatcher = ResponseDispatcher {
        chat: &runtime.chat,
        db: &runtime.db,
        limit: runtime.config.discord_message_limit,
    };

    let outbound = Outbound {
        channel_id: &message.channel_id,
        reply_to: message.is_reply().then_some(message.id.as_str()),
        user_id: &message.author.id,
        bot_name: &bot.name,
        model: &bot.llm_model,
    };

    let sent = dispatcher.send(&outbound, &reply).await;

    Ok(ChatEventOutcome::Responded { sent })
}

/// Replaces a blank reply and removes the bot's mentions of itself.
fn post_process(reply: String, bot_user_id: &str) -> String {
    let reply = reply.replace(&format!("<@{bot_user_id}>"), "").replace(&format!("<@!{bot_user_id}>"), "");

    if reply.trim().is_empty() { EMPTY_REPLY.to_string() } else { reply.trim().to_string() }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::{prompts::ERROR_REPLY, types::Author},
        service::llm::{Completion, ProviderError},
        testing::{RecordingChat, ScriptedLlm, test_runtime},
    };

    fn inbound(id: &str, content: &str, mentions_bot: bool) -> InboundMessage {
        InboundMessage {
            id: id.to_string(),
            channel_id: "200".to_string(),
            guild_id: Some("300".to_string()),
            author: Author {
                id: "400".to_string(),
                username: "alice".to_string(),
                bot: false,
            },
            content: content.to_string(),
            mentions: if mentions_bot { vec![RecordingChat::BOT_USER_ID.to_string()] } else { Vec::new() },
            reply_to: None,
            created_at: Utc::now(),
        }
    }

    fn answer(text: &str) -> Result<Completion, ProviderError> {
        Ok(Completion {
            content: text.to_string(),
            tool_calls: Vec::new(),
        })
    }

    #[test]
    fn test_post_process() {
        assert_eq!(post_process("  ".to_string(), "1000"), EMPTY_REPLY);
        assert_eq!(post_process("<@1000> hi <@!1000>".to_string(), "1000"), "hi");
        assert_eq!(post_process("<@1000>".to_string(), "1000"), EMPTY_REPLY);
    }

    #[tokio::test]
    async fn test_ignored_and_disabled() {
        let (runtime, chat, _) = test_runtime(vec![]).await;

        let outcome = handle_chat_event_internal(&inbound("1", "just chatting", false), &runtime).await.unwrap();
        assert_eq!(outcome, ChatEventOutcome::Ignored);

        runtime.set_enabled(false);
        let outcome = handle_chat_event_internal(&inbound("2", "hey bot", true), &runtime).await.unwrap();
        assert_eq!(outcome, ChatEventOutcome::Disabled);

        assert!(chat.sent().is_empty());
    }

    #[tokio::test]
    async fn test_reply_is_sent_and_both_sides_are_stored() {
        let (runtime, chat, llm) = test_runtime(vec![answer("Hi <@1000> alice!")]).await;

        let outcome = handle_chat_event_internal(&inbound("1", "<@1000> hello", true), &runtime).await.unwrap();

        let ChatEventOutcome::Responded { sent } = outcome else { panic!("expected a response") };
        assert_eq!(sent.len(), 1);
        assert_eq!(chat.sent()[0].1, "Hi  alice!");

        let first_request = &llm.requests()[0];
        assert_eq!(first_request.messages.last().unwrap().content, "hello");

        let history = runtime.db.get_history("400", "200", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::Assistant);
        assert_eq!(history[0].id, sent[0]);
        assert_eq!(history[1].metadata["originalContent"], "<@1000> hello");
    }

    #[tokio::test]
    async fn test_replayed_message_is_a_duplicate() {
        let (runtime, chat, _) = test_runtime(vec![answer("first"), answer("second")]).await;
        let message = inbound("1", "<@1000> hello", true);

        handle_chat_event_internal(&message, &runtime).await.unwrap();
        let replay = handle_chat_event_internal(&message, &runtime).await.unwrap();

        assert_eq!(replay, ChatEventOutcome::Duplicate);
        assert_eq!(chat.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_sends_canned_reply() {
        let (runtime, chat, _) = test_runtime(vec![Err(ProviderError::Api {
            status: Some(500),
            message: "upstream".to_string(),
        })])
        .await;

        handle_chat_event_internal(&inbound("1", "<@1000> hello", true), &runtime).await.unwrap();

        assert_eq!(chat.sent()[0].1, ERROR_REPLY);
    }
}
