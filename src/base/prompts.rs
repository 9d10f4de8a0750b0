//! Prompt templates and canned replies.

use chrono::{DateTime, Utc};

use crate::base::config::BotConfig;

/// Personality used when a bot does not define one.
pub const DEFAULT_PERSONALITY: &str = "You are a helpful AI assistant.";

/// Sent when the provider did not answer within the call ceiling.
pub const TIMEOUT_REPLY: &str = "I'm experiencing a brief connection delay. Could you repeat that? I'm here and ready to help! 🤖";

/// Sent for any other provider failure.
pub const ERROR_REPLY: &str = "I'm having a technical moment. Please try again in a few seconds! 🔧";

/// Sent when the final answer came back blank.
pub const EMPTY_REPLY: &str = "I encountered an issue processing your request. Please try again.";

/// Fallback text when every tool in the round failed.
pub const TOOLS_FAILED_REPLY: &str = "I encountered some issues retrieving the information you requested. Please try again later.";

/// Header of the templated tool-results fallback.
pub const TOOL_RESULTS_HEADER: &str = "Here's what I found regarding your question:\n\n";

const CONTEXT_DIRECTIVE: &str = r#####"

**Context:**
- You are {bot_name} in a Discord server
- Current time: {now}
- Be helpful, concise, and engaging in your responses
- If you need to use tools, explain what you're doing briefly"#####;

const TOOLS_DIRECTIVE: &str = r#####"

**Available Tools:**
You have access to the following tools:
{tools}

Use these tools when appropriate to help users. Call tools by using the function calling capability."#####;

/// The user turn appended after tool results so the model answers in prose.
pub fn follow_up_directive(question: &str) -> String {
    format!("Based on the tool results, please provide a natural response to the user's question: {question}")
}

/// Builds the system prompt: the bot's personality, then the tools it may call, then the context block.
pub fn system_prompt<'a>(bot: &BotConfig, tools: impl IntoIterator<Item = (&'a str, &'a str)>, now: DateTime<Utc>) -> String {
    let mut prompt = bot.personality.clone();

    let tool_lines = tools.into_iter().map(|(name, description)| format!("- {name}: {description}")).collect::<Vec<_>>();

    if !tool_lines.is_empty() {
        prompt.push_str(&TOOLS_DIRECTIVE.replace("{tools}", &tool_lines.join("\n")));
    }

    prompt.push_str(&CONTEXT_DIRECTIVE.replace("{bot_name}", &bot.name).replace("{now}", &now.to_rfc3339()));

    prompt
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_lists_tools() {
        let bot = BotConfig::named("Helper");
        let prompt = system_prompt(&bot, [("list_channels", "List channels")], Utc::now());

        assert!(prompt.starts_with(DEFAULT_PERSONALITY));
        assert!(prompt.contains("- list_channels: List channels"));
        assert!(prompt.contains("You are Helper in a Discord server"));
    }

    #[test]
    fn test_system_prompt_without_tools() {
        let bot = BotConfig::named("Helper");
        let prompt = system_prompt(&bot, std::iter::empty(), Utc::now());

        assert!(!prompt.contains("Available Tools"));
    }
}
