//! Plain-text rendering of tool results, used when the follow-up completion fails.

use std::fmt::Write;

use serde_json::Value;

use super::round_trip::ToolCallResult;
use crate::base::prompts::{TOOL_RESULTS_HEADER, TOOLS_FAILED_REPLY};

const CHANNELS_SHOWN: usize = 10;
const MESSAGES_SHOWN: usize = 5;

/// Renders the successful tool results as a Discord-formatted summary.
///
/// Tools without a template are skipped. When no tool succeeded, a canned apology is returned.
pub fn format_tool_results_fallback(results: &[ToolCallResult]) -> String {
    if !results.iter().any(ToolCallResult::succeeded) {
        return TOOLS_FAILED_REPLY.to_string();
    }

    render(results).unwrap_or_else(|_| TOOLS_FAILED_REPLY.to_string())
}

fn render(results: &[ToolCallResult]) -> Result<String, std::fmt::Error> {
    let mut response = TOOL_RESULTS_HEADER.to_string();

    for result in results.iter().filter(|r| r.succeeded()) {
        let payload = &result.result;

        match result.tool_name.as_str() {
            "get_server_info" => write_server_info(&mut response, payload)?,
            "list_channels" => write_channels(&mut response, payload)?,
            "get_channel_history" => write_channel_history(&mut response, payload)?,
            "search_messages" => write_search_results(&mut response, payload)?,
            "get_user_info" => write_user_info(&mut response, payload)?,
            "get_conversation_history" => write_conversation_history(&mut response, payload)?,
            "search_documents" => write_documents(&mut response, payload)?,
            _ => {}
        }
    }

    Ok(response)
}

// Helpers.

fn text<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("Unknown")
}

fn items<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default()
}

fn number(value: &Value, key: &str, fallback: usize) -> String {
    value.get(key).filter(|v| !v.is_null()).map(|v| v.to_string()).unwrap_or_else(|| fallback.to_string())
}

/// Truncates to `max` characters, appending an ellipsis when anything was cut.
fn excerpt(content: &str, max: usize) -> String {
    match content.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &content[..end]),
        None => content.to_string(),
    }
}

fn write_server_info(out: &mut String, payload: &Value) -> std::fmt::Result {
    let server = payload.get("server").unwrap_or(&Value::Null);

    writeln!(out, "📊 **Server Information:**")?;
    writeln!(out, "• Server: **{}**", text(server, "name"))?;
    writeln!(out, "• Members: {}", number(server, "member_count", 0))?;
    writeln!(out, "• Channels: {}", number(server, "channel_count", 0))?;
    writeln!(out, "• Owner: {}\n", text(server, "owner"))
}

fn write_channels(out: &mut String, payload: &Value) -> std::fmt::Result {
    let channels = items(payload, "channels");

    writeln!(out, "📋 **Available Channels ({}):**", number(payload, "count", channels.len()))?;

    for channel in channels.iter().take(CHANNELS_SHOWN) {
        writeln!(out, "• #{} ({})", text(channel, "name"), text(channel, "type"))?;
    }

    if channels.len() > CHANNELS_SHOWN {
        writeln!(out, "• ... and {} more channels", channels.len() - CHANNELS_SHOWN)?;
    }

    writeln!(out)
}

fn write_channel_history(out: &mut String, payload: &Value) -> std::fmt::Result {
    let messages = items(payload, "messages");

    writeln!(out, "💬 **Recent Messages in #{} ({} messages):**", text(payload, "channel"), messages.len())?;

    for message in messages.iter().take(MESSAGES_SHOWN) {
        writeln!(out, "• {}: {}", text(message, "author"), excerpt(text(message, "content"), 100))?;
    }

    writeln!(out)
}

fn write_search_results(out: &mut String, payload: &Value) -> std::fmt::Result {
    let found = items(payload, "results");

    writeln!(out, "🔍 **Search Results for '{}' ({} found):**", text(payload, "query"), number(payload, "count", found.len()))?;

    for message in found.iter().take(MESSAGES_SHOWN) {
        writeln!(out, "• **#{}** - {}: {}", text(message, "channel"), text(message, "author"), excerpt(text(message, "content"), 150))?;
    }

    writeln!(out)
}

fn write_user_info(out: &mut String, payload: &Value) -> std::fmt::Result {
    let user = payload.get("user").unwrap_or(&Value::Null);

    writeln!(out, "👤 **User Information:**")?;
    writeln!(out, "• User: **{}** ({})", text(user, "display_name"), text(user, "username"))?;
    writeln!(out, "• Bot: {}", if user.get("bot").and_then(Value::as_bool).unwrap_or(false) { "yes" } else { "no" })?;
    writeln!(out, "• Joined Discord: {}\n", text(user, "created_at"))
}

fn write_conversation_history(out: &mut String, payload: &Value) -> std::fmt::Result {
    let messages = items(payload, "messages");

    writeln!(out, "🗂️ **Our Recent Conversation ({} messages):**", messages.len())?;

    for message in messages.iter().rev().take(MESSAGES_SHOWN).rev() {
        writeln!(out, "• {}: {}", text(message, "username"), excerpt(text(message, "content"), 100))?;
    }

    writeln!(out)
}

fn write_documents(out: &mut String, payload: &Value) -> std::fmt::Result {
    let documents = items(payload, "documents");

    writeln!(out, "📚 **Documents matching '{}' ({} found):**", text(payload, "query"), documents.len())?;

    for document in documents.iter().take(MESSAGES_SHOWN) {
        writeln!(out, "• {}", excerpt(text(document, "content"), 150))?;
    }

    writeln!(out)
}

// Tests.

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn result(tool_name: &str, result: Value) -> ToolCallResult {
        ToolCallResult {
            call_id: format!("call_{tool_name}"),
            tool_name: tool_name.to_string(),
            arguments: json!({}),
            result,
        }
    }

    #[test]
    fn test_all_failed() {
        let results = vec![result("list_channels", json!({ "error": "Guild not found" }))];

        assert_eq!(format_tool_results_fallback(&results), TOOLS_FAILED_REPLY);
        assert_eq!(format_tool_results_fallback(&[]), TOOLS_FAILED_REPLY);
    }

    #[test]
    fn test_untemplated_tool_is_skipped() {
        let results = vec![result("read_file", json!({ "success": true, "content": "hello" }))];

        assert_eq!(format_tool_results_fallback(&results), TOOL_RESULTS_HEADER);
    }

    #[test]
    fn test_server_info_and_channels() {
        let channels = (0..12).map(|i| json!({ "name": format!("chan-{i}"), "type": "text" })).collect::<Vec<_>>();

        let results = vec![
            result(
                "get_server_info",
                json!({ "success": true, "server": { "name": "Rustaceans", "member_count": 42, "channel_count": 12, "owner": "ferris" } }),
            ),
            result("list_channels", json!({ "success": true, "count": 12, "channels": channels })),
            result("get_user_info", json!({ "error": "Unknown user" })),
        ];

        let text = format_tool_results_fallback(&results);

        assert!(text.starts_with(TOOL_RESULTS_HEADER));
        assert!(text.contains("• Server: **Rustaceans**\n• Members: 42\n• Channels: 12\n• Owner: ferris\n\n"));
        assert!(text.contains("📋 **Available Channels (12):**\n• #chan-0 (text)\n"));
        assert!(text.contains("• #chan-9 (text)\n• ... and 2 more channels\n"));
        assert!(!text.contains("chan-10"));
        assert!(!text.contains("User Information"));
    }

    #[test]
    fn test_history_and_search_truncate_content() {
        let long = "x".repeat(160);

        let results = vec![
            result(
                "get_channel_history",
                json!({ "success": true, "channel": "general", "messages": [{ "author": "alice", "content": long }] }),
            ),
            result(
                "search_messages",
                json!({ "success": true, "query": "xx", "count": 1, "results": [{ "channel": "general", "author": "alice", "content": long }] }),
            ),
        ];

        let text = format_tool_results_fallback(&results);

        assert!(text.contains(&format!("💬 **Recent Messages in #general (1 messages):**\n• alice: {}...\n", "x".repeat(100))));
        assert!(text.contains(&format!("🔍 **Search Results for 'xx' (1 found):**\n• **#general** - alice: {}...\n", "x".repeat(150))));
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo", 2), "hé...");
        assert_eq!(excerpt("short", 10), "short");
    }
}
