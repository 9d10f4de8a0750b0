//! Anthropic Messages API client.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use tracing::{debug, instrument, warn};

use super::{ChatMessage, ChatRole, Completion, CompletionRequest, GenericLlmClient, LlmClient, ProviderError, ToolCall, ToolDescriptor};
use crate::base::types::LlmProvider;

const ANTHROPIC_VERSION: &str = "2023-06-01";

// Extra methods on `LlmClient` applied by the anthropic implementation.

impl LlmClient {
    pub fn anthropic(api_key: &str, api_base: &str) -> Self {
        Self::new(Arc::new(AnthropicLlmClient::new(api_key, api_base)))
    }
}

// Wire types.

#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system: Option<String>,
    pub messages: Vec<AnthropicMessage>,
    pub tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize)]
pub struct AnthropicTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

// Specific implementations.

/// Client for the Anthropic Messages API.
#[derive(Clone)]
pub struct AnthropicLlmClient {
    http: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl AnthropicLlmClient {
    pub fn new(api_key: &str, api_base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GenericLlmClient for AnthropicLlmClient {
    fn provider(&self) -> LlmProvider {
        LlmProvider::Anthropic
    }

    #[instrument(name = "AnthropicLlmClient::complete", skip_all)]
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let body = build_request(&request);

        let response = self
            .http
            .post(format!("{}/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&text).map(|e| e.error.message).unwrap_or(text);
            warn!("Anthropic returned {}: {}", status, message);

            return Err(ProviderError::Api {
                status: Some(status.as_u16()),
                message,
            });
        }

        let parsed = serde_json::from_str::<MessagesResponse>(&text).map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let completion = parse_content(parsed.content);
        debug!("Completion returned {} tool calls.", completion.tool_calls.len());

        Ok(completion)
    }

    async fn embed(&self, _model: &str, _input: &str) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::Unsupported(LlmProvider::Anthropic))
    }
}

// Helpers.

/// Builds the request body.
///
/// System turns become the top-level `system` field and adjacent turns of the same role are merged.
/// Tool calls and results travel as `tool_use` / `tool_result` blocks only when the request
/// advertises tools; otherwise they are rendered as text, which the API accepts without `tools`.
pub fn build_request(request: &CompletionRequest) -> MessagesRequest {
    let system = request
        .messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let native_tools = !request.tools.is_empty();
    let mut tool_names = HashMap::new();
    let mut messages: Vec<AnthropicMessage> = Vec::new();

    for message in request.messages.iter().filter(|m| m.role != ChatRole::System) {
        for call in &message.tool_calls {
            tool_names.insert(call.id.as_str(), call.name.as_str());
        }

        let (role, blocks) = if native_tools { to_blocks(message) } else { to_text_blocks(message, &tool_names) };

        if blocks.is_empty() {
            continue;
        }

        match messages.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => messages.push(AnthropicMessage { role: role.to_string(), content: blocks }),
        }
    }

    let tools = native_tools.then(|| request.tools.iter().map(to_anthropic_tool).collect());

    MessagesRequest {
        model: request.model.clone(),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        system: (!system.is_empty()).then_some(system),
        messages,
        tools,
    }
}

fn to_blocks(message: &ChatMessage) -> (&'static str, Vec<ContentBlock>) {
    match message.role {
        ChatRole::Tool => (
            "user",
            vec![ContentBlock::ToolResult {
                tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                content: message.content.clone(),
            }],
        ),
        ChatRole::Assistant => {
            let mut blocks = Vec::new();

            if !message.content.is_empty() {
                blocks.push(ContentBlock::Text { text: message.content.clone() });
            }

            for call in &message.tool_calls {
                blocks.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: serde_json::from_str(&call.arguments).unwrap_or_else(|_| Value::Object(Default::default())),
                });
            }

            ("assistant", blocks)
        }
        _ => ("user", vec![ContentBlock::Text { text: message.content.clone() }]),
    }
}

/// Same as [`to_blocks`], with tool calls and results written out as text.
fn to_text_blocks(message: &ChatMessage, tool_names: &HashMap<&str, &str>) -> (&'static str, Vec<ContentBlock>) {
    match message.role {
        ChatRole::Tool => {
            let name = message.tool_call_id.as_deref().and_then(|id| tool_names.get(id)).copied().unwrap_or("tool");

            ("user", vec![ContentBlock::Text {
                text: format!("Result of `{name}`: {}", message.content),
            }])
        }
        ChatRole::Assistant => {
            let mut blocks = Vec::new();

            if !message.content.is_empty() {
                blocks.push(ContentBlock::Text { text: message.content.clone() });
            }

            for call in &message.tool_calls {
                blocks.push(ContentBlock::Text {
                    text: format!("Called `{}`({})", call.name, call.arguments),
                });
            }

            ("assistant", blocks)
        }
        _ => ("user", vec![ContentBlock::Text { text: message.content.clone() }]),
    }
}

fn to_anthropic_tool(tool: &ToolDescriptor) -> AnthropicTool {
    AnthropicTool {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: tool.parameters.clone(),
    }
}

fn parse_content(blocks: Vec<ContentBlock>) -> Completion {
    let mut text = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text: t } => text.push(t),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: input.to_string(),
            }),
            ContentBlock::ToolResult { .. } | ContentBlock::Unknown => {}
        }
    }

    Completion { content: text.join(""), tool_calls }
}

// Tests.
