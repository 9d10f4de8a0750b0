//! One completion, optionally followed by a single round of tool calls.
//!
//! ```text
//! AwaitingFirstResponse --(no tool calls)--------------------------> Done(Answer)
//! AwaitingFirstResponse --(tool calls)--> AwaitingToolFollowup ----> Done(Answer | Fallback)
//! AwaitingFirstResponse --(provider error)-------------------------> Done(Failed)
//! ```
//!
//! Tools are never offered on the follow-up, so a round trip makes at most two completions.

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use super::fallback::format_tool_results_fallback;
use crate::{
    base::prompts,
    service::{
        llm::{ChatMessage, Completion, GenerationSettings, LlmGateway, ProviderError, ToolCall, ToolDescriptor},
        tools::{ToolCallContext, ToolExecutor},
    },
};

// Types.

/// A tool call and the payload it produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub result: Value,
}

impl ToolCallResult {
    pub fn succeeded(&self) -> bool {
        self.result.get("success").and_then(Value::as_bool).unwrap_or(false)
    }
}

/// How a round trip ended.
#[derive(Debug)]
pub enum RoundTripOutcome {
    /// The model's own answer.
    Answer { content: String, tool_results: Vec<ToolCallResult> },
    /// The follow-up failed; `content` is rendered from the tool results.
    Fallback { content: String, tool_results: Vec<ToolCallResult> },
    /// The first completion failed.
    Failed(ProviderError),
}

impl RoundTripOutcome {
    pub fn tool_results(&self) -> &[ToolCallResult] {
        match self {
            Self::Answer { tool_results, .. } | Self::Fallback { tool_results, .. } => tool_results,
            Self::Failed(_) => &[],
        }
    }

    /// The text to send to the user.
    pub fn into_text(self) -> String {
        match self {
            Self::Answer { content, .. } | Self::Fallback { content, .. } => content,
            Self::Failed(err) => err.user_message().to_string(),
        }
    }
}

enum RoundTripState {
    AwaitingFirstResponse,
    AwaitingToolFollowup { completion: Completion },
    Done(RoundTripOutcome),
}

// Structs.

/// Drives a single round trip for one inbound message.
pub struct RoundTrip<'a> {
    pub llm: &'a LlmGateway,
    pub settings: &'a GenerationSettings,
    /// `None` disables tool calling.
    pub tools: Option<&'a ToolExecutor>,
    pub call_context: &'a ToolCallContext,
}

impl RoundTrip<'_> {
    /// Runs the round trip over `context`; `question` is the user's cleaned message.
    #[instrument(skip_all)]
    pub async fn run(&self, context: &[ChatMessage], question: &str) -> RoundTripOutcome {
        let descriptors = self.tools.map(|t| t.descriptors()).filter(|d| !d.is_empty());

        let mut state = RoundTripState::AwaitingFirstResponse;

        loop {
            state = match state {
                RoundTripState::AwaitingFirstResponse => self.first_response(context, descriptors.as_deref()).await,
                RoundTripState::AwaitingToolFollowup { completion } => self.tool_followup(context, question, completion).await,
                RoundTripState::Done(outcome) => return outcome,
            };
        }
    }

    async fn first_response(&self, context: &[ChatMessage], descriptors: Option<&[ToolDescriptor]>) -> RoundTripState {
        match self.llm.complete(self.settings, context, descriptors).await {
            Ok(completion) if completion.tool_calls.is_empty() => RoundTripState::Done(RoundTripOutcome::Answer {
                content: completion.content,
                tool_results: Vec::new(),
            }),
            Ok(completion) => RoundTripState::AwaitingToolFollowup { completion },
            Err(err) => {
                warn!("First completion failed: {}", err);
                RoundTripState::Done(RoundTripOutcome::Failed(err))
            }
        }
    }

    async fn tool_followup(&self, context: &[ChatMessage], question: &str, completion: Completion) -> RoundTripState {
        info!("Model requested {} tool call(s).", completion.tool_calls.len());

        let mut tool_results = Vec::with_capacity(completion.tool_calls.len());

        for call in &completion.tool_calls {
            tool_results.push(self.execute(call).await);
        }

        let mut followup = context.to_vec();
        followup.push(ChatMessage::assistant_tool_calls(completion.content, completion.tool_calls));
        followup.extend(tool_results.iter().map(|r| ChatMessage::tool(&r.call_id, r.result.to_string())));
        followup.push(ChatMessage::user(prompts::follow_up_directive(question)));

        let outcome = match self.llm.complete(self.settings, &followup, None).await {
            Ok(answer) if !answer.content.trim().is_empty() => RoundTripOutcome::Answer {
                content: answer.content,
                tool_results,
            },
            Ok(_) => {
                warn!("Follow-up completion was empty; formatting tool results directly.");
                RoundTripOutcome::Fallback {
                    content: format_tool_results_fallback(&tool_results),
                    tool_results,
                }
            }
            Err(err) => {
                warn!("Follow-up completion failed ({}); formatting tool results directly.", err);
                RoundTripOutcome::Fallback {
                    content: format_tool_results_fallback(&tool_results),
                    tool_results,
                }
            }
        };

        RoundTripState::Done(outcome)
    }

    /// Executes one call. Failures become `{"error": ...}` payloads.
    async fn execute(&self, call: &ToolCall) -> ToolCallResult {
        let arguments = match serde_json::from_str::<Value>(&call.arguments) {
            Ok(value @ Value::Object(_)) => value,
            _ => json!({}),
        };

        let result = match self.tools {
            Some(tools) => tools.execute(&call.name, &arguments, self.call_context).await,
            None => Err(anyhow::anyhow!("Unknown tool: {}", call.name)),
        };

        let result = result.unwrap_or_else(|err| {
            warn!("Tool `{}` failed: {}", call.name, err);
            json!({ "error": err.to_string() })
        });

        ToolCallResult {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments,
            result,
        }
    }
}

// Tests.
