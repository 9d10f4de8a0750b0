//! Chat completions over the OpenAI wire format.
//!
//! Serves both OpenAI and xAI, which exposes an OpenAI-compatible API under its own base URL.

use std::sync::Arc;

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolChoiceOption, ChatCompletionToolType, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs, FunctionCall, FunctionObjectArgs,
    },
};
use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{ChatMessage, ChatRole, Completion, CompletionRequest, GenericLlmClient, LlmClient, ProviderError, ToolCall, ToolDescriptor};
use crate::base::types::LlmProvider;

// Extra methods on `LlmClient` applied by the openai implementation.

impl LlmClient {
    pub fn openai(api_key: &str, api_base: Option<&str>) -> Self {
        Self::new(Arc::new(OpenAiLlmClient::new(LlmProvider::OpenAi, api_key, api_base)))
    }

    pub fn xai(api_key: &str, api_base: &str) -> Self {
        Self::new(Arc::new(OpenAiLlmClient::new(LlmProvider::Xai, api_key, Some(api_base))))
    }
}

// Specific implementations.

/// Client for OpenAI-compatible chat completion APIs.
#[derive(Clone)]
pub struct OpenAiLlmClient {
    provider: LlmProvider,
    client: Client<OpenAIConfig>,
}

impl OpenAiLlmClient {
    #[instrument(name = "OpenAiLlmClient::new", skip_all)]
    pub fn new(provider: LlmProvider, api_key: &str, api_base: Option<&str>) -> Self {
        let mut cfg = OpenAIConfig::new().with_api_key(api_key);

        if let Some(base) = api_base {
            cfg = cfg.with_api_base(base);
        }

        Self {
            provider,
            client: Client::with_config(cfg),
        }
    }

    /// Builds the request body for one completion.
    #[allow(deprecated)]
    fn build_request(&self, request: &CompletionRequest) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let mut args = CreateChatCompletionRequestArgs::default();

        args.model(&request.model).messages(to_openai_messages(&request.messages)?).temperature(request.temperature);

        // xAI still documents `max_tokens`; OpenAI's newer models only accept `max_completion_tokens`.
        match self.provider {
            LlmProvider::Xai => args.max_tokens(request.max_tokens),
            _ => args.max_completion_tokens(request.max_tokens),
        };

        if !request.tools.is_empty() {
            args.tools(to_openai_tools(&request.tools)?).tool_choice(ChatCompletionToolChoiceOption::Auto);
        }

        args.build()
    }
}

#[async_trait]
impl GenericLlmClient for OpenAiLlmClient {
    fn provider(&self) -> LlmProvider {
        self.provider
    }

    #[instrument(name = "OpenAiLlmClient::complete", skip_all)]
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let body = self.build_request(&request).map_err(map_openai_error)?;

        let response = self.client.chat().create(body).await.map_err(map_openai_error)?;

        let choice = response.choices.into_iter().next().ok_or_else(|| ProviderError::Malformed("response contained no choices".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect::<Vec<_>>();

        debug!("Completion returned {} tool calls.", tool_calls.len());

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
        })
    }

    #[instrument(name = "OpenAiLlmClient::embed", skip_all)]
    async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, ProviderError> {
        if self.provider != LlmProvider::OpenAi {
            return Err(ProviderError::Unsupported(self.provider));
        }

        let request = CreateEmbeddingRequestArgs::default().model(model).input(input).build().map_err(map_openai_error)?;

        let response = self.client.embeddings().create(request).await.map_err(map_openai_error)?;

        response
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| ProviderError::Malformed("response contained no embedding".to_string()))
    }
}

// Helpers.

/// Converts the provider-neutral conversation into OpenAI request messages.
pub fn to_openai_messages(messages: &[ChatMessage]) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
    messages
        .iter()
        .map(|message| {
            let converted: ChatCompletionRequestMessage = match message.role {
                ChatRole::System => ChatCompletionRequestSystemMessageArgs::default().content(message.content.as_str()).build()?.into(),
                ChatRole::User => ChatCompletionRequestUserMessageArgs::default().content(message.content.as_str()).build()?.into(),
                ChatRole::Assistant => {
                    let mut args = ChatCompletionRequestAssistantMessageArgs::default();

                    if !message.content.is_empty() || message.tool_calls.is_empty() {
                        args.content(message.content.as_str());
                    }

                    if !message.tool_calls.is_empty() {
                        args.tool_calls(
                            message
                                .tool_calls
                                .iter()
                                .map(|call| ChatCompletionMessageToolCall {
                                    id: call.id.clone(),
                                    r#type: ChatCompletionToolType::Function,
                                    function: FunctionCall {
                                        name: call.name.clone(),
                                        arguments: call.arguments.clone(),
                                    },
                                })
                                .collect::<Vec<_>>(),
                        );
                    }

                    args.build()?.into()
                }
                ChatRole::Tool => ChatCompletionRequestToolMessageArgs::default()
                    .content(message.content.as_str())
                    .tool_call_id(message.tool_call_id.clone().unwrap_or_default())
                    .build()?
                    .into(),
            };

            Ok(converted)
        })
        .collect()
}

/// Converts tool descriptors into OpenAI function tools.
pub fn to_openai_tools(tools: &[ToolDescriptor]) -> Result<Vec<ChatCompletionTool>, OpenAIError> {
    tools
        .iter()
        .map(|tool| {
            ChatCompletionToolArgs::default()
                .r#type(ChatCompletionToolType::Function)
                .function(
                    FunctionObjectArgs::default()
                        .name(tool.name.as_str())
                        .description(tool.description.as_str())
                        .parameters(tool.parameters.clone())
                        .build()?,
                )
                .build()
        })
        .collect()
}

fn map_openai_error(err: OpenAIError) -> ProviderError {
    match err {
        OpenAIError::ApiError(api) => ProviderError::Api { status: None, message: api.message },
        OpenAIError::Reqwest(e) => match e.status() {
            Some(status) => ProviderError::Api {
                status: Some(status.as_u16()),
                message: e.to_string(),
            },
            None => ProviderError::Transport(e.to_string()),
        },
        OpenAIError::JSONDeserialize(e) => ProviderError::Malformed(e.to_string()),
        OpenAIError::InvalidArgument(message) => ProviderError::InvalidRequest(message),
        other => ProviderError::Transport(other.to_string()),
    }
}

// Tests.
