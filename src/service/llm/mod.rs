pub mod anthropic;
pub mod openai;

use std::{ops::Deref, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::base::{
    config::{BotConfig, Config},
    prompts,
    types::LlmProvider,
};

// Types.

/// Role of a turn in a provider conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Arguments as the raw JSON string the provider returned.
    pub arguments: String,
}

/// One turn of a provider conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    /// An assistant turn that carries the tool calls it requested.
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(ChatRole::Assistant, content)
        }
    }

    /// The result of one tool call, answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(ChatRole::Tool, content)
        }
    }
}

/// A tool advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool arguments.
    pub parameters: Value,
}

/// A fully-resolved completion request for one provider client.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDescriptor>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// What the model answered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Which model to call, and how.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub provider: LlmProvider,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl From<&BotConfig> for GenerationSettings {
    fn from(bot: &BotConfig) -> Self {
        Self {
            provider: bot.llm_provider,
            model: bot.llm_model.clone(),
            max_tokens: bot.max_tokens,
            temperature: bot.temperature,
        }
    }
}

// Errors.

/// Failure of a provider call.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),

    #[error("LLM provider `{0}` is not configured")]
    NotConfigured(LlmProvider),

    #[error("LLM provider `{0}` does not support this operation")]
    Unsupported(LlmProvider),

    #[error("LLM API error (status {status:?}): {message}")]
    Api { status: Option<u16>, message: String },

    #[error("LLM transport error: {0}")]
    Transport(String),

    #[error("LLM response could not be understood: {0}")]
    Malformed(String),

    #[error("LLM request could not be built: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Returns the canned reply that is sent to the chat in place of an answer.
    pub fn user_message(&self) -> &'static str {
        match self {
            ProviderError::Timeout(_) => prompts::TIMEOUT_REPLY,
            _ => prompts::ERROR_REPLY,
        }
    }
}

// Traits.

/// Generic LLM client trait that clients must implement.
///
/// One implementation exists per provider wire format; the gateway selects among them.
#[async_trait]
pub trait GenericLlmClient: Send + Sync + 'static {
    /// The provider this client speaks to.
    fn provider(&self) -> LlmProvider;

    /// Runs one chat completion.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;

    /// Embeds `input` with the given embedding model.
    async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, ProviderError>;
}

// Structs.

/// LLM client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct LlmClient {
    inner: Arc<dyn GenericLlmClient>,
}

impl Deref for LlmClient {
    type Target = dyn GenericLlmClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl LlmClient {
    pub fn new(inner: Arc<dyn GenericLlmClient>) -> Self {
        Self { inner }
    }
}

/// Routes completions to the configured provider clients.
///
/// The set of providers is decided once, at construction.
#[derive(Clone)]
pub struct LlmGateway {
    inner: Arc<LlmGatewayInner>,
}

struct LlmGatewayInner {
    openai: Option<LlmClient>,
    anthropic: Option<LlmClient>,
    xai: Option<LlmClient>,
    embedding_model: String,
    timeout: Duration,
}

impl LlmGateway {
    /// Builds the gateway from the API keys present in the configuration.
    pub fn from_config(config: &Config) -> Self {
        let openai = config.openai_api_key.as_deref().map(|key| LlmClient::openai(key, config.openai_api_base.as_deref()));
        let anthropic = config.anthropic_api_key.as_deref().map(|key| LlmClient::anthropic(key, &config.anthropic_api_base));
        let xai = config.xai_api_key.as_deref().map(|key| LlmClient::xai(key, &config.xai_api_base));

        let gateway = Self::new(
            [openai, anthropic, xai].into_iter().flatten().collect(),
            &config.embedding_model,
            Duration::from_secs(config.llm_timeout_secs),
        );

        info!("Configured LLM providers: {:?}", gateway.providers());

        gateway
    }

    /// Builds a gateway over explicit clients; a later client for the same provider wins.
    pub fn new(clients: Vec<LlmClient>, embedding_model: &str, timeout: Duration) -> Self {
        let mut inner = LlmGatewayInner {
            openai: None,
            anthropic: None,
            xai: None,
            embedding_model: embedding_model.to_string(),
            timeout,
        };

        for client in clients {
            match client.provider() {
                LlmProvider::OpenAi => inner.openai = Some(client),
                LlmProvider::Anthropic => inner.anthropic = Some(client),
                LlmProvider::Xai => inner.xai = Some(client),
            }
        }

        Self { inner: Arc::new(inner) }
    }

    /// The providers with a client.
    pub fn providers(&self) -> Vec<LlmProvider> {
        [LlmProvider::OpenAi, LlmProvider::Anthropic, LlmProvider::Xai].into_iter().filter(|p| self.client(*p).is_ok()).collect()
    }

    pub fn has(&self, provider: LlmProvider) -> bool {
        self.client(provider).is_ok()
    }

    fn client(&self, provider: LlmProvider) -> Result<&LlmClient, ProviderError> {
        let client = match provider {
            LlmProvider::OpenAi => self.inner.openai.as_ref(),
            LlmProvider::Anthropic => self.inner.anthropic.as_ref(),
            LlmProvider::Xai => self.inner.xai.as_ref(),
        };

        client.ok_or(ProviderError::NotConfigured(provider))
    }

    /// Runs one completion against the provider named in `settings`.
    ///
    /// The call is bounded by the configured timeout and is never retried.
    #[instrument(skip_all, fields(provider = %settings.provider, model = %settings.model))]
    pub async fn complete(&self, settings: &GenerationSettings, messages: &[ChatMessage], tools: Option<&[ToolDescriptor]>) -> Result<Completion, ProviderError> {
        let client = self.client(settings.provider)?;

        let request = CompletionRequest {
            model: settings.model.clone(),
            messages: messages.to_vec(),
            tools: tools.map(<[ToolDescriptor]>::to_vec).unwrap_or_default(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        };

        match tokio::time::timeout(self.inner.timeout, client.complete(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("LLM call timed out after {:?}.", self.inner.timeout);
                Err(ProviderError::Timeout(self.inner.timeout))
            }
        }
    }

    /// Embeds `input` with the configured embedding model (OpenAI only).
    #[instrument(skip_all)]
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        let client = self.client(LlmProvider::OpenAi)?;

        tokio::time::timeout(self.inner.timeout, client.embed(&self.inner.embedding_model, input))
            .await
            .map_err(|_| ProviderError::Timeout(self.inner.timeout))?
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowClient;

    #[async_trait]
    impl GenericLlmClient for SlowClient {
        fn provider(&self) -> LlmProvider {
            LlmProvider::Anthropic
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<Completion, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Completion::default())
        }

        async fn embed(&self, _model: &str, _input: &str) -> Result<Vec<f32>, ProviderError> {
            Err(ProviderError::Unsupported(LlmProvider::Anthropic))
        }
    }

    struct EchoClient;

    #[async_trait]
    impl GenericLlmClient for EchoClient {
        fn provider(&self) -> LlmProvider {
            LlmProvider::Xai
        }

        async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
            Ok(Completion {
                content: format!("{}:{}:{}", request.model, request.messages.len(), request.tools.len()),
                tool_calls: Vec::new(),
            })
        }

        async fn embed(&self, _model: &str, _input: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(vec![1.0])
        }
    }

    fn settings(provider: LlmProvider) -> GenerationSettings {
        GenerationSettings {
            provider,
            model: "test-model".to_string(),
            max_tokens: 100,
            temperature: 0.7,
        }
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let gateway = LlmGateway::new(vec![LlmClient::new(Arc::new(EchoClient))], "embed", Duration::from_secs(1));

        let result = gateway.complete(&settings(LlmProvider::OpenAi), &[ChatMessage::user("hi")], None).await;

        assert!(matches!(result, Err(ProviderError::NotConfigured(LlmProvider::OpenAi))));
        assert_eq!(gateway.providers(), vec![LlmProvider::Xai]);
        assert!(matches!(gateway.embed("hi").await, Err(ProviderError::NotConfigured(LlmProvider::OpenAi))));
    }

    #[tokio::test]
    async fn test_routes_to_provider() {
        let gateway = LlmGateway::new(vec![LlmClient::new(Arc::new(EchoClient))], "embed", Duration::from_secs(1));
        let tools = vec![ToolDescriptor {
            name: "t".to_string(),
            description: "d".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        }];

        let completion = gateway
            .complete(&settings(LlmProvider::Xai), &[ChatMessage::system("s"), ChatMessage::user("hi")], Some(&tools))
            .await
            .unwrap();

        assert_eq!(completion.content, "test-model:2:1");
    }

    #[tokio::test]
    async fn test_timeout_maps_to_canned_reply() {
        let gateway = LlmGateway::new(vec![LlmClient::new(Arc::new(SlowClient))], "embed", Duration::from_millis(50));

        let err = gateway.complete(&settings(LlmProvider::Anthropic), &[ChatMessage::user("hi")], None).await.unwrap_err();

        assert!(matches!(err, ProviderError::Timeout(_)));
        assert_eq!(err.user_message(), prompts::TIMEOUT_REPLY);
        assert_eq!(ProviderError::Transport("boom".into()).user_message(), prompts::ERROR_REPLY);
    }
}
