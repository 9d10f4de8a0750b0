//! Test doubles shared by the unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    base::{
        config::{BotConfig, Config, ConfigInner},
        types::{LlmProvider, Res, Void},
    },
    runtime::Runtime,
    service::{
        chat::{ChatClient, GenericChatClient, InboundCallback},
        db::DbClient,
        llm::{Completion, CompletionRequest, GenericLlmClient, LlmClient, LlmGateway, ProviderError, ToolDescriptor},
        tools::{GenericToolExecutor, ToolCallContext, ToolExecutor, object_schema},
    },
};

/// An OpenAI stand-in that answers from a script and records every request.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    script: Arc<Mutex<VecDeque<Result<Completion, ProviderError>>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<Completion, ProviderError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            ..Default::default()
        }
    }

    pub fn gateway(&self, timeout: Duration) -> LlmGateway {
        LlmGateway::new(vec![LlmClient::new(Arc::new(self.clone()))], "text-embedding-3-small", timeout)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenericLlmClient for ScriptedLlm {
    fn provider(&self) -> LlmProvider {
        LlmProvider::OpenAi
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        self.requests.lock().unwrap().push(request);

        self.script.lock().unwrap().pop_front().unwrap_or_else(|| Err(ProviderError::Malformed("script exhausted".to_string())))
    }

    async fn embed(&self, _model: &str, _input: &str) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::Unsupported(LlmProvider::OpenAi))
    }
}

/// A chat client that records what it sends.
#[derive(Clone, Default)]
pub struct RecordingChat {
    sent: Arc<Mutex<Vec<(String, String, Option<String>)>>>,
    next_id: Arc<AtomicUsize>,
}

impl RecordingChat {
    pub const BOT_USER_ID: &'static str = "1000";

    /// `(channel_id, text, reply_to)` of every sent message.
    pub fn sent(&self) -> Vec<(String, String, Option<String>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenericChatClient for RecordingChat {
    fn bot_user_id(&self) -> &str {
        Self::BOT_USER_ID
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn start(&self, _on_message: InboundCallback) -> Void {
        Ok(())
    }

    async fn send_message(&self, channel_id: &str, text: &str, reply_to: Option<&str>) -> Res<String> {
        self.sent.lock().unwrap().push((channel_id.to_string(), text.to_string(), reply_to.map(str::to_string)));

        Ok(format!("9{:03}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn broadcast_typing(&self, _channel_id: &str) -> Void {
        Ok(())
    }
}

/// Two Discord-shaped tools with canned results.
pub struct StaticTools;

impl StaticTools {
    pub const NAMES: [&'static str; 2] = ["get_server_info", "list_channels"];

    pub fn executor() -> ToolExecutor {
        ToolExecutor::new(Arc::new(StaticTools))
    }
}

#[async_trait]
impl GenericToolExecutor for StaticTools {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        Self::NAMES
            .iter()
            .map(|name| ToolDescriptor {
                name: name.to_string(),
                description: format!("Canned {name}."),
                parameters: object_schema(json!({}), &[]),
            })
            .collect()
    }

    async fn execute(&self, name: &str, _arguments: &Value, _context: &ToolCallContext) -> Res<Value> {
        match name {
            "get_server_info" => Ok(json!({
                "success": true,
                "server": { "name": "Test Server", "member_count": 3, "channel_count": 2, "owner": "ferris" },
            })),
            "list_channels" => Ok(json!({
                "success": true,
                "count": 2,
                "channels": [{ "name": "general", "type": "text" }, { "name": "random", "type": "text" }],
            })),
            _ => Err(anyhow!("Unknown tool: {name}")),
        }
    }
}

/// A runtime over an in-memory database, a recording chat client and a scripted model.
pub async fn test_runtime(script: Vec<Result<Completion, ProviderError>>) -> (Runtime, RecordingChat, ScriptedLlm) {
    let config = Config::new(ConfigInner {
        openai_api_key: Some("test".to_string()),
        ..Default::default()
    });

    let bot = BotConfig {
        llm_provider: LlmProvider::OpenAi,
        llm_model: "gpt-test".to_string(),
        ..BotConfig::named("TestBot")
    };

    let chat = RecordingChat::default();
    let llm = ScriptedLlm::new(script);

    let runtime = Runtime {
        config,
        bot,
        db: DbClient::surreal_memory().await.unwrap(),
        llm: llm.gateway(Duration::from_secs(5)),
        chat: ChatClient::new(Arc::new(chat.clone())),
        tools: StaticTools::executor(),
        enabled: Arc::new(AtomicBool::new(true)),
    };

    (runtime, chat, llm)
}
