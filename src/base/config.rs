//! Load configuration via `config` crate with env-override support.

use std::{collections::BTreeSet, ops::Deref, path::PathBuf, sync::Arc};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::base::prompts;

use super::types::{LlmProvider, Res};

/// Default bot to run.
fn default_bot_name() -> String {
    "SuperAgent".to_string()
}

/// Default bot personality.
fn default_personality() -> String {
    prompts::DEFAULT_PERSONALITY.to_string()
}

fn default_llm_provider() -> LlmProvider {
    LlmProvider::Xai
}

fn default_llm_model() -> String {
    "grok-4-latest".to_string()
}

/// Default number of prior messages fetched for context.
fn default_max_context_messages() -> usize {
    15
}

fn default_true() -> bool {
    true
}

/// Default sampling temperature.
fn default_temperature() -> f32 {
    0.7
}

/// Default max output tokens.
fn default_max_tokens() -> u32 {
    1500
}

fn default_anthropic_api_base() -> String {
    "https://api.anthropic.com/v1".to_string()
}

fn default_xai_api_base() -> String {
    "https://api.x.ai/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Default ceiling for a single LLM call, in seconds.
fn default_llm_timeout_secs() -> u64 {
    30
}

fn default_db_endpoint() -> String {
    "memory".to_string()
}

fn default_db_namespace() -> String {
    "botforge".to_string()
}

fn default_db_database() -> String {
    "botforge".to_string()
}

fn default_http_bind() -> String {
    "0.0.0.0:5001".to_string()
}

/// Default maximum characters per outbound chat message.
fn default_discord_message_limit() -> usize {
    1900
}

fn default_mcp_config_path() -> String {
    ".hidden/mcp.json".to_string()
}

/// Configuration of a single bot persona.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BotConfig {
    /// Display name of the bot (`bots[].name`).
    pub name: String,
    /// Personality used as the base of the system prompt.
    #[serde(default = "default_personality")]
    pub personality: String,
    /// Which provider answers for this bot.
    #[serde(default = "default_llm_provider")]
    pub llm_provider: LlmProvider,
    /// The model name passed to the provider.
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    /// Case-insensitive words that trigger a response.
    #[serde(default)]
    pub trigger_words: BTreeSet<String>,
    /// How many prior messages to fetch from history.
    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: usize,
    /// Whether the bot answers at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Sampling temperature, between 0 and 2.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Max output tokens per completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Whether tool descriptors are advertised to the model.
    #[serde(default = "default_true")]
    pub tools_enabled: bool,
    /// Whether messages authored by other bots can trigger a response.
    #[serde(default)]
    pub respond_to_bots: bool,
}

impl BotConfig {
    /// A bot with the given name and every other field at its default.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            personality: default_personality(),
            llm_provider: default_llm_provider(),
            llm_model: default_llm_model(),
            trigger_words: BTreeSet::new(),
            max_context_messages: default_max_context_messages(),
            enabled: true,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            tools_enabled: true,
            respond_to_bots: false,
        }
    }
}

/// Configuration for the botforge application.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfigInner {
    /// Discord bot token (`BOTFORGE_DISCORD_TOKEN`).
    #[serde(default)]
    pub discord_token: String,
    /// Name of the bot from `bots` to run (`BOTFORGE_BOT_NAME`).
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    /// Bot personas, usually from the TOML file (`[[bots]]`).
    #[serde(default)]
    pub bots: Vec<BotConfig>,
    /// OpenAI API key (`BOTFORGE_OPENAI_API_KEY`).
    #[serde(default)]
    pub openai_api_key: Option<String>,
    /// Optional OpenAI-compatible API base override (`BOTFORGE_OPENAI_API_BASE`).
    #[serde(default)]
    pub openai_api_base: Option<String>,
    /// Anthropic API key (`BOTFORGE_ANTHROPIC_API_KEY`).
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    /// Anthropic API base (`BOTFORGE_ANTHROPIC_API_BASE`).
    #[serde(default = "default_anthropic_api_base")]
    pub anthropic_api_base: String,
    /// xAI API key (`BOTFORGE_XAI_API_KEY`).
    #[serde(default)]
    pub xai_api_key: Option<String>,
    /// xAI API base (`BOTFORGE_XAI_API_BASE`).
    #[serde(default = "default_xai_api_base")]
    pub xai_api_base: String,
    /// Embedding model for the vector store (`BOTFORGE_EMBEDDING_MODEL`).
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Ceiling for a single LLM call (`BOTFORGE_LLM_TIMEOUT_SECS`).
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    /// Database endpoint URL, or `memory` (`BOTFORGE_DB_ENDPOINT`).
    #[serde(default = "default_db_endpoint")]
    pub db_endpoint: String,
    /// Database username (`BOTFORGE_DB_USERNAME`).
    #[serde(default)]
    pub db_username: Option<String>,
    /// Database password (`BOTFORGE_DB_PASSWORD`).
    #[serde(default)]
    pub db_password: Option<String>,
    /// Database namespace (`BOTFORGE_DB_NAMESPACE`).
    #[serde(default = "default_db_namespace")]
    pub db_namespace: String,
    /// Database name (`BOTFORGE_DB_DATABASE`).
    #[serde(default = "default_db_database")]
    pub db_database: String,
    /// Bind address of the management HTTP server (`BOTFORGE_HTTP_BIND`).
    #[serde(default = "default_http_bind")]
    pub http_bind: String,
    /// Maximum characters per outbound message (`BOTFORGE_DISCORD_MESSAGE_LIMIT`).
    #[serde(default = "default_discord_message_limit")]
    pub discord_message_limit: usize,
    /// Path of the `mcp.json` listing remote tool servers (`BOTFORGE_MCP_CONFIG_PATH`).
    #[serde(default = "default_mcp_config_path")]
    pub mcp_config_path: String,
    /// Directories the filesystem tools may touch (`BOTFORGE_FILESYSTEM_ROOTS`, comma separated).
    #[serde(default)]
    pub filesystem_roots: Vec<PathBuf>,
}

impl Default for ConfigInner {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            bot_name: default_bot_name(),
            bots: Vec::new(),
            openai_api_key: None,
            openai_api_base: None,
            anthropic_api_key: None,
            anthropic_api_base: default_anthropic_api_base(),
            xai_api_key: None,
            xai_api_base: default_xai_api_base(),
            embedding_model: default_embedding_model(),
            llm_timeout_secs: default_llm_timeout_secs(),
            db_endpoint: default_db_endpoint(),
            db_username: None,
            db_password: None,
            db_namespace: default_db_namespace(),
            db_database: default_db_database(),
            http_bind: default_http_bind(),
            discord_message_limit: default_discord_message_limit(),
            mcp_config_path: default_mcp_config_path(),
            filesystem_roots: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(explicit_path: Option<&std::path::Path>) -> Res<Self> {
        let mut cfg = config::Config::builder();

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        cfg = cfg.add_source(environment());

        let result = Config {
            inner: Arc::new(cfg.build()?.try_deserialize()?),
        };

        result.validate()?;

        Ok(result)
    }

    pub fn new(inner: ConfigInner) -> Self {
        Self { inner: Arc::new(inner) }
    }

    /// Checks value ranges and that the selected bot can be resolved.
    pub fn validate(&self) -> Res<()> {
        if !(100..=2000).contains(&self.discord_message_limit) {
            return Err(anyhow!("Discord message limit must be between 100 and 2000."));
        }

        if self.llm_timeout_secs == 0 {
            return Err(anyhow!("LLM timeout must be at least one second."));
        }

        for bot in &self.bots {
            if !(0.0..=2.0).contains(&bot.temperature) {
                return Err(anyhow!("Temperature for bot `{}` must be between 0 and 2.", bot.name));
            }

            if bot.max_tokens < 1 || bot.max_tokens > 128000 {
                return Err(anyhow!("Max tokens for bot `{}` must be between 1 and 128000.", bot.name));
            }
        }

        self.bot()?;

        Ok(())
    }

    /// Resolves the bot selected by `bot_name`.
    ///
    /// When no bots are configured, a default persona named `bot_name` is used.
    pub fn bot(&self) -> Res<BotConfig> {
        if self.bots.is_empty() {
            return Ok(BotConfig::named(&self.bot_name));
        }

        self.bots
            .iter()
            .find(|b| b.name.eq_ignore_ascii_case(&self.bot_name))
            .cloned()
            .ok_or_else(|| anyhow!("Bot `{}` is not configured.", self.bot_name))
    }

    /// Whether the database should run on the in-memory engine.
    pub fn db_in_memory(&self) -> bool {
        self.db_endpoint == "memory" || self.db_endpoint.starts_with("mem://")
    }
}

/// Environment overrides, e.g. `BOTFORGE_DISCORD_TOKEN` or `BOTFORGE_FILESYSTEM_ROOTS=/srv/a,/srv/b`.
fn environment() -> config::Environment {
    config::Environment::with_prefix("BOTFORGE").try_parsing(true).list_separator(",").with_list_parse_key("filesystem_roots")
}

// Tests.

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_bots_from_toml() {
        let file = write_config(
            r#"
            discord_token = "token"
            bot_name = "helper"

            [[bots]]
            name = "Helper"
            llm_provider = "openai"
            llm_model = "gpt-4o-mini"
            trigger_words = ["help", "Helper"]
            max_context_messages = 10
            "#,
        );

        let config = Config::load(Some(file.path())).unwrap();
        let bot = config.bot().unwrap();

        assert_eq!(bot.name, "Helper");
        assert_eq!(bot.llm_provider, LlmProvider::OpenAi);
        assert_eq!(bot.max_context_messages, 10);
        assert_eq!(bot.temperature, 0.7);
        assert_eq!(bot.max_tokens, 1500);
        assert!(bot.enabled);
        assert!(bot.tools_enabled);
        assert!(!bot.respond_to_bots);
        assert_eq!(config.discord_message_limit, 1900);
        assert_eq!(config.xai_api_base, "https://api.x.ai/v1");
    }

    #[test]
    fn test_unknown_bot_is_rejected() {
        let file = write_config(
            r#"
            bot_name = "ghost"

            [[bots]]
            name = "Helper"
            "#,
        );

        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_temperature_out_of_range_is_rejected() {
        let mut bot = BotConfig::named("SuperAgent");
        bot.temperature = 2.5;

        let config = Config::new(ConfigInner { bots: vec![bot], ..Default::default() });

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_message_limit_out_of_range_is_rejected() {
        let config = Config::new(ConfigInner { discord_message_limit: 4000, ..Default::default() });

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let vars = [
            ("BOTFORGE_FILESYSTEM_ROOTS", "/srv/docs,/srv/code"),
            ("BOTFORGE_DISCORD_TOKEN", "abc.def"),
            ("BOTFORGE_DISCORD_MESSAGE_LIMIT", "1500"),
            ("BOTFORGE_BOT_NAME", "Helper"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<config::Map<_, _>>();

        let inner: ConfigInner = config::Config::builder().add_source(environment().source(Some(vars))).build().unwrap().try_deserialize().unwrap();

        assert_eq!(inner.filesystem_roots, vec![PathBuf::from("/srv/docs"), PathBuf::from("/srv/code")]);
        assert_eq!(inner.discord_token, "abc.def");
        assert_eq!(inner.discord_message_limit, 1500);
        assert_eq!(inner.bot_name, "Helper");
    }

    #[test]
    fn test_default_bot_when_none_configured() {
        let config = Config::new(ConfigInner::default());
        let bot = config.bot().unwrap();

        assert_eq!(bot.name, "SuperAgent");
        assert_eq!(bot.llm_provider, LlmProvider::Xai);
        assert_eq!(bot.max_context_messages, 15);
        assert!(config.db_in_memory());
    }
}
