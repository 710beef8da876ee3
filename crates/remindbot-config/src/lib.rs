use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Telegram transport settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token.
    #[serde(default)]
    pub bot_token: String,
}

/// Settings for the AI-assisted cron negotiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default)]
    pub api_key: String,
    /// OpenAI-compatible API root.
    #[serde(default = "default_assistant_base_url")]
    pub base_url: String,
    #[serde(default = "default_assistant_model")]
    pub model: String,
    /// Deadline for a single completion request. Must be shorter than
    /// `dispatch.event_timeout_secs`.
    #[serde(default = "default_assistant_timeout")]
    pub timeout_secs: u64,
    /// Upper bound, in bytes, of cached conversation history across all chats.
    #[serde(default = "default_cache_max_cost")]
    pub cache_max_cost: usize,
}

fn default_assistant_base_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_assistant_model() -> String {
    "deepseek-chat".to_string()
}

fn default_assistant_timeout() -> u64 {
    20
}

fn default_cache_max_cost() -> usize {
    1 << 20
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_assistant_base_url(),
            model: default_assistant_model(),
            timeout_secs: default_assistant_timeout(),
            cache_max_cost: default_cache_max_cost(),
        }
    }
}

/// Scheduling engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between scans for due jobs.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Inbound event dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Outer deadline applied to the handling of one inbound event.
    #[serde(default = "default_event_timeout")]
    pub event_timeout_secs: u64,
    /// How long shutdown waits for background tasks.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_event_timeout() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    10
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            event_timeout_secs: default_event_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

/// Top-level remindbot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemindBotConfig {
    /// Deployment environment ("dev" or "prod").
    #[serde(default = "default_env")]
    pub env: String,
    /// SQLite database file. Defaults to `~/.remindbot/remindbot.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub telegram: TelegramConfig,
    /// AI cron negotiation; disabled when absent or without an API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant: Option<AssistantConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

fn default_env() -> String {
    "dev".to_string()
}

impl Default for RemindBotConfig {
    fn default() -> Self {
        Self {
            env: default_env(),
            database_path: None,
            telegram: TelegramConfig::default(),
            assistant: None,
            engine: EngineConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl RemindBotConfig {
    pub fn is_dev(&self) -> bool {
        self.env.eq_ignore_ascii_case("dev")
    }

    /// Assistant settings, only when an API key is present.
    pub fn assistant(&self) -> Option<&AssistantConfig> {
        self.assistant
            .as_ref()
            .filter(|a| !a.api_key.trim().is_empty())
    }

    /// Bot token, failing if unset.
    pub fn bot_token(&self) -> Result<&str, ConfigError> {
        let token = self.telegram.bot_token.trim();
        if token.is_empty() {
            return Err(ConfigError::Missing("telegram.bot_token / TELEGRAM_BOT_TOKEN"));
        }
        Ok(token)
    }

    /// Check settings that depend on each other.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.event_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.event_timeout_secs must be at least 1".into(),
            ));
        }
        if let Some(assistant) = self.assistant() {
            if assistant.timeout_secs >= self.dispatch.event_timeout_secs {
                return Err(ConfigError::Invalid(format!(
                    "assistant.timeout_secs ({}) must be shorter than dispatch.event_timeout_secs ({})",
                    assistant.timeout_secs, self.dispatch.event_timeout_secs
                )));
            }
        }
        Ok(())
    }

    /// Resolve the database path, falling back to the config directory.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("remindbot.db")),
        }
    }

    /// Overlay environment variables on top of file settings.
    ///
    /// `lookup` is usually `std::env::var(..).ok()`; tests pass a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(env) = lookup("ENV") {
            self.env = env;
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(key) = lookup("DEEP_SEEK_API_KEY") {
            self.assistant.get_or_insert_with(AssistantConfig::default).api_key = key;
        }
        if let Some(url) = lookup("DEEP_SEEK_BASE_URL") {
            self.assistant.get_or_insert_with(AssistantConfig::default).base_url = url;
        }
    }
}

/// Resolve the remindbot config directory (~/.remindbot/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".remindbot"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.remindbot/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, then apply environment overrides.
pub fn load_config() -> Result<RemindBotConfig, ConfigError> {
    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<RemindBotConfig, ConfigError> {
    if dotenvy::dotenv().is_err() {
        tracing::debug!("No .env file found");
    }

    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        json5::from_str(&content)?
    } else {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        RemindBotConfig::default()
    };

    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
