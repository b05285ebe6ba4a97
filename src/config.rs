//! Layered settings: compiled defaults → JSON settings file → `STRATUM_*`
//! environment overrides. The file may be partial; objects deep-merge over
//! defaults, and null values are skipped.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
    pub chat: ChatSettings,
    pub llm: LlmSettings,
    pub mcp: McpSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            database: DatabaseSettings::default(),
            logging: LoggingSettings::default(),
            chat: ChatSettings::default(),
            llm: LlmSettings::default(),
            mcp: McpSettings::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "data/stratum.db".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "json".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub max_messages_per_session: u32,
    pub context_window_size: usize,
    pub message_compression_ratio: f64,
    pub summary_compression_ratio: f64,
    pub min_messages_in_window: usize,
    pub max_messages_before_compress: usize,
    pub anchors_count: usize,
    pub summary_max_length: usize,
    pub min_messages_for_summary: usize,
    pub turn_timeout_secs: u64,
    pub cost_per_token: f64,
    pub system_prompt_path: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_messages_per_session: 1000,
            context_window_size: 20,
            message_compression_ratio: 0.3,
            summary_compression_ratio: 0.8,
            min_messages_in_window: 5,
            max_messages_before_compress: 50,
            anchors_count: 5,
            summary_max_length: 500,
            min_messages_for_summary: 3,
            turn_timeout_secs: 120,
            cost_per_token: 0.0001,
            system_prompt_path: "system_prompt.txt".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub main: ChannelSettings,
    pub shrink: ChannelSettings,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            main: ChannelSettings {
                base_url: "https://openrouter.ai/api/v1".into(),
                api_key: String::new(),
                model: "google/gemini-2.5-flash".into(),
                timeout_secs: 60,
            },
            shrink: ChannelSettings {
                base_url: "https://openrouter.ai/api/v1".into(),
                api_key: String::new(),
                model: "google/gemini-2.5-flash-lite".into(),
                timeout_secs: 30,
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            timeout_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSettings {
    pub enabled: bool,
    pub server_url: String,
    pub max_iterations: u32,
    pub request_timeout_secs: u64,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            server_url: "http://localhost:8000/mcp".into(),
            max_iterations: 10,
            request_timeout_secs: 60,
        }
    }
}

/// Load settings from a path with env overrides. A missing file yields
/// defaults; invalid JSON is an error.
pub fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&raw)?;
        deep_merge(defaults, user)
    } else {
        defaults
    };

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    validate(&settings)?;
    Ok(settings)
}

/// Objects merge recursively; arrays and scalars replace; nulls are skipped.
fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target), Value::Object(source)) => {
            for (key, value) in source {
                if value.is_null() {
                    continue;
                }
                let merged = match target.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                target.insert(key, merged);
            }
            Value::Object(target)
        }
        (_, source) => source,
    }
}

fn apply_env_overrides<F: Fn(&str) -> Option<String>>(settings: &mut Settings, env: F) {
    if let Some(v) = env("STRATUM_SERVER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env("STRATUM_SERVER_PORT").and_then(|v| v.parse().ok()) {
        settings.server.port = v;
    }
    if let Some(v) = env("STRATUM_DATABASE_PATH") {
        settings.database.path = v;
    }
    if let Some(v) = env("STRATUM_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env("STRATUM_LLM_MAIN_API_KEY") {
        settings.llm.main.api_key = v;
    }
    if let Some(v) = env("STRATUM_LLM_MAIN_MODEL") {
        settings.llm.main.model = v;
    }
    if let Some(v) = env("STRATUM_LLM_MAIN_BASE_URL") {
        settings.llm.main.base_url = v;
    }
    if let Some(v) = env("STRATUM_LLM_SHRINK_API_KEY") {
        settings.llm.shrink.api_key = v;
    }
    if let Some(v) = env("STRATUM_LLM_SHRINK_MODEL") {
        settings.llm.shrink.model = v;
    }
    if let Some(v) = env("STRATUM_LLM_SHRINK_BASE_URL") {
        settings.llm.shrink.base_url = v;
    }
    if let Some(v) = env("STRATUM_MCP_SERVER_URL") {
        settings.mcp.server_url = v;
    }
    if let Some(v) = env("STRATUM_MCP_MAX_ITERATIONS").and_then(|v| v.parse().ok()) {
        settings.mcp.max_iterations = v;
    }
}

fn validate(settings: &Settings) -> Result<(), SettingsError> {
    if settings.server.port == 0 {
        return Err(SettingsError::InvalidValue("server.port must be non-zero".into()));
    }
    if settings.chat.context_window_size == 0 {
        return Err(SettingsError::InvalidValue(
            "chat.context_window_size must be positive".into(),
        ));
    }
    if settings.chat.max_messages_per_session == 0 {
        return Err(SettingsError::InvalidValue(
            "chat.max_messages_per_session must be positive".into(),
        ));
    }
    for (name, ratio) in [
        ("chat.message_compression_ratio", settings.chat.message_compression_ratio),
        ("chat.summary_compression_ratio", settings.chat.summary_compression_ratio),
    ] {
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(SettingsError::InvalidValue(format!(
                "{name} must be between 0 and 1, got {ratio}"
            )));
        }
    }
    for (name, channel) in [("llm.main", &settings.llm.main), ("llm.shrink", &settings.llm.shrink)] {
        if channel.model.trim().is_empty() {
            return Err(SettingsError::InvalidValue(format!("{name}.model is required")));
        }
        if !channel.base_url.starts_with("http") {
            return Err(SettingsError::InvalidValue(format!(
                "{name}.base_url must start with http:// or https://"
            )));
        }
    }
    if settings.mcp.enabled {
        if settings.mcp.server_url.trim().is_empty() {
            return Err(SettingsError::InvalidValue("mcp.server_url is required".into()));
        }
        if settings.mcp.max_iterations == 0 {
            return Err(SettingsError::InvalidValue(
                "mcp.max_iterations must be positive".into(),
            ));
        }
    }
    Ok(())
}
