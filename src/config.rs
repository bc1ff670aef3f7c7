use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::ChatId;

use crate::providers::{gemini, stability};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file '{}': {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Failed to parse JSON.
    #[error("failed to parse config file '{}': {source}", path.display())]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// Validation error.
    #[error("config validation error: {0}")]
    Validation(String),
}

/// Optional base URL overrides, one per provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Endpoints {
    pub gemini: Option<String>,
    pub stability: Option<String>,
    pub replicate: Option<String>,
    pub translate: Option<String>,
    pub openweather: Option<String>,
    pub timeapi: Option<String>,
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    telegram_bot_token: String,
    #[serde(default)]
    gemini_api_key: String,
    #[serde(default)]
    stability_api_key: String,
    #[serde(default)]
    replicate_api_token: String,
    #[serde(default)]
    google_translate_api_key: String,
    #[serde(default)]
    openweather_api_key: String,
    #[serde(default = "default_gemini_model")]
    gemini_model: String,
    #[serde(default = "default_stability_engine")]
    stability_engine: String,
    #[serde(default)]
    endpoints: Endpoints,
    /// Number of user/assistant exchanges `/chat` remembers per conversation.
    #[serde(default = "default_chat_history_turns")]
    chat_history_turns: usize,
    /// Hard limit on a single provider call.
    #[serde(default = "default_provider_timeout_secs")]
    provider_timeout_secs: u64,
    /// Edit the placeholder into a "still working" notice after this long (0 = never).
    #[serde(default = "default_slow_notice_secs")]
    slow_notice_secs: u64,
    /// Chat that receives WARN/ERROR log lines.
    log_chat_id: Option<i64>,
    /// Directory for log files. Defaults to current directory.
    data_dir: Option<String>,
}

fn default_gemini_model() -> String {
    gemini::DEFAULT_MODEL.to_string()
}

fn default_stability_engine() -> String {
    stability::DEFAULT_ENGINE.to_string()
}

fn default_chat_history_turns() -> usize {
    20
}

fn default_provider_timeout_secs() -> u64 {
    90
}

fn default_slow_notice_secs() -> u64 {
    20
}

pub struct Config {
    pub telegram_bot_token: String,
    pub gemini_api_key: Option<String>,
    pub stability_api_key: Option<String>,
    pub replicate_api_token: Option<String>,
    pub google_translate_api_key: Option<String>,
    pub openweather_api_key: Option<String>,
    pub gemini_model: String,
    pub stability_engine: String,
    pub endpoints: Endpoints,
    pub chat_history_turns: usize,
    pub provider_timeout: Duration,
    pub slow_notice: Option<Duration>,
    pub log_chat_id: Option<ChatId>,
    pub data_dir: PathBuf,
}

impl Config {
    /// Load the JSON config at `path`, then apply environment overrides from `env`.
    ///
    /// A missing file is not an error: every setting can come from the environment.
    pub fn load<P, F>(path: P, env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = path.as_ref().to_path_buf();
        let content = match std::fs::read_to_string(&config_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => "{}".to_string(),
            Err(e) => return Err(ConfigError::ReadFile { path: config_path, source: e }),
        };
        let mut file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        apply_env(&mut file, env);
        Self::from_file(file)
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token is required (config file or TELEGRAM_BOT_TOKEN)".into(),
            ));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2
            || token_parts[0].parse::<u64>().is_err()
            || token_parts[1].is_empty()
        {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)"
                    .into(),
            ));
        }
        if file.chat_history_turns == 0 {
            return Err(ConfigError::Validation("chat_history_turns must be at least 1".into()));
        }
        if file.provider_timeout_secs == 0 {
            return Err(ConfigError::Validation("provider_timeout_secs must be at least 1".into()));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            gemini_api_key: non_empty(file.gemini_api_key),
            stability_api_key: non_empty(file.stability_api_key),
            replicate_api_token: non_empty(file.replicate_api_token),
            google_translate_api_key: non_empty(file.google_translate_api_key),
            openweather_api_key: non_empty(file.openweather_api_key),
            gemini_model: file.gemini_model,
            stability_engine: file.stability_engine,
            endpoints: file.endpoints,
            chat_history_turns: file.chat_history_turns,
            provider_timeout: Duration::from_secs(file.provider_timeout_secs),
            slow_notice: (file.slow_notice_secs > 0)
                .then(|| Duration::from_secs(file.slow_notice_secs)),
            log_chat_id: file.log_chat_id.map(ChatId),
            data_dir,
        })
    }
}

/// Environment variables win over the file.
fn apply_env<F: Fn(&str) -> Option<String>>(file: &mut ConfigFile, env: F) {
    let targets: [(&str, &mut String); 6] = [
        ("TELEGRAM_BOT_TOKEN", &mut file.telegram_bot_token),
        ("GEMINI_API_KEY", &mut file.gemini_api_key),
        ("STABILITY_API_KEY", &mut file.stability_api_key),
        ("REPLICATE_API_TOKEN", &mut file.replicate_api_token),
        ("GOOGLE_TRANSLATE_API_KEY", &mut file.google_translate_api_key),
        ("OPENWEATHER_API_KEY", &mut file.openweather_api_key),
    ];
    for (name, field) in targets {
        if let Some(value) = env(name).filter(|v| !v.trim().is_empty()) {
            *field = value.trim().to_string();
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}
