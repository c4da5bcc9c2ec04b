//! Configuration management for llama-relay.
//!
//! The bot reads a single JSON file, by default `~/.llama-relay/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `TELEGRAM_BOT_TOKEN` → telegram.bot_token
//! - `RELAY_OWNER_ID` → telegram.owner_id
//! - `OLLAMA_BASE_URL` → ollama.base_url
//! - `RELAY_MODEL` → ollama.model
//! - `RELAY_HISTORY_FILE` → history.path
//! - `RELAY_LOG_LEVEL` → observability.log_level

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".llama-relay"),
        |dirs| dirs.home_dir().join(".llama-relay"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Telegram
// ============================================================================

/// Telegram Bot API credentials and polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token issued by BotFather
    #[serde(default)]
    pub bot_token: String,

    /// Numeric user id of the single owner allowed to open `/panel`
    #[serde(default)]
    pub owner_id: String,

    /// Long-poll timeout passed to `getUpdates`
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            owner_id: String::new(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

fn default_poll_timeout() -> u64 {
    30
}

// ============================================================================
// Ollama
// ============================================================================

/// Local inference server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Ollama API base URL
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    /// Model identifier sent with every request
    #[serde(default = "default_ollama_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_ollama_timeout")]
    pub timeout_secs: u64,

    /// Initial value of the owner-toggleable stream flag
    #[serde(default)]
    pub stream: bool,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_ollama_model(),
            timeout_secs: default_ollama_timeout(),
            stream: false,
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".into()
}

fn default_ollama_model() -> String {
    "llama3".into()
}

fn default_ollama_timeout() -> u64 {
    60
}

// ============================================================================
// History
// ============================================================================

/// Conversation history persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Snapshot file holding every user's sessions
    #[serde(default = "default_history_path")]
    pub path: String,

    /// Session used when a user has not selected one
    #[serde(default = "default_session_name")]
    pub default_session: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            default_session: default_session_name(),
        }
    }
}

impl HistoryConfig {
    /// Snapshot path with `~` and environment variables expanded.
    pub fn resolved_path(&self) -> PathBuf {
        let expanded = shellexpand::full(&self.path)
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| self.path.clone());
        PathBuf::from(expanded)
    }
}

fn default_history_path() -> String {
    "suser_histories.json".into()
}

fn default_session_name() -> String {
    "default".into()
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Base log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Optional file to write logs to instead of stderr
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            log_file: None,
        }
    }
}

impl ObservabilityConfig {
    /// Log file path with `~` and environment variables expanded.
    pub fn resolved_log_file(&self) -> Option<PathBuf> {
        self.log_file.as_deref().map(|raw| {
            let expanded = shellexpand::full(raw)
                .map(|p| p.into_owned())
                .unwrap_or_else(|_| raw.to_string());
            PathBuf::from(expanded)
        })
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration (default path unless one is given) and apply env overrides.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Ok(owner) = std::env::var("RELAY_OWNER_ID") {
            self.telegram.owner_id = owner;
        }
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            self.ollama.base_url = url;
        }
        if let Ok(model) = std::env::var("RELAY_MODEL") {
            self.ollama.model = model;
        }
        if let Ok(path) = std::env::var("RELAY_HISTORY_FILE") {
            self.history.path = path;
        }
        if let Ok(level) = std::env::var("RELAY_LOG_LEVEL") {
            self.observability.log_level = level;
        }
    }

    /// Save configuration to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).with_context(|| {
                    format!("Failed to create config directory {}", dir.display())
                })?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_local_ollama() {
        let config = Config::default();
        assert_eq!(config.ollama.base_url, "http://localhost:11434");
        assert_eq!(config.ollama.model, "llama3");
        assert_eq!(config.ollama.timeout_secs, 60);
        assert!(!config.ollama.stream);
        assert_eq!(config.history.path, "suser_histories.json");
        assert_eq!(config.history.default_session, "default");
        assert_eq!(config.telegram.poll_timeout_secs, 30);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let json = r#"{"telegram": {"bot_token": "123:ABC", "owner_id": "42"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.telegram.bot_token, "123:ABC");
        assert_eq!(config.telegram.owner_id, "42");
        assert_eq!(config.ollama.model, "llama3");
        assert_eq!(config.observability.log_format, "pretty");
    }

    #[test]
    fn save_and_load_from_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.telegram.owner_id = "7".into();
        config.ollama.stream = true;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.telegram.owner_id, "7");
        assert!(loaded.ollama.stream);
    }

    #[test]
    fn load_from_malformed_file_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn history_path_expands_home() {
        let history = HistoryConfig {
            path: "~/histories.json".into(),
            ..HistoryConfig::default()
        };
        let resolved = history.resolved_path();
        assert!(resolved.ends_with("histories.json"));

        let plain = HistoryConfig::default().resolved_path();
        assert_eq!(plain, PathBuf::from("suser_histories.json"));
    }

    #[test]
    fn log_file_is_optional() {
        assert!(ObservabilityConfig::default().resolved_log_file().is_none());

        let obs = ObservabilityConfig {
            log_file: Some("bot.log".into()),
            ..ObservabilityConfig::default()
        };
        assert_eq!(obs.resolved_log_file(), Some(PathBuf::from("bot.log")));
    }
}
