//! Configuration management for Parley.
//!
//! The bot reads a single JSON file at `~/.parley/config.json` (or the path in
//! `PARLEY_CONFIG`). Every field has a default, so a missing file is fine as
//! long as the secrets arrive through the environment.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `PARLEY_CONFIG` → path of the config file itself
//! - `TELEGRAM_TOKEN` / `TELEGRAM_BOT_TOKEN` → telegram.bot_token
//! - `GEMINI_API_KEY` / `GOOGLE_API_KEY` → gemini.api_key
//! - `PORT` → health.port
//! - `PARLEY_BIND_ADDRESS` → health.bind
//! - `PARLEY_LOG_LEVEL` → observability.log_level
//! - `PARLEY_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".parley"),
        |dirs| dirs.home_dir().join(".parley"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    std::env::var("PARLEY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config_dir().join("config.json"))
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Telegram bot settings
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Gemini API settings
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Per-user session settings
    #[serde(default)]
    pub session: SessionSettings,

    /// Liveness endpoint settings
    #[serde(default)]
    pub health: HealthConfig,

    /// Observability configuration
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

    /// Load configuration with environment variable fallbacks.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Split out from [`Config::apply_env_overrides`] so tests can feed a map
    /// instead of mutating the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TELEGRAM_TOKEN").or_else(|| lookup("TELEGRAM_BOT_TOKEN")) {
            self.telegram.bot_token = Some(token);
        }

        if let Some(key) = lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_API_KEY")) {
            self.gemini.api_key = Some(key);
        }

        if let Some(port) = lookup("PORT") {
            match port.parse() {
                Ok(p) => self.health.port = p,
                Err(_) => tracing::warn!(port = %port, "Ignoring unparseable PORT"),
            }
        }

        if let Some(bind) = lookup("PARLEY_BIND_ADDRESS") {
            self.health.bind = bind;
        }

        if let Some(level) = lookup("PARLEY_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Some(format) = lookup("PARLEY_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Save configuration to the given path, creating parent directories.
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

    /// Address the liveness server binds to.
    pub fn health_addr(&self) -> String {
        format!("{}:{}", self.health.bind, self.health.port)
    }
}

// ============================================================================
// Telegram
// ============================================================================

/// Telegram bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token issued by BotFather
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Usernames or numeric ids allowed to talk to the bot ("*" = everyone)
    #[serde(default = "default_allowed_users")]
    pub allowed_users: Vec<String>,

    /// Long-poll timeout passed to getUpdates
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            allowed_users: default_allowed_users(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

fn default_allowed_users() -> Vec<String> {
    vec!["*".into()]
}

fn default_poll_timeout() -> u64 {
    30
}

// ============================================================================
// Gemini
// ============================================================================

/// Gemini API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    /// API root, without the trailing `/models/...` part
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_gemini_timeout")]
    pub timeout_secs: u64,

    /// Model used for `/image`
    #[serde(default = "default_image_model")]
    pub image_model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_gemini_base_url(),
            timeout_secs: default_gemini_timeout(),
            image_model: default_image_model(),
        }
    }
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}

fn default_gemini_timeout() -> u64 {
    120
}

fn default_image_model() -> String {
    "gemini-2.5-flash".into()
}

// ============================================================================
// Sessions
// ============================================================================

/// Per-user session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Maximum turns kept in a conversation history
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Drop sessions idle for this long. `None` keeps them for the process lifetime.
    #[serde(default)]
    pub idle_ttl_secs: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            idle_ttl_secs: None,
        }
    }
}

fn default_max_history() -> usize {
    1000
}

// ============================================================================
// Liveness
// ============================================================================

/// Liveness endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_bind_address")]
    pub bind: String,

    #[serde(default = "default_health_port")]
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_health_port(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".into()
}

fn default_health_port() -> u16 {
    10000
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}
