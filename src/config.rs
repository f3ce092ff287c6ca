// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields and provides sensible defaults for optional ones
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Platform bot token. Required; no default.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Feature names to skip at load time.
    #[serde(default)]
    pub disabled_features: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub timestamp: bool,
    #[serde(default = "default_true")]
    pub color: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Absent key leaves the llm feature out of the manifest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            prefix: default_prefix(),
            disabled_features: Vec::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamp: true,
            color: true,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_llm_base_url(),
            model: default_llm_model(),
        }
    }
}

fn default_prefix() -> String {
    "#".to_string()
}

fn default_database_path() -> String {
    "data/offbeat.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Load configuration from config.toml with environment variable overrides
    pub fn load() -> Result<Self> {
        let config_path = "config.toml";
        let mut config = if Path::new(config_path).exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config.toml")?;
            toml::from_str::<Config>(&content).context("Failed to parse config.toml")?
        } else {
            Config {
                bot: BotConfig::default(),
                database: DatabaseConfig::default(),
                logging: LoggingConfig::default(),
                llm: LlmConfig::default(),
            }
        };

        // Override with environment variables if present
        if let Ok(val) = std::env::var("BOT_TOKEN") {
            config.bot.token = val;
        }
        if let Ok(val) = std::env::var("PREFIX") {
            config.bot.prefix = val;
        }
        if let Ok(val) = std::env::var("DISABLED_FEATURES") {
            config.bot.disabled_features = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = std::env::var("DATABASE_PATH") {
            config.database.path = val;
        }
        if let Ok(val) = std::env::var("LOG_LEVEL") {
            config.logging.level = val.to_lowercase();
        }
        if let Ok(val) = std::env::var("LOG_TIMESTAMP") {
            config.logging.timestamp = !matches!(val.as_str(), "false" | "0" | "no");
        }
        // Convention: NO_COLOR set to anything non-empty disables color
        if std::env::var("NO_COLOR").map(|v| !v.is_empty()).unwrap_or(false) {
            config.logging.color = false;
        }
        if let Ok(val) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = val;
        }
        if let Ok(val) = std::env::var("LLM_MODEL") {
            config.llm.model = val;
        }

        // Validate required fields
        if config.bot.token.trim().is_empty() {
            anyhow::bail!("bot.token is required (set in config.toml or BOT_TOKEN env var)");
        }
        if config.bot.prefix.trim().is_empty() {
            anyhow::bail!("bot.prefix must not be empty (set in config.toml or PREFIX env var)");
        }
        if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
            anyhow::bail!(
                "logging.level must be one of {:?}, got: {}",
                VALID_LOG_LEVELS,
                config.logging.level
            );
        }
        if config.database.path.trim().is_empty() {
            anyhow::bail!("database.path must not be empty");
        }

        Ok(config)
    }

    /// Convert disabled_features Vec to HashSet for efficient lookups
    pub fn disabled_features_set(&self) -> HashSet<String> {
        self.bot.disabled_features.iter().cloned().collect()
    }
}
