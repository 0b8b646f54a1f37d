use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GmailError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub labels: LabelConfig,
    #[serde(default)]
    pub reply: ReplyConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Delay between cycles, sampled uniformly from `min..=max` whole seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval(),
            max_interval_secs: default_max_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    #[serde(default = "default_marker_name")]
    pub marker_name: String,
    #[serde(default = "default_remove_label")]
    pub remove_label: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            marker_name: default_marker_name(),
            remove_label: default_remove_label(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyConfig {
    #[serde(default = "default_body")]
    pub body: String,
    #[serde(default = "default_from")]
    pub from: String,
    #[serde(default = "default_query")]
    pub query: String,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            body: default_body(),
            from: default_from(),
            query: default_query(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_success_body")]
    pub success_body: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            success_body: default_success_body(),
        }
    }
}

fn default_min_interval() -> u64 {
    5
}

fn default_max_interval() -> u64 {
    10
}

fn default_marker_name() -> String {
    "PENDING".to_string()
}

fn default_remove_label() -> String {
    "INBOX".to_string()
}

fn default_body() -> String {
    "Dear,\n\nwe have received your mail and will reply soon.\n\nRegards".to_string()
}

fn default_from() -> String {
    "me".to_string()
}

fn default_query() -> String {
    crate::finder::CANDIDATE_QUERY.to_string()
}

fn default_bind() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_success_body() -> String {
    "Success !!!!".to_string()
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config = Self::from_toml(&content)?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Parse and validate TOML content
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.poll.min_interval_secs == 0 {
            return Err(GmailError::ConfigError(
                "poll.min_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.poll.min_interval_secs > self.poll.max_interval_secs {
            return Err(GmailError::ConfigError(format!(
                "poll.min_interval_secs ({}) cannot exceed poll.max_interval_secs ({})",
                self.poll.min_interval_secs, self.poll.max_interval_secs
            )));
        }

        if self.labels.marker_name.trim().is_empty() {
            return Err(GmailError::ConfigError(
                "labels.marker_name cannot be empty".to_string(),
            ));
        }
        if self.labels.remove_label.trim().is_empty() {
            return Err(GmailError::ConfigError(
                "labels.remove_label cannot be empty".to_string(),
            ));
        }
        if self.labels.marker_name == self.labels.remove_label {
            return Err(GmailError::ConfigError(
                "labels.marker_name and labels.remove_label must differ".to_string(),
            ));
        }

        if self.reply.body.trim().is_empty() {
            return Err(GmailError::ConfigError(
                "reply.body cannot be empty".to_string(),
            ));
        }
        if self.reply.query.trim().is_empty() {
            return Err(GmailError::ConfigError(
                "reply.query cannot be empty".to_string(),
            ));
        }

        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(GmailError::ConfigError(format!(
                "server.bind is not a socket address: '{}'",
                self.server.bind
            )));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
