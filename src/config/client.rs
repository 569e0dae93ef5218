//! Client settings loaded from an optional TOML file
//!
//! Controls:
//! - The chat model selected at startup
//! - Realtime channel tuning
//! - Extra prompt shortcuts

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::models::{ChatModel, ModelSelection};
use super::prompts::{self, PromptShortcut};

/// Root client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Chat model defaults
    #[serde(default)]
    pub chat: ChatSettings,

    /// Realtime subscription settings
    #[serde(default)]
    pub realtime: RealtimeSettings,

    /// Additional prompt shortcuts, listed after the built-in ones
    #[serde(default)]
    pub shortcuts: Vec<PromptShortcut>,
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.realtime.heartbeat_secs == 0 {
            return Err(ConfigError::Validation(
                "realtime.heartbeat_secs must be at least 1".into(),
            ));
        }
        if let Some(shortcut) = self.shortcuts.iter().find(|s| s.template.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "shortcut '{}' has an empty template",
                shortcut.label
            )));
        }
        Ok(())
    }

    /// Model selection to start with
    pub fn initial_model(&self) -> ModelSelection {
        match &self.chat.version {
            Some(version) => ModelSelection::with_version(version),
            None => ModelSelection::for_provider(self.chat.model),
        }
    }

    /// Built-in shortcuts followed by configured ones
    pub fn all_shortcuts(&self) -> Vec<PromptShortcut> {
        let mut all = prompts::builtin();
        all.extend(self.shortcuts.iter().cloned());
        all
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSettings {
    /// Provider selected at startup
    #[serde(default)]
    pub model: ChatModel,

    /// Specific model version; takes precedence over `model`
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSettings {
    /// Seconds between Phoenix heartbeats
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_heartbeat_secs() -> u64 {
    25
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
