//! Application configuration

pub mod client;
pub mod models;
pub mod prompts;

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use client::{ClientConfig, ConfigError};
pub use models::{ChatModel, ModelSelection};
pub use prompts::PromptShortcut;

/// Table the workflow writes chat history rows into
pub const DEFAULT_CHAT_TABLE: &str = "n8n_chat_histories";

/// Fixed credentials that bypass the auth service during development
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevCredentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub supabase_url: String,
    pub supabase_key: String,
    pub chat_table: String,
    pub webhook_url: String,
    pub webhook_username: String,
    pub webhook_password: String,
    pub dev_credentials: Option<DevCredentials>,
    pub data_dir: PathBuf,
    pub client_config: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL").unwrap_or_default(),
            supabase_key: env::var("SUPABASE_KEY").unwrap_or_default(),
            chat_table: env::var("CHAT_TABLE").unwrap_or_else(|_| DEFAULT_CHAT_TABLE.into()),
            webhook_url: env::var("WEBHOOK_URL").unwrap_or_default(),
            webhook_username: env::var("AUTH_USERNAME").unwrap_or_default(),
            webhook_password: env::var("AUTH_PASSWORD").unwrap_or_default(),
            dev_credentials: dev_credentials(
                env::var("DEV_USERNAME").ok(),
                env::var("DEV_PASSWORD").ok(),
            ),
            data_dir: env::var("RELAYCHAT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            client_config: env::var("RELAYCHAT_CONFIG").ok().map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.supabase_url.trim().is_empty() {
            return Err(ConfigError::Validation("SUPABASE_URL is not set".into()));
        }
        reqwest::Url::parse(&self.supabase_url)
            .map_err(|e| ConfigError::Validation(format!("SUPABASE_URL: {}", e)))?;

        if self.webhook_url.trim().is_empty() {
            return Err(ConfigError::Validation("WEBHOOK_URL is not set".into()));
        }
        reqwest::Url::parse(&self.webhook_url)
            .map_err(|e| ConfigError::Validation(format!("WEBHOOK_URL: {}", e)))?;

        if self.chat_table.trim().is_empty() {
            return Err(ConfigError::Validation("CHAT_TABLE must not be empty".into()));
        }

        if self.supabase_key.is_empty() {
            tracing::warn!(
                "SUPABASE_KEY is not defined. Authentication and database operations will not work."
            );
        }

        Ok(())
    }

    /// Path of the local key-value database
    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join("relaychat.db")
    }

    /// Load the optional client TOML file, falling back to defaults
    pub fn load_client_config(&self) -> Result<ClientConfig, ConfigError> {
        match &self.client_config {
            Some(path) => ClientConfig::from_file(path),
            None => Ok(ClientConfig::default()),
        }
    }
}

/// The bypass is active only when both values are present and non-empty
fn dev_credentials(email: Option<String>, password: Option<String>) -> Option<DevCredentials> {
    match (email, password) {
        (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => {
            Some(DevCredentials { email, password })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            supabase_url: "https://project.supabase.co".into(),
            supabase_key: "anon".into(),
            chat_table: DEFAULT_CHAT_TABLE.into(),
            webhook_url: "https://flows.example.com/webhook/chat".into(),
            webhook_username: "hook".into(),
            webhook_password: String::new(),
            dev_credentials: None,
            data_dir: PathBuf::from("./data"),
            client_config: None,
        }
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_urls() {
        let mut config = sample();
        config.webhook_url = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = sample();
        config.supabase_url = "not a url".into();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_dev_credentials_require_both_values() {
        assert!(dev_credentials(Some("dev@example.com".into()), None).is_none());
        assert!(dev_credentials(Some("dev@example.com".into()), Some(String::new())).is_none());
        assert_eq!(
            dev_credentials(Some("dev@example.com".into()), Some("pw".into())),
            Some(DevCredentials {
                email: "dev@example.com".into(),
                password: "pw".into(),
            })
        );
    }
}
