//! Chat model catalog and selection

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Provider the workflow should route the message to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatModel {
    #[default]
    OpenAI,
    Anthropic,
}

impl ChatModel {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatModel::OpenAI => "OpenAI",
            ChatModel::Anthropic => "Anthropic",
        }
    }

    /// Version selected when switching to this provider
    pub fn default_version(self) -> &'static str {
        match self {
            ChatModel::OpenAI => "gpt-4o",
            ChatModel::Anthropic => "claude-3-7-sonnet-20250219",
        }
    }

    /// Name of the webhook parameter carrying the version
    fn version_param(self) -> &'static str {
        match self {
            ChatModel::OpenAI => "openaiModel",
            ChatModel::Anthropic => "anthropicModel",
        }
    }
}

impl fmt::Display for ChatModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ChatModel::OpenAI),
            "anthropic" => Ok(ChatModel::Anthropic),
            other => Err(format!("Unknown chat model: {}", other)),
        }
    }
}

/// A selectable model version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelOption {
    pub value: &'static str,
    pub label: &'static str,
    pub provider: ChatModel,
    pub is_new: bool,
    pub is_featured: bool,
}

const fn option(
    value: &'static str,
    label: &'static str,
    provider: ChatModel,
    is_new: bool,
    is_featured: bool,
) -> ModelOption {
    ModelOption {
        value,
        label,
        provider,
        is_new,
        is_featured,
    }
}

pub const CATALOG: &[ModelOption] = &[
    option("gpt-4o", "GPT-4o", ChatModel::OpenAI, false, true),
    option("gpt-4o-mini", "GPT-4o Mini", ChatModel::OpenAI, false, false),
    option("o3-mini", "OpenAI o3-mini", ChatModel::OpenAI, false, false),
    option("o1", "OpenAI o1", ChatModel::OpenAI, false, false),
    option("o1-mini", "OpenAI o1-mini", ChatModel::OpenAI, false, false),
    option("claude-3-7-sonnet-20250219", "Claude 3.7 Sonnet", ChatModel::Anthropic, true, true),
    option("claude-3-5-haiku-20241022", "Claude 3.5 Haiku", ChatModel::Anthropic, false, false),
    option("claude-3-haiku-20240307", "Claude 3 Haiku", ChatModel::Anthropic, false, false),
    option("claude-3-opus-20240229", "Claude 3 Opus", ChatModel::Anthropic, false, false),
    option("claude-3-sonnet-20240229", "Claude 3 Sonnet", ChatModel::Anthropic, false, false),
];

/// Look up a catalog entry; unknown versions fall back to the first entry
pub fn lookup(version: &str) -> &'static ModelOption {
    CATALOG
        .iter()
        .find(|m| m.value == version)
        .unwrap_or(&CATALOG[0])
}

/// Currently selected provider and version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    provider: ChatModel,
    version: String,
}

impl ModelSelection {
    pub fn for_provider(provider: ChatModel) -> Self {
        Self {
            provider,
            version: provider.default_version().to_string(),
        }
    }

    pub fn with_version(version: &str) -> Self {
        let option = lookup(version);
        Self {
            provider: option.provider,
            version: option.value.to_string(),
        }
    }

    pub fn provider(&self) -> ChatModel {
        self.provider
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn option(&self) -> &'static ModelOption {
        lookup(&self.version)
    }

    /// Switch provider; the version resets to the provider default
    pub fn set_provider(&mut self, provider: ChatModel) {
        *self = Self::for_provider(provider);
    }

    /// Pick a catalog version; the provider follows the version
    pub fn set_version(&mut self, version: &str) {
        *self = Self::with_version(version);
    }

    /// Extra webhook parameters for this selection
    pub fn params(&self, instructions: &str) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert(
            self.provider.version_param().to_string(),
            self.version.clone(),
        );
        let instructions = instructions.trim();
        if !instructions.is_empty() {
            params.insert("additionalPrompts".to_string(), instructions.to_string());
        }
        params
    }
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self::for_provider(ChatModel::default())
    }
}
