//! Prompt shortcuts that prefill the input line
//!
//! Extra shortcuts can be declared in the client TOML file:
//!
//! ```toml
//! [[shortcuts]]
//! label = "Write a case study"
//! template = "Write a customer case study about: "
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptShortcut {
    /// Name shown in the shortcut list
    pub label: String,

    /// Text placed into the input; the user completes it
    pub template: String,
}

impl PromptShortcut {
    pub fn new(label: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            template: template.into(),
        }
    }
}

pub const BLOG_POST: &str = "Create a comprehensive blog post about the following topic: ";

pub const WHITEPAPER: &str = "Create a detailed whitepaper on the following subject: ";

/// Shortcuts available without any configuration
pub fn builtin() -> Vec<PromptShortcut> {
    vec![
        PromptShortcut::new("Create a blog post", BLOG_POST),
        PromptShortcut::new("Create a whitepaper", WHITEPAPER),
    ]
}
