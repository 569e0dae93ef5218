//! Terminal input parsing and transcript rendering

use crate::conversation::{Message, MessageId, SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    New,
    List,
    Open(String),
    Refresh,
    Models,
    Model(String),
    Provider(String),
    Instructions(Option<String>),
    Shortcuts,
    Shortcut(usize),
    SignOut,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Command::Empty;
        }
        if !trimmed.starts_with('/') {
            return Command::Send(line.trim_end_matches(['\r', '\n']).to_string());
        }

        let (name, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (trimmed, ""),
        };

        match (name, rest) {
            ("/new", _) => Command::New,
            ("/list", _) => Command::List,
            ("/open", id) if !id.is_empty() => Command::Open(id.to_string()),
            ("/refresh", _) => Command::Refresh,
            ("/models", _) => Command::Models,
            ("/model", version) if !version.is_empty() => Command::Model(version.to_string()),
            ("/provider", provider) if !provider.is_empty() => {
                Command::Provider(provider.to_string())
            }
            ("/instructions", "") => Command::Instructions(None),
            ("/instructions", text) => Command::Instructions(Some(text.to_string())),
            ("/shortcuts", _) => Command::Shortcuts,
            ("/shortcut", n) => match n.parse::<usize>() {
                Ok(n) if n > 0 => Command::Shortcut(n),
                _ => Command::Unknown(trimmed.to_string()),
            },
            ("/signout", _) => Command::SignOut,
            ("/help", _) => Command::Help,
            ("/quit", _) | ("/exit", _) => Command::Quit,
            _ => Command::Unknown(trimmed.to_string()),
        }
    }
}

pub const HELP: &str = "\
Commands:
  /new                  start a new conversation
  /list                 list recent conversations
  /open <n|id>          open a conversation from the list (or by id)
  /refresh              reload the current conversation
  /models               list available models
  /model <version>      select a model version
  /provider <name>      select OpenAI or Anthropic
  /instructions [text]  show or set additional instructions (\"-\" clears)
  /shortcuts            list prompt shortcuts
  /shortcut <n>         prefill the input with a shortcut
  /signout              sign out
  /quit                 exit
Anything else is sent as a message.";

/// Prints transcript entries the terminal has not shown yet
#[derive(Debug, Default)]
pub struct TranscriptView {
    session: Option<SessionId>,
    last_shown: Option<MessageId>,
}

impl TranscriptView {
    /// Lines to print for the current state of the transcript
    pub fn update(&mut self, active: &SessionId, messages: &[Message]) -> Vec<String> {
        let mut lines = Vec::new();

        let start = if self.session.as_ref() != Some(active) {
            self.session = Some(active.clone());
            lines.push(format!("── conversation {} ──", active));
            0
        } else {
            match &self.last_shown {
                None => 0,
                Some(last) => match messages.iter().position(|m| &m.id == last) {
                    Some(index) => index + 1,
                    None => {
                        // the list was reloaded without the last entry we printed
                        lines.push("── reloaded ──".to_string());
                        0
                    }
                },
            }
        };

        for message in &messages[start..] {
            lines.push(render(message));
        }
        self.last_shown = messages.last().map(|m| m.id.clone());
        lines
    }
}

pub fn render(message: &Message) -> String {
    format!("{:>3} > {}", message.role().label(), message.content())
}
