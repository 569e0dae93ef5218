//! Adapters over the hosted backend and the workflow webhook
//!
//! Each external collaborator sits behind a trait so the chat session can be
//! driven against fakes in tests.

pub mod auth;
pub mod history;
pub mod realtime;
pub mod webhook;

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};

use crate::conversation::{ConversationPreview, Message, SessionId};

pub use auth::{AuthService, User};
pub use history::{HistoryError, RestHistory};
pub use realtime::RealtimeListener;
pub use webhook::{DispatchRequest, WebhookDispatcher};

/// Bulk reads of stored conversation history
#[async_trait]
pub trait HistoryLoader: Send + Sync {
    /// All rows of one conversation, oldest first
    async fn load(&self, session_id: &SessionId) -> Result<Vec<Message>, HistoryError>;

    /// Recently active conversations, newest first
    async fn conversations(&self) -> Vec<ConversationPreview>;
}

/// Callback invoked for each inserted row
pub type InsertCallback = Box<dyn Fn(Message) + Send + Sync>;

/// Subscriptions to rows inserted into one conversation
pub trait ChangeListener: Send + Sync {
    fn subscribe(&self, session_id: &SessionId, on_insert: InsertCallback) -> Subscription;
}

/// Submits user messages to the workflow trigger
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// `true` once the trigger accepted the message for processing
    async fn dispatch(&self, request: &DispatchRequest) -> bool;
}

/// Handle for an active subscription; dropping it unsubscribes
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.run_teardown();
    }

    fn run_teardown(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_teardown();
    }
}

/// Access token shared between the auth service and data requests
#[derive(Debug, Clone, Default)]
pub struct AccessToken(Arc<RwLock<Option<String>>>);

impl AccessToken {
    pub fn get(&self) -> Option<String> {
        self.0.read().ok().and_then(|token| token.clone())
    }

    pub fn set(&self, token: Option<String>) {
        if let Ok(mut slot) = self.0.write() {
            *slot = token;
        }
    }
}

/// Connection details for the hosted backend
#[derive(Debug, Clone)]
pub struct Endpoint {
    http: Client,
    base_url: String,
    api_key: String,
    token: AccessToken,
}

impl Endpoint {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            token: AccessToken::default(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn token(&self) -> &AccessToken {
        &self.token
    }

    /// User token when signed in against the service, anon key otherwise
    pub fn bearer(&self) -> String {
        self.token.get().unwrap_or_else(|| self.api_key.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.http.get(self.url(path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.http.post(self.url(path)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(self.bearer())
    }
}
