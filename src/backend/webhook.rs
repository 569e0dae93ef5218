//! Workflow webhook dispatcher
//!
//! Sends the user's message to the external workflow. A 2xx response only
//! means the workflow accepted the message; the reply is written to the chat
//! table later and arrives through the change listener.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::config::ChatModel;
use crate::conversation::SessionId;

use super::Dispatcher;

const SEND_MESSAGE_ACTION: &str = "sendMessage";

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Webhook rejected message: {0}")]
    Rejected(String),
}

/// One message submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub session_id: SessionId,
    pub chat_input: String,
    pub chat_model: ChatModel,
    /// Provider version and optional `additionalPrompts`
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    session_id: &'a str,
    action: &'static str,
    chat_input: &'a str,
    chat_model: ChatModel,
    #[serde(flatten)]
    params: &'a BTreeMap<String, String>,
}

impl<'a> From<&'a DispatchRequest> for WebhookPayload<'a> {
    fn from(request: &'a DispatchRequest) -> Self {
        Self {
            session_id: request.session_id.as_str(),
            action: SEND_MESSAGE_ACTION,
            chat_input: &request.chat_input,
            chat_model: request.chat_model,
            params: &request.params,
        }
    }
}

pub struct WebhookDispatcher {
    client: Client,
    url: String,
    username: String,
    password: String,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// POST the message; no retries
    pub async fn post(&self, request: &DispatchRequest) -> Result<(), WebhookError> {
        let payload = [WebhookPayload::from(request)];

        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(status = %status, "Webhook responded");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WebhookError::Rejected(format!("{}: {}", status, body)));
        }

        let body = response.text().await.unwrap_or_default();
        tracing::trace!(body = %body, "Webhook accepted message");
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for WebhookDispatcher {
    async fn dispatch(&self, request: &DispatchRequest) -> bool {
        match self.post(request).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(session = %request.session_id, "Error sending message: {}", e);
                false
            }
        }
    }
}
