//! Chat history reads over the hosted REST interface

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::conversation::{derive_title, ConversationPreview, Message, SessionId, UNTITLED};

use super::{Endpoint, HistoryLoader};

/// Rows scanned when building the conversation list
const RECENT_ROWS: usize = 50;

/// Rows read per conversation when deriving its title
const TITLE_ROWS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Deserialize)]
struct SessionRow {
    session_id: SessionId,
}

/// History reader for the chat table
pub struct RestHistory {
    endpoint: Endpoint,
    table: String,
}

impl RestHistory {
    pub fn new(endpoint: Endpoint, table: impl Into<String>) -> Self {
        Self {
            endpoint,
            table: table.into(),
        }
    }

    fn table_path(&self) -> String {
        format!("rest/v1/{}", self.table)
    }

    async fn fetch_rows(
        &self,
        session_id: &SessionId,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, HistoryError> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("session_id", format!("eq.{}", session_id)),
            ("order", "id.asc".to_string()),
        ];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let response = self
            .endpoint
            .get(&self.table_path())
            .query(&query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(HistoryError::InvalidResponse(format!("{}: {}", status, body)));
        }

        let rows: Vec<Value> = response.json().await?;
        Ok(parse_rows(rows))
    }

    async fn recent_sessions(&self) -> Result<Vec<SessionId>, HistoryError> {
        let response = self
            .endpoint
            .get(&self.table_path())
            .query(&[
                ("select", "session_id".to_string()),
                ("order", "id.desc".to_string()),
                ("limit", RECENT_ROWS.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(HistoryError::InvalidResponse(format!("{}: {}", status, body)));
        }

        let rows: Vec<SessionRow> = response.json().await?;
        let mut seen = HashSet::new();
        Ok(rows
            .into_iter()
            .map(|row| row.session_id)
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }

    async fn preview(&self, session_id: SessionId) -> ConversationPreview {
        let title = match self.fetch_rows(&session_id, Some(TITLE_ROWS)).await {
            Ok(rows) => derive_title(&rows),
            Err(e) => {
                tracing::warn!(session = %session_id, "Failed to load conversation title: {}", e);
                UNTITLED.to_string()
            }
        };
        ConversationPreview { session_id, title }
    }
}

/// Rows the client cannot interpret (e.g. tool call records) are skipped
fn parse_rows(rows: Vec<Value>) -> Vec<Message> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<Message>(row) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!("Skipping unreadable history row: {}", e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl HistoryLoader for RestHistory {
    async fn load(&self, session_id: &SessionId) -> Result<Vec<Message>, HistoryError> {
        let messages = self.fetch_rows(session_id, None).await?;
        tracing::debug!(session = %session_id, count = messages.len(), "Loaded history");
        Ok(messages)
    }

    async fn conversations(&self) -> Vec<ConversationPreview> {
        let sessions = match self.recent_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::error!("Error fetching conversations: {}", e);
                return Vec::new();
            }
        };

        futures::future::join_all(sessions.into_iter().map(|id| self.preview(id))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn history(server: &MockServer) -> RestHistory {
        RestHistory::new(Endpoint::new(&server.uri(), "anon-key"), "n8n_chat_histories")
    }

    #[tokio::test]
    async fn test_load_history() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/n8n_chat_histories"))
            .and(query_param("session_id", "eq.s1"))
            .and(query_param("order", "id.asc"))
            .and(header("apikey", "anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 1, "session_id": "s1", "message": {"type": "human", "content": "Hello"}},
                {"id": 2, "session_id": "s1", "message": {"type": "tool", "content": "{}"}},
                {"id": 3, "session_id": "s1", "message": {"type": "ai", "content": "Hi there"}}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let messages = history(&server).load(&SessionId::new("s1")).await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role(), Role::Human);
        assert_eq!(messages[1].id.as_str(), "3");
    }

    #[tokio::test]
    async fn test_load_history_error_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("JWT expired"))
            .mount(&server)
            .await;

        let err = history(&server).load(&SessionId::new("s1")).await.unwrap_err();
        assert!(matches!(err, HistoryError::InvalidResponse(ref m) if m.contains("401")));
    }

    #[tokio::test]
    async fn test_conversations_deduplicated_with_titles() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/n8n_chat_histories"))
            .and(query_param("select", "session_id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"session_id": "b"},
                {"session_id": "b"},
                {"session_id": "a"}
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/n8n_chat_histories"))
            .and(query_param("session_id", "eq.b"))
            .and(query_param("limit", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 5, "session_id": "b", "message": {"type": "human", "content": "Newest topic"}}
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/n8n_chat_histories"))
            .and(query_param("session_id", "eq.a"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let conversations = history(&server).conversations().await;

        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations[0].session_id, SessionId::new("b"));
        assert_eq!(conversations[0].title, "Newest topic");
        assert_eq!(conversations[1].title, UNTITLED);
    }

    #[tokio::test]
    async fn test_conversations_empty_on_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(history(&server).conversations().await.is_empty());
    }
}
