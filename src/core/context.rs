//! Persisted per-user session context

use std::sync::Arc;

use crate::backend::auth::AuthSession;
use crate::conversation::SessionId;

use super::store::{KeyValueStore, StorageError};

const CURRENT_SESSION_KEY: &str = "current_session_id";
const INSTRUCTIONS_KEY: &str = "additional_instructions";
const AUTH_SESSION_KEY: &str = "auth_session";

/// Typed view over the client-local key-value store
#[derive(Clone)]
pub struct SessionContext {
    store: Arc<dyn KeyValueStore>,
}

impl SessionContext {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The persisted conversation id, if any
    pub async fn current_session(&self) -> Result<Option<SessionId>, StorageError> {
        Ok(self
            .store
            .get(CURRENT_SESSION_KEY)
            .await?
            .filter(|id| !id.is_empty())
            .map(SessionId::new))
    }

    /// The persisted conversation id, or a freshly generated (and persisted) one
    pub async fn current_or_new_session(&self) -> Result<SessionId, StorageError> {
        if let Some(id) = self.current_session().await? {
            return Ok(id);
        }
        let id = SessionId::generate();
        self.set_current_session(&id).await?;
        Ok(id)
    }

    pub async fn set_current_session(&self, id: &SessionId) -> Result<(), StorageError> {
        self.store.set(CURRENT_SESSION_KEY, id.as_str()).await
    }

    pub async fn instructions(&self) -> Result<String, StorageError> {
        Ok(self.store.get(INSTRUCTIONS_KEY).await?.unwrap_or_default())
    }

    pub async fn set_instructions(&self, instructions: &str) -> Result<(), StorageError> {
        self.store.set(INSTRUCTIONS_KEY, instructions).await
    }

    pub async fn auth_session(&self) -> Result<Option<AuthSession>, StorageError> {
        match self.store.get(AUTH_SESSION_KEY).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_auth_session(&self, session: &AuthSession) -> Result<(), StorageError> {
        let raw = serde_json::to_string(session)?;
        self.store.set(AUTH_SESSION_KEY, &raw).await
    }

    /// Forget everything tied to the signed-in user
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(CURRENT_SESSION_KEY).await?;
        self.store.remove(INSTRUCTIONS_KEY).await?;
        self.store.remove(AUTH_SESSION_KEY).await
    }
}
