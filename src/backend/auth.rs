//! Email/password authentication against the hosted auth service
//!
//! Besides the real service, a development bypass accepts one fixed
//! credential pair and fabricates a local session without any network call.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::config::DevCredentials;
use crate::conversation::SessionId;
use crate::core::context::SessionContext;
use crate::core::store::StorageError;

use super::Endpoint;

/// User id given to sessions created through the development bypass
pub const DEV_USER_ID: &str = "hardcoded-user-id";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("{0}")]
    Rejected(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: String,
}

/// A signed-in session as persisted locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    /// `None` for development bypass sessions
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: User,
}

impl AuthSession {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: User,
}

impl From<TokenResponse> for AuthSession {
    fn from(token: TokenResponse) -> Self {
        Self {
            access_token: Some(token.access_token),
            refresh_token: token.refresh_token,
            expires_at: token.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
            user: token.user,
        }
    }
}

/// Result of a successful registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUp {
    /// The service requires the user to confirm their email first
    ConfirmationRequired(User),
    /// The service signed the new user in immediately
    SignedIn(User),
}

pub struct AuthService {
    endpoint: Endpoint,
    context: SessionContext,
    dev: Option<DevCredentials>,
    state: watch::Sender<Option<User>>,
}

impl AuthService {
    pub fn new(endpoint: Endpoint, context: SessionContext, dev: Option<DevCredentials>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            endpoint,
            context,
            dev,
            state,
        }
    }

    /// Auth state change notifications
    pub fn subscribe(&self) -> watch::Receiver<Option<User>> {
        self.state.subscribe()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().clone()
    }

    /// Restore the persisted session, validating its token with the service
    pub async fn restore(&self) -> Result<Option<User>, AuthError> {
        let Some(session) = self.context.auth_session().await? else {
            return Ok(None);
        };

        let Some(token) = session.access_token.clone() else {
            tracing::info!("Restored development session");
            self.publish(Some(session.user.clone()));
            return Ok(Some(session.user));
        };

        if session.is_expired(Utc::now()) {
            tracing::info!("Stored session expired, sign in again");
            self.forget_session().await?;
            return Ok(None);
        }

        let response = self
            .endpoint
            .http
            .get(self.endpoint.url("auth/v1/user"))
            .header("apikey", self.endpoint.api_key())
            .bearer_auth(&token)
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "Stored session rejected");
            self.forget_session().await?;
            return Ok(None);
        }

        let user: User = response.json().await?;
        self.endpoint.token().set(Some(token));
        self.publish(Some(user.clone()));
        Ok(Some(user))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
        tracing::info!(email = %email, "Attempting to sign in");

        if let Some(dev) = &self.dev {
            if dev.email == email && dev.password == password {
                tracing::info!("Using development credentials");
                let session = AuthSession {
                    access_token: None,
                    refresh_token: None,
                    expires_at: None,
                    user: User {
                        id: DEV_USER_ID.to_string(),
                        email: dev.email.clone(),
                    },
                };
                return self.establish(session).await;
            }
        }

        let response = self
            .endpoint
            .post("auth/v1/token")
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        if !response.status().is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(AuthError::Rejected(error_message(&body)));
        }

        let token: TokenResponse = response.json().await?;
        self.establish(token.into()).await
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUp, AuthError> {
        tracing::info!(email = %email, "Attempting to sign up");

        let response = self
            .endpoint
            .post("auth/v1/signup")
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(AuthError::Rejected(error_message(&body)));
        }

        if body.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(body)
                .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
            let user = self.establish(token.into()).await?;
            return Ok(SignUp::SignedIn(user));
        }

        let user: User = serde_json::from_value(body.get("user").cloned().unwrap_or(body))
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        self.context
            .set_current_session(&SessionId::generate())
            .await?;
        tracing::info!(user = %user.id, "Sign up successful, awaiting email confirmation");
        Ok(SignUp::ConfirmationRequired(user))
    }

    /// Sign out and forget all user-scoped local state.
    ///
    /// A failing logout call is logged; local state is cleared regardless.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(token) = self.endpoint.token().get() {
            let result = self
                .endpoint
                .http
                .post(self.endpoint.url("auth/v1/logout"))
                .header("apikey", self.endpoint.api_key())
                .bearer_auth(token)
                .send()
                .await;
            match result {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!(status = %response.status(), "Logout call failed");
                }
                Err(e) => tracing::warn!("Logout call failed: {}", e),
                Ok(_) => {}
            }
        }

        self.endpoint.token().set(None);
        self.context.clear().await?;
        self.publish(None);
        tracing::info!("Signed out");
        Ok(())
    }

    async fn establish(&self, session: AuthSession) -> Result<User, AuthError> {
        self.endpoint.token().set(session.access_token.clone());
        self.context.set_auth_session(&session).await?;
        self.context
            .set_current_session(&SessionId::generate())
            .await?;
        tracing::info!(user = %session.user.id, "Sign in successful");
        self.publish(Some(session.user.clone()));
        Ok(session.user)
    }

    async fn forget_session(&self) -> Result<(), AuthError> {
        self.endpoint.token().set(None);
        self.context.clear().await?;
        Ok(())
    }

    fn publish(&self, user: Option<User>) {
        self.state.send_replace(user);
    }
}

/// Pull a human-readable message out of an auth service error body
fn error_message(body: &Value) -> String {
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .unwrap_or("An unexpected error occurred. Please try again.")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::InMemoryStore;
    use std::sync::Arc;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(base: &str, dev: Option<DevCredentials>) -> (AuthService, SessionContext) {
        let context = SessionContext::new(Arc::new(InMemoryStore::new()));
        let service = AuthService::new(Endpoint::new(base, "anon-key"), context.clone(), dev);
        (service, context)
    }

    fn dev() -> Option<DevCredentials> {
        Some(DevCredentials {
            email: "dev@example.com".into(),
            password: "letmein".into(),
        })
    }

    #[tokio::test]
    async fn test_dev_bypass_skips_network() {
        // nothing listens on this port; any request would fail
        let (auth, context) = service("http://127.0.0.1:9", dev());
        let mut changes = auth.subscribe();

        let user = auth.sign_in("dev@example.com", "letmein").await.unwrap();

        assert_eq!(user.id, DEV_USER_ID);
        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), Some(user.clone()));
        assert!(context.current_session().await.unwrap().is_some());
        assert!(auth.restore().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sign_in_with_service() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("apikey", "anon-key"))
            .and(body_json(json!({"email": "a@example.com", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "jwt",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "refresh",
                "user": {"id": "u1", "email": "a@example.com"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (auth, context) = service(&server.uri(), dev());
        let before = context.current_or_new_session().await.unwrap();

        let user = auth.sign_in("a@example.com", "pw").await.unwrap();

        assert_eq!(user.id, "u1");
        assert_eq!(auth.endpoint.token().get().as_deref(), Some("jwt"));
        assert_ne!(context.current_session().await.unwrap(), Some(before));
        let stored = context.auth_session().await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh"));
    }

    #[tokio::test]
    async fn test_sign_in_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let (auth, _) = service(&server.uri(), None);
        let err = auth.sign_in("a@example.com", "wrong").await.unwrap_err();

        assert_eq!(err.to_string(), "Invalid login credentials");
        assert!(auth.current_user().is_none());
    }

    #[tokio::test]
    async fn test_sign_up_requires_confirmation() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "u2",
                "email": "new@example.com",
                "confirmation_sent_at": "2025-03-01T00:00:00Z"
            })))
            .mount(&server)
            .await;

        let (auth, context) = service(&server.uri(), None);
        let outcome = auth.sign_up("new@example.com", "pw").await.unwrap();

        assert!(matches!(outcome, SignUp::ConfirmationRequired(ref u) if u.id == "u2"));
        assert!(auth.current_user().is_none());
        assert!(context.current_session().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sign_out_clears_local_state() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("authorization", "Bearer jwt"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let (auth, context) = service(&server.uri(), None);
        context
            .set_auth_session(&AuthSession {
                access_token: Some("jwt".into()),
                refresh_token: None,
                expires_at: None,
                user: User {
                    id: "u1".into(),
                    email: "a@example.com".into(),
                },
            })
            .await
            .unwrap();
        context.set_instructions("casual").await.unwrap();
        auth.endpoint.token().set(Some("jwt".into()));

        auth.sign_out().await.unwrap();

        assert!(auth.endpoint.token().get().is_none());
        assert!(context.current_session().await.unwrap().is_none());
        assert_eq!(context.instructions().await.unwrap(), "");
        assert!(context.auth_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_auth_state_follows_sign_in_and_sign_out() {
        let (auth, _) = service("http://127.0.0.1:9", dev());
        let mut changes = auth.subscribe();

        // nothing stored yet: restore leaves the state signed out
        assert!(auth.restore().await.unwrap().is_none());
        assert!(changes.borrow_and_update().is_none());

        auth.sign_in("dev@example.com", "letmein").await.unwrap();
        changes.changed().await.unwrap();
        let current = changes.borrow_and_update().clone();
        assert_eq!(current.map(|u| u.id), Some(DEV_USER_ID.to_string()));
        assert!(auth.current_user().is_some());

        auth.sign_out().await.unwrap();
        changes.changed().await.unwrap();
        assert!(changes.borrow_and_update().is_none());
        assert!(auth.current_user().is_none());
    }

    #[tokio::test]
    async fn test_restore_discards_rejected_token() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let (auth, context) = service(&server.uri(), None);
        context
            .set_auth_session(&AuthSession {
                access_token: Some("stale".into()),
                refresh_token: None,
                expires_at: None,
                user: User {
                    id: "u1".into(),
                    email: String::new(),
                },
            })
            .await
            .unwrap();

        assert!(auth.restore().await.unwrap().is_none());
        assert!(context.auth_session().await.unwrap().is_none());
    }

    #[test]
    fn test_error_message_fallback() {
        assert_eq!(error_message(&json!({"msg": "User already registered"})), "User already registered");
        assert!(error_message(&Value::Null).starts_with("An unexpected error"));
    }
}
