// SPDX-License-Identifier: MPL-2.0

//! The external backend-as-a-service boundary.
//!
//! Everything the app knows about users, tribes and posts lives behind
//! [`Backend`]. Containers share one `Arc<dyn Backend>` and treat it as an
//! opaque capability provider.

#[cfg(test)]
pub mod fake;
mod query;
mod supabase;

pub use query::{Filter, Order, Query};
pub use supabase::{SupabaseClient, parse_redirect_tokens};

use crate::models::{AuthResponse, Session};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("not authenticated")]
    NotAuthenticated,
    /// A single-row read matched nothing.
    #[error("no rows returned")]
    NoRows,
    #[error("backend error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::InvalidResponse(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    GitHub,
    Google,
}

impl OAuthProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            OAuthProvider::GitHub => "github",
            OAuthProvider::Google => "google",
        }
    }

    /// Scopes requested from the identity provider.
    pub fn default_scopes(self) -> &'static str {
        match self {
            OAuthProvider::GitHub => "read:user user:email",
            OAuthProvider::Google => "email profile",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthOptions {
    pub redirect_to: Url,
    pub scopes: String,
}

#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    /// Auxiliary claims stored on the identity (`username`, `full_name`).
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

impl AuthEvent {
    pub fn new(kind: AuthEventKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }
}

/// Capabilities of the hosted backend: auth, relational data and RPC.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Current session snapshot, refreshed first if the token is expiring.
    async fn get_session(&self) -> Result<Option<Session>, BackendError>;

    /// Register a listener on the auth-change stream. Dropping the receiver
    /// releases the registration.
    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent>;

    /// Start an OAuth redirect flow; returns the provider authorize URL.
    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        options: OAuthOptions,
    ) -> Result<Url, BackendError>;

    /// Complete an OAuth redirect from the callback URL the browser landed on.
    async fn session_from_redirect(&self, callback: &Url) -> Result<Session, BackendError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, BackendError>;

    async fn sign_up(&self, request: SignUpRequest) -> Result<AuthResponse, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    async fn select(&self, query: &Query) -> Result<Vec<Value>, BackendError>;

    /// Insert one row; `returning` is the projection of the echoed rows.
    async fn insert(
        &self,
        table: &str,
        row: Value,
        returning: Option<&str>,
    ) -> Result<Vec<Value>, BackendError>;

    async fn update(&self, query: &Query, changes: Value) -> Result<Vec<Value>, BackendError>;

    async fn delete(&self, query: &Query) -> Result<(), BackendError>;

    /// Call a server-side function.
    async fn rpc(&self, function: &str, args: Value) -> Result<Value, BackendError>;
}

pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, BackendError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(BackendError::from))
        .collect()
}

/// Exactly one row, or `NoRows`.
pub fn decode_single<T: DeserializeOwned>(rows: Vec<Value>) -> Result<T, BackendError> {
    let mut rows = rows.into_iter();
    let first = rows.next().ok_or(BackendError::NoRows)?;
    if rows.next().is_some() {
        return Err(BackendError::InvalidResponse(
            "expected a single row, got several".to_string(),
        ));
    }
    Ok(serde_json::from_value(first)?)
}

pub async fn fetch_all<T: DeserializeOwned>(
    backend: &dyn Backend,
    query: &Query,
) -> Result<Vec<T>, BackendError> {
    decode_rows(backend.select(query).await?)
}

pub async fn fetch_single<T: DeserializeOwned>(
    backend: &dyn Backend,
    query: &Query,
) -> Result<T, BackendError> {
    decode_single(backend.select(query).await?)
}

/// Like [`fetch_single`] but a missing row is `Ok(None)`.
pub async fn fetch_optional<T: DeserializeOwned>(
    backend: &dyn Backend,
    query: &Query,
) -> Result<Option<T>, BackendError> {
    match fetch_single(backend, query).await {
        Ok(row) => Ok(Some(row)),
        Err(BackendError::NoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        id: String,
    }

    #[test]
    fn test_decode_single_requires_exactly_one() {
        assert!(matches!(
            decode_single::<Row>(vec![]),
            Err(BackendError::NoRows)
        ));
        assert!(matches!(
            decode_single::<Row>(vec![json!({"id": "a"}), json!({"id": "b"})]),
            Err(BackendError::InvalidResponse(_))
        ));
        assert_eq!(
            decode_single::<Row>(vec![json!({"id": "a"})]).unwrap(),
            Row { id: "a".into() }
        );
    }

    #[test]
    fn test_decode_rows_reports_shape_errors() {
        let err = decode_rows::<Row>(vec![json!({"name": "x"})]).unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
    }
}
