// SPDX-License-Identifier: MPL-2.0

//! HTTP client for a Supabase-style backend: GoTrue auth plus PostgREST data.

use crate::backend::{
    AuthEvent, AuthEventKind, Backend, BackendError, OAuthOptions, OAuthProvider, Query,
    SignUpRequest,
};
use crate::config::{CLIENT_NAME, Config, SESSION_STORAGE_KEY, TOKEN_REFRESH_MARGIN_SECS};
use crate::models::{AuthResponse, Session, User};
use crate::storage::StateStorage;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{Value, json};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

const EVENT_CAPACITY: usize = 32;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const NO_ROWS_CODE: &str = "PGRST116";

/// Owns the token material and exposes the backend capabilities over HTTP.
pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: Url,
    anon_key: String,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
    storage: Option<Arc<dyn StateStorage>>,
}

impl SupabaseClient {
    pub fn new(
        base_url: Url,
        anon_key: &str,
        storage: Option<Arc<dyn StateStorage>>,
    ) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("{}/{}", CLIENT_NAME, env!("CARGO_PKG_VERSION")))
            .build()?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let restored = storage.as_deref().and_then(restore_session);
        if let Some(session) = &restored {
            debug!(user_id = %session.user.id, "restored persisted session");
        }

        Ok(Self {
            http,
            base_url,
            anon_key: anon_key.to_string(),
            session: RwLock::new(restored),
            events,
            storage,
        })
    }

    pub fn from_config(
        config: &Config,
        storage: Option<Arc<dyn StateStorage>>,
    ) -> Result<Self, BackendError> {
        Self::new(config.supabase_url.clone(), &config.supabase_anon_key, storage)
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::InvalidResponse(format!("bad endpoint {path}: {e}")))
    }

    fn current(&self) -> Option<Session> {
        self.session.read().expect("session lock poisoned").clone()
    }

    /// Replace the held session and mirror it into durable storage.
    fn store_session(&self, session: Option<Session>) {
        if let Some(storage) = &self.storage {
            let result = match &session {
                Some(s) => serde_json::to_string(s)
                    .map_err(crate::storage::StorageError::from)
                    .and_then(|json| storage.set(SESSION_STORAGE_KEY, &json)),
                None => storage.remove(SESSION_STORAGE_KEY),
            };
            if let Err(e) = result {
                warn!("Failed to persist backend session: {}", e);
            }
        }

        *self.session.write().expect("session lock poisoned") = session;
    }

    fn emit(&self, kind: AuthEventKind, session: Option<Session>) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(AuthEvent::new(kind, session));
    }

    fn request(&self, method: Method, url: Url, bearer: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header("x-application-name", CLIENT_NAME)
            .bearer_auth(bearer)
    }

    /// Access token of a live session, or the anon key for public reads.
    async fn bearer(&self) -> String {
        match self.get_session().await {
            Ok(Some(session)) => session.access_token,
            Ok(None) => self.anon_key.clone(),
            Err(e) => {
                warn!("Falling back to anonymous access: {}", e);
                self.anon_key.clone()
            }
        }
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> Result<Session, BackendError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        let response = self
            .request(Method::POST, url, &self.anon_key)
            .json(&body)
            .send()
            .await?;
        let body = checked_json(response).await.map_err(into_auth_error)?;
        session_from_token_body(body)
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User, BackendError> {
        let url = self.endpoint("auth/v1/user")?;
        let response = self.request(Method::GET, url, access_token).send().await?;
        let body = checked_json(response).await.map_err(into_auth_error)?;
        Ok(serde_json::from_value(body)?)
    }

    fn table_url(&self, table: &str, params: &[(String, String)]) -> Result<Url, BackendError> {
        let mut url = self.endpoint(&format!("rest/v1/{table}"))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl Backend for SupabaseClient {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        let Some(current) = self.current() else {
            return Ok(None);
        };

        let now = chrono::Utc::now().timestamp();
        if !current.expires_within(now, TOKEN_REFRESH_MARGIN_SECS) {
            return Ok(Some(current));
        }

        debug!(user_id = %current.user.id, "access token expiring, refreshing");
        match self
            .token_grant(
                "refresh_token",
                json!({ "refresh_token": current.refresh_token }),
            )
            .await
        {
            Ok(refreshed) => {
                self.store_session(Some(refreshed.clone()));
                self.emit(AuthEventKind::TokenRefreshed, Some(refreshed.clone()));
                Ok(Some(refreshed))
            }
            Err(e @ BackendError::Auth(_)) => {
                warn!("Refresh token rejected, dropping session: {}", e);
                self.store_session(None);
                self.emit(AuthEventKind::SignedOut, None);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        options: OAuthOptions,
    ) -> Result<Url, BackendError> {
        let mut url = self.endpoint("auth/v1/authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", options.redirect_to.as_str())
            .append_pair("scopes", &options.scopes);

        info!(provider = provider.as_str(), "opening OAuth authorize page");
        if let Err(e) = open::that(url.as_str()) {
            warn!("Could not open browser for OAuth: {}", e);
        }

        Ok(url)
    }

    async fn session_from_redirect(&self, callback: &Url) -> Result<Session, BackendError> {
        let tokens = parse_redirect_tokens(callback)?;
        let user = self.fetch_user(&tokens.access_token).await?;

        let session = Session {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: tokens.token_type,
            expires_in: tokens.expires_in,
            expires_at: Some(
                tokens
                    .expires_at
                    .unwrap_or_else(|| chrono::Utc::now().timestamp() + tokens.expires_in),
            ),
            user,
        };

        self.store_session(Some(session.clone()));
        self.emit(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, BackendError> {
        let session = self
            .token_grant("password", json!({ "email": email, "password": password }))
            .await?;

        self.store_session(Some(session.clone()));
        self.emit(AuthEventKind::SignedIn, Some(session.clone()));

        Ok(AuthResponse {
            user: Some(session.user.clone()),
            session: Some(session),
        })
    }

    async fn sign_up(&self, request: SignUpRequest) -> Result<AuthResponse, BackendError> {
        let url = self.endpoint("auth/v1/signup")?;
        let response = self
            .request(Method::POST, url, &self.anon_key)
            .json(&json!({
                "email": request.email,
                "password": request.password,
                "data": request.data,
            }))
            .send()
            .await?;
        let body = checked_json(response).await.map_err(into_auth_error)?;

        // Auto-confirmed projects answer with a session; otherwise with the bare user.
        if body.get("access_token").is_some() {
            let session = session_from_token_body(body)?;
            self.store_session(Some(session.clone()));
            self.emit(AuthEventKind::SignedIn, Some(session.clone()));
            return Ok(AuthResponse {
                user: Some(session.user.clone()),
                session: Some(session),
            });
        }

        let user_value = body.get("user").cloned().unwrap_or(body);
        let user = if user_value.get("id").is_some() {
            Some(serde_json::from_value(user_value)?)
        } else {
            None
        };

        Ok(AuthResponse {
            user,
            session: None,
        })
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        if let Some(session) = self.current() {
            let url = self.endpoint("auth/v1/logout")?;
            let response = self
                .request(Method::POST, url, &session.access_token)
                .send()
                .await?;

            match response.status() {
                s if s.is_success() => {}
                // Token already revoked or expired; the local sign-out still applies.
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                    debug!("session already invalid at sign-out");
                }
                _ => return Err(error_from_response(response).await),
            }
        }

        self.store_session(None);
        self.emit(AuthEventKind::SignedOut, None);
        Ok(())
    }

    async fn select(&self, query: &Query) -> Result<Vec<Value>, BackendError> {
        let url = self.table_url(&query.table, &query.to_params())?;
        let bearer = self.bearer().await;
        let response = self.request(Method::GET, url, &bearer).send().await?;
        rows_from(checked_json(response).await?)
    }

    async fn insert(
        &self,
        table: &str,
        row: Value,
        returning: Option<&str>,
    ) -> Result<Vec<Value>, BackendError> {
        let params = returning
            .map(|cols| Query::table(table).select(cols).to_params())
            .unwrap_or_default();
        let url = self.table_url(table, &params)?;
        let bearer = self.bearer().await;

        let prefer = if returning.is_some() {
            "return=representation"
        } else {
            "return=minimal"
        };
        let response = self
            .request(Method::POST, url, &bearer)
            .header("Prefer", prefer)
            .json(&row)
            .send()
            .await?;

        if returning.is_none() {
            check_status(response).await?;
            return Ok(Vec::new());
        }
        rows_from(checked_json(response).await?)
    }

    async fn update(&self, query: &Query, changes: Value) -> Result<Vec<Value>, BackendError> {
        let mut params = vec![("select".to_string(), query.columns.clone())];
        params.extend(query.filter_params());
        let url = self.table_url(&query.table, &params)?;
        let bearer = self.bearer().await;

        let response = self
            .request(Method::PATCH, url, &bearer)
            .header("Prefer", "return=representation")
            .json(&changes)
            .send()
            .await?;
        rows_from(checked_json(response).await?)
    }

    async fn delete(&self, query: &Query) -> Result<(), BackendError> {
        let url = self.table_url(&query.table, &query.filter_params())?;
        let bearer = self.bearer().await;

        let response = self
            .request(Method::DELETE, url, &bearer)
            .header("Prefer", "return=minimal")
            .send()
            .await?;
        check_status(response).await
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value, BackendError> {
        let url = self.endpoint(&format!("rest/v1/rpc/{function}"))?;
        let bearer = self.bearer().await;

        let response = self
            .request(Method::POST, url, &bearer)
            .json(&args)
            .send()
            .await?;
        checked_json(response).await
    }
}

fn restore_session(storage: &dyn StateStorage) -> Option<Session> {
    match storage.get(SESSION_STORAGE_KEY) {
        Ok(Some(json)) => match serde_json::from_str(&json) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Discarding unreadable persisted session: {}", e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!("Failed to read persisted session: {}", e);
            None
        }
    }
}

/// Token-endpoint body → session, filling `expires_at` when the server omits it.
fn session_from_token_body(body: Value) -> Result<Session, BackendError> {
    let mut session: Session = serde_json::from_value(body)?;
    if session.expires_at.is_none() {
        session.expires_at = Some(chrono::Utc::now().timestamp() + session.expires_in);
    }
    Ok(session)
}

fn rows_from(body: Value) -> Result<Vec<Value>, BackendError> {
    match body {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        object @ Value::Object(_) => Ok(vec![object]),
        other => Err(BackendError::InvalidResponse(format!(
            "expected rows, got {other}"
        ))),
    }
}

async fn check_status(response: Response) -> Result<(), BackendError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(error_from_response(response).await)
    }
}

/// Successful body as JSON; an empty body (204) is `Null`.
async fn checked_json(response: Response) -> Result<Value, BackendError> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

async fn error_from_response(response: Response) -> BackendError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or(Value::Null);
    api_error(status, &body)
}

/// Normalise PostgREST (`code`/`message`) and GoTrue
/// (`error`/`error_description`, `error_code`/`msg`) error bodies.
fn api_error(status: u16, body: &Value) -> BackendError {
    let code = body
        .get("error_code")
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| match body.get("code") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .or_else(|| body.get("error").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| status.to_string());

    if code == NO_ROWS_CODE {
        return BackendError::NoRows;
    }

    let message = ["message", "error_description", "msg"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(String::from)
        .unwrap_or_else(|| format!("HTTP {status}"));

    BackendError::Api {
        status,
        code,
        message,
    }
}

/// Client errors from auth endpoints mean bad credentials or a bad token.
fn into_auth_error(err: BackendError) -> BackendError {
    match err {
        BackendError::Api {
            status, message, ..
        } if (400..500).contains(&status) => BackendError::Auth(message),
        other => other,
    }
}

/// Tokens carried by an OAuth callback URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub expires_at: Option<i64>,
}

/// Read tokens from the fragment (implicit flow) or, failing that, the query.
pub fn parse_redirect_tokens(callback: &Url) -> Result<RedirectTokens, BackendError> {
    let source = callback
        .fragment()
        .filter(|f| !f.is_empty())
        .or_else(|| callback.query())
        .unwrap_or_default();

    let mut access_token = None;
    let mut refresh_token = None;
    let mut token_type = "bearer".to_string();
    let mut expires_in = 3600;
    let mut expires_at = None;
    let mut error = None;

    for (key, value) in url::form_urlencoded::parse(source.as_bytes()) {
        match key.as_ref() {
            "access_token" => access_token = Some(value.into_owned()),
            "refresh_token" => refresh_token = Some(value.into_owned()),
            "token_type" => token_type = value.into_owned(),
            "expires_in" => expires_in = value.parse().unwrap_or(expires_in),
            "expires_at" => expires_at = value.parse().ok(),
            "error_description" => error = Some(value.into_owned()),
            "error" if error.is_none() => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(BackendError::Auth(error));
    }

    match (access_token, refresh_token) {
        (Some(access_token), Some(refresh_token)) => Ok(RedirectTokens {
            access_token,
            refresh_token,
            token_type,
            expires_in,
            expires_at,
        }),
        _ => Err(BackendError::Auth(
            "callback URL carries no session tokens".to_string(),
        )),
    }
}
