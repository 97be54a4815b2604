// SPDX-License-Identifier: MPL-2.0

//! In-memory backend for tests.
//!
//! Tables are lists of JSON rows. Filters, ordering and limits are evaluated
//! locally; projections and embeds are ignored, so seed rows carry their
//! embedded objects directly.

use crate::backend::{
    AuthEvent, AuthEventKind, Backend, BackendError, Filter, OAuthOptions, OAuthProvider, Query,
    SignUpRequest,
};
use crate::models::{AuthResponse, Session, User};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use tokio::sync::{Notify, broadcast};
use url::Url;

pub struct FakeBackend {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    session: Mutex<Option<Session>>,
    accounts: Mutex<HashMap<String, (String, User)>>,
    events: broadcast::Sender<AuthEvent>,
    failures: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    rpc_log: Mutex<Vec<(String, Value)>>,
    next_id: AtomicUsize,
    /// Whether sign-up creates the `users` profile row, like the server trigger.
    pub profile_trigger: Mutex<bool>,
    pub session_calls: AtomicUsize,
    pub listener_registrations: AtomicUsize,
    pub select_calls: AtomicUsize,
}

impl Default for FakeBackend {
    fn default() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            tables: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            accounts: Mutex::new(HashMap::new()),
            events,
            failures: Mutex::new(HashSet::new()),
            gates: Mutex::new(HashMap::new()),
            rpc_log: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            profile_trigger: Mutex::new(true),
            session_calls: AtomicUsize::new(0),
            listener_registrations: AtomicUsize::new(0),
            select_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Make an operation fail, keyed like `select:posts`, `insert:post_likes`,
    /// `rpc:increment_likes`, `get_session`, `sign_out`.
    pub fn fail(&self, op: &str) {
        self.failures.lock().unwrap().insert(op.to_string());
    }

    pub fn recover(&self, op: &str) {
        self.failures.lock().unwrap().remove(op);
    }

    /// Hold an operation until the returned handle is notified.
    pub fn hold(&self, op: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(op.to_string(), notify.clone());
        notify
    }

    pub fn rpc_calls(&self) -> Vec<(String, Value)> {
        self.rpc_log.lock().unwrap().clone()
    }

    pub fn add_account(&self, email: &str, password: &str, user: User) {
        self.accounts
            .lock()
            .unwrap()
            .insert(email.to_string(), (password.to_string(), user));
    }

    pub fn set_session(&self, session: Option<Session>) {
        *self.session.lock().unwrap() = session;
    }

    pub fn emit(&self, kind: AuthEventKind, session: Option<Session>) {
        let _ = self.events.send(AuthEvent::new(kind, session));
    }

    async fn enter(&self, op: &str) -> Result<(), BackendError> {
        let gate = self.gates.lock().unwrap().remove(op);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.failures.lock().unwrap().contains(op) {
            return Err(BackendError::Network(format!("{op} failed")));
        }
        Ok(())
    }

    fn fresh_id(&self) -> String {
        format!("id-{}", self.next_id.fetch_add(1, AtomicOrdering::SeqCst))
    }

    fn adjust_counter(&self, table: &str, id: &Value, column: &str, delta: i64) -> Value {
        let mut tables = self.tables.lock().unwrap();
        let Some(rows) = tables.get_mut(table) else {
            return Value::Null;
        };
        for row in rows.iter_mut() {
            if row.get("id") == Some(id) {
                let current = row.get(column).and_then(Value::as_i64).unwrap_or(0);
                let next = (current + delta).max(0);
                row[column] = json!(next);
                return json!(next);
            }
        }
        Value::Null
    }
}

pub fn test_user(id: &str) -> User {
    User {
        id: id.to_string(),
        email: Some(format!("{id}@example.com")),
        user_metadata: Map::new(),
        created_at: None,
    }
}

pub fn test_session(user: User) -> Session {
    Session {
        access_token: format!("access-{}", user.id),
        refresh_token: format!("refresh-{}", user.id),
        token_type: "bearer".to_string(),
        expires_in: 3600,
        expires_at: Some(chrono::Utc::now().timestamp() + 3600),
        user,
    }
}

pub fn profile_row(id: &str, username: &str) -> Value {
    json!({
        "id": id,
        "username": username,
        "display_name": null,
        "bio": null,
        "avatar_url": null,
        "devcom_score": 0,
        "created_at": "2025-01-01T00:00:00Z",
        "updated_at": "2025-01-01T00:00:00Z"
    })
}

fn matches(filters: &[Filter], row: &Value) -> bool {
    filters.iter().all(|filter| match filter {
        Filter::Eq(column, value) => row.get(column) == Some(value),
        Filter::Neq(column, value) => row.get(column) != Some(value),
        Filter::In(column, values) => row.get(column).is_some_and(|v| values.contains(v)),
    })
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        self.session_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.enter("get_session").await?;
        Ok(self.session.lock().unwrap().clone())
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent> {
        self.listener_registrations
            .fetch_add(1, AtomicOrdering::SeqCst);
        self.events.subscribe()
    }

    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        options: OAuthOptions,
    ) -> Result<Url, BackendError> {
        self.enter("sign_in_with_oauth").await?;
        let mut url = Url::parse("https://fake.supabase.co/auth/v1/authorize").unwrap();
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", options.redirect_to.as_str())
            .append_pair("scopes", &options.scopes);
        Ok(url)
    }

    async fn session_from_redirect(&self, callback: &Url) -> Result<Session, BackendError> {
        self.enter("session_from_redirect").await?;
        let tokens = crate::backend::parse_redirect_tokens(callback)?;
        let mut session = test_session(test_user("oauth-user"));
        session.access_token = tokens.access_token;
        session.refresh_token = tokens.refresh_token;
        self.set_session(Some(session.clone()));
        self.emit(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, BackendError> {
        self.enter("sign_in_with_password").await?;
        let account = self.accounts.lock().unwrap().get(email).cloned();
        match account {
            Some((expected, user)) if expected == password => {
                let session = test_session(user.clone());
                self.set_session(Some(session.clone()));
                self.emit(AuthEventKind::SignedIn, Some(session.clone()));
                Ok(AuthResponse {
                    user: Some(user),
                    session: Some(session),
                })
            }
            _ => Err(BackendError::Auth("Invalid login credentials".to_string())),
        }
    }

    async fn sign_up(&self, request: SignUpRequest) -> Result<AuthResponse, BackendError> {
        self.enter("sign_up").await?;
        if self.accounts.lock().unwrap().contains_key(&request.email) {
            return Err(BackendError::Auth("User already registered".to_string()));
        }

        let mut user = test_user(&self.fresh_id());
        user.email = Some(request.email.clone());
        user.user_metadata = request.data.clone();
        self.add_account(&request.email, &request.password, user.clone());

        if *self.profile_trigger.lock().unwrap() {
            let username = request
                .data
                .get("username")
                .and_then(Value::as_str)
                .unwrap_or("anonymous");
            self.seed("users", vec![profile_row(&user.id, username)]);
        }

        Ok(AuthResponse {
            user: Some(user),
            session: None,
        })
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.enter("sign_out").await?;
        self.set_session(None);
        self.emit(AuthEventKind::SignedOut, None);
        Ok(())
    }

    async fn select(&self, query: &Query) -> Result<Vec<Value>, BackendError> {
        self.select_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.enter(&format!("select:{}", query.table)).await?;

        let mut rows: Vec<Value> = self
            .rows(&query.table)
            .into_iter()
            .filter(|row| matches(&query.filters, row))
            .collect();

        for order in query.order.iter().rev() {
            rows.sort_by(|a, b| {
                let ord = compare(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                );
                if order.ascending { ord } else { ord.reverse() }
            });
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(
        &self,
        table: &str,
        mut row: Value,
        returning: Option<&str>,
    ) -> Result<Vec<Value>, BackendError> {
        self.enter(&format!("insert:{table}")).await?;

        if let Value::Object(map) = &mut row {
            if !map.contains_key("id") && table != "tribe_members" && table != "post_likes" {
                map.insert("id".to_string(), json!(self.fresh_id()));
            }
            let now = chrono::Utc::now().to_rfc3339();
            map.entry("created_at").or_insert_with(|| json!(now));
            if table == "tribe_members" {
                map.entry("joined_at").or_insert_with(|| json!(now));
            }
        }

        self.seed(table, vec![row.clone()]);
        Ok(if returning.is_some() { vec![row] } else { Vec::new() })
    }

    async fn update(&self, query: &Query, changes: Value) -> Result<Vec<Value>, BackendError> {
        self.enter(&format!("update:{}", query.table)).await?;

        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(query.table.clone()).or_default();
        let mut updated = Vec::new();
        for row in rows.iter_mut().filter(|row| matches(&query.filters, row)) {
            if let (Value::Object(target), Value::Object(changes)) = (&mut *row, &changes) {
                for (key, value) in changes {
                    target.insert(key.clone(), value.clone());
                }
            }
            updated.push(row.clone());
        }
        Ok(updated)
    }

    async fn delete(&self, query: &Query) -> Result<(), BackendError> {
        self.enter(&format!("delete:{}", query.table)).await?;

        let mut tables = self.tables.lock().unwrap();
        if let Some(rows) = tables.get_mut(&query.table) {
            rows.retain(|row| !matches(&query.filters, row));
        }
        Ok(())
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value, BackendError> {
        self.rpc_log
            .lock()
            .unwrap()
            .push((function.to_string(), args.clone()));
        self.enter(&format!("rpc:{function}")).await?;

        let value = match function {
            "increment_likes" => self.adjust_counter("posts", &args["row_id"], "likes_count", 1),
            "decrement_likes" => self.adjust_counter("posts", &args["row_id"], "likes_count", -1),
            "increment_topic_reply_count" => {
                self.adjust_counter("topics", &args["topic_id"], "reply_count", 1)
            }
            "decrement_topic_reply_count" => {
                self.adjust_counter("topics", &args["topic_id"], "reply_count", -1)
            }
            "increment_topic_upvotes" => {
                self.adjust_counter("topics", &args["topic_id"], "upvotes", 1)
            }
            "increment_reply_upvotes" => {
                self.adjust_counter("topic_replies", &args["reply_id"], "upvotes", 1)
            }
            _ => Value::Null,
        };
        Ok(value)
    }
}
