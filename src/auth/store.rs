// SPDX-License-Identifier: MPL-2.0

use crate::auth::{AuthError, AuthSubscription};
use crate::backend::{
    AuthEvent, AuthEventKind, Backend, BackendError, OAuthOptions, OAuthProvider, Query,
    SignUpRequest, decode_single, fetch_optional,
};
use crate::config::{AUTH_STORAGE_KEY, Config, ProfilePoll};
use crate::models::{AuthResponse, ProfileUpdate, Session, User, UserProfile};
use crate::routes::SessionStatus;
use crate::storage::StateStorage;
use crate::validate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

/// Who is signed in, as far as this process knows.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    pub user: Option<User>,
    pub profile: Option<UserProfile>,
    pub session: Option<Session>,
    /// An auth operation is in flight.
    pub loading: bool,
    /// The startup session check has completed once.
    pub initialized: bool,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            user: None,
            profile: None,
            session: None,
            loading: true,
            initialized: false,
        }
    }
}

impl AuthState {
    /// A rehydrated identity counts only once the startup check confirms it.
    pub fn status(&self) -> SessionStatus {
        if !self.initialized && self.loading {
            SessionStatus::Checking
        } else if self.user.is_some() {
            SessionStatus::SignedIn
        } else {
            SessionStatus::SignedOut
        }
    }

    fn clear_identity(&mut self) {
        self.user = None;
        self.profile = None;
        self.session = None;
    }
}

/// The persisted slice; lifecycle flags are deliberately absent.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedAuth {
    user: Option<User>,
    profile: Option<UserProfile>,
    session: Option<Session>,
}

#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// OAuth callback, `<site>/auth/callback`.
    pub redirect_to: Url,
    pub profile_poll: ProfilePoll,
}

impl AuthOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            redirect_to: config.auth_callback_url(),
            profile_poll: ProfilePoll::default(),
        }
    }
}

/// Auth state container: identity, profile row and token snapshot.
pub struct AuthStore {
    backend: Arc<dyn Backend>,
    storage: Arc<dyn StateStorage>,
    subscription: Arc<AuthSubscription>,
    options: AuthOptions,
    state: RwLock<AuthState>,
    /// Bumped on every sign-out; profile waits started earlier are void.
    sign_outs: AtomicU64,
}

impl AuthStore {
    /// Build the container, rehydrating the persisted slice. A rehydrated
    /// snapshot is never trusted: the container starts un-initialized.
    pub fn new(
        backend: Arc<dyn Backend>,
        storage: Arc<dyn StateStorage>,
        subscription: Arc<AuthSubscription>,
        options: AuthOptions,
    ) -> Arc<Self> {
        let persisted = match storage.get(AUTH_STORAGE_KEY) {
            Ok(Some(json)) => serde_json::from_str::<PersistedAuth>(&json).unwrap_or_else(|e| {
                error!("Error hydrating auth state: {}", e);
                PersistedAuth::default()
            }),
            Ok(None) => PersistedAuth::default(),
            Err(e) => {
                error!("Error reading persisted auth state: {}", e);
                PersistedAuth::default()
            }
        };

        let state = AuthState {
            user: persisted.user,
            profile: persisted.profile,
            session: persisted.session,
            ..AuthState::default()
        };

        Arc::new(Self {
            backend,
            storage,
            subscription,
            options,
            state: RwLock::new(state),
            sign_outs: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> AuthState {
        self.state.read().expect("auth state lock poisoned").clone()
    }

    pub fn session_status(&self) -> SessionStatus {
        self.state.read().expect("auth state lock poisoned").status()
    }

    /// The confirmed signed-in user; `None` while a snapshot is unchecked.
    pub fn user_id(&self) -> Option<String> {
        let state = self.state.read().expect("auth state lock poisoned");
        match state.status() {
            SessionStatus::SignedIn => state.user.as_ref().map(|u| u.id.clone()),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session_status() == SessionStatus::SignedIn
    }

    /// Apply a change and write the persisted slice.
    fn update<F: FnOnce(&mut AuthState)>(&self, change: F) {
        let snapshot = {
            let mut state = self.state.write().expect("auth state lock poisoned");
            change(&mut state);
            PersistedAuth {
                user: state.user.clone(),
                profile: state.profile.clone(),
                session: state.session.clone(),
            }
        };

        let result = serde_json::to_string(&snapshot)
            .map_err(crate::storage::StorageError::from)
            .and_then(|json| self.storage.set(AUTH_STORAGE_KEY, &json));
        if let Err(e) = result {
            warn!("Failed to persist auth state: {}", e);
        }
    }

    /// Run the startup session check once. Later calls only clear `loading`.
    pub async fn initialize(self: &Arc<Self>) {
        {
            let mut state = self.state.write().expect("auth state lock poisoned");
            if state.initialized {
                state.loading = false;
                return;
            }
        }

        match self.load_identity().await {
            Ok((session, profile)) => {
                info!(user_id = ?session.as_ref().map(|s| &s.user.id), "auth initialized");
                self.update(|state| {
                    state.user = session.as_ref().map(|s| s.user.clone());
                    state.session = session;
                    state.profile = profile;
                    state.loading = false;
                    state.initialized = true;
                });

                let store = Arc::downgrade(self);
                self.subscription.subscribe(move |event| {
                    let store = store.clone();
                    async move {
                        if let Some(store) = store.upgrade() {
                            store.handle_event(event).await;
                        }
                    }
                });
            }
            Err(e) => {
                error!("Error initializing auth: {}", e);
                self.update(|state| {
                    state.clear_identity();
                    state.loading = false;
                    state.initialized = true;
                });
            }
        }
    }

    async fn load_identity(&self) -> Result<(Option<Session>, Option<UserProfile>), BackendError> {
        let session = self.backend.get_session().await?;
        let profile = match &session {
            Some(session) => self.fetch_profile_logged(&session.user.id).await,
            None => None,
        };
        Ok((session, profile))
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<UserProfile>, BackendError> {
        fetch_optional(
            self.backend.as_ref(),
            &Query::table("users").eq("id", user_id),
        )
        .await
    }

    /// Profile lookup where failure means "no profile yet".
    async fn fetch_profile_logged(&self, user_id: &str) -> Option<UserProfile> {
        match self.fetch_profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                error!("Error fetching profile: {}", e);
                None
            }
        }
    }

    /// Poll for the profile row the backend creates after sign-up.
    async fn wait_for_profile(&self, user_id: &str) -> Option<UserProfile> {
        let poll = self.options.profile_poll;
        for attempt in 0..poll.attempts {
            tokio::time::sleep(poll.delay_for(attempt)).await;
            if let Some(profile) = self.fetch_profile_logged(user_id).await {
                debug!(user_id, attempt, "profile row appeared");
                return Some(profile);
            }
        }
        warn!(user_id, "profile row still missing after {} attempts", poll.attempts);
        None
    }

    async fn handle_event(&self, event: AuthEvent) {
        let Some(session) = event.session else {
            self.update(|state| {
                state.clear_identity();
                state.loading = false;
            });
            return;
        };

        let epoch = self.sign_outs.load(Ordering::SeqCst);
        let user_id = session.user.id.clone();
        let profile = self.fetch_profile_logged(&user_id).await;
        let missing = profile.is_none();
        self.update(|state| {
            state.user = Some(session.user.clone());
            state.session = Some(session);
            state.profile = profile;
            state.loading = false;
        });

        if missing && event.kind == AuthEventKind::SignedIn {
            if let Some(profile) = self.wait_for_profile(&user_id).await {
                self.set_profile_for(&user_id, epoch, profile);
            }
        }
    }

    /// Set the profile only if no sign-out happened since `epoch` and
    /// `user_id` is still the signed-in user.
    fn set_profile_for(&self, user_id: &str, epoch: u64, profile: UserProfile) {
        self.update(|state| {
            if self.sign_outs.load(Ordering::SeqCst) != epoch {
                debug!(user_id, "signed out while waiting, dropping profile");
                return;
            }
            let current = state.user.as_ref().map(|u| u.id.as_str());
            if current.is_none() || current == Some(user_id) {
                state.profile = Some(profile);
            }
        });
    }

    pub async fn sign_in_with_github(&self) -> Result<Url, AuthError> {
        self.sign_in_with_oauth(OAuthProvider::GitHub).await
    }

    pub async fn sign_in_with_google(&self) -> Result<Url, AuthError> {
        self.sign_in_with_oauth(OAuthProvider::Google).await
    }

    /// Starts the redirect; state arrives later through the auth event.
    async fn sign_in_with_oauth(&self, provider: OAuthProvider) -> Result<Url, AuthError> {
        let options = OAuthOptions {
            redirect_to: self.options.redirect_to.clone(),
            scopes: provider.default_scopes().to_string(),
        };
        self.backend
            .sign_in_with_oauth(provider, options)
            .await
            .map_err(|e| {
                error!("Error signing in with {}: {}", provider.as_str(), e);
                AuthError::from(e)
            })
    }

    /// Finish the OAuth redirect from the callback URL.
    pub async fn complete_oauth_redirect(&self, callback: &Url) -> Result<Session, AuthError> {
        self.backend
            .session_from_redirect(callback)
            .await
            .map_err(|e| {
                error!("Error completing OAuth redirect: {}", e);
                AuthError::from(e)
            })
    }

    pub async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let response = self
            .backend
            .sign_in_with_password(email, password)
            .await
            .map_err(|e| {
                error!("Error signing in with email: {}", e);
                AuthError::from(e)
            })?;

        if let Some(user) = response.user {
            let profile = self.fetch_profile_logged(&user.id).await;
            self.update(|state| {
                state.user = Some(user);
                state.session = response.session;
                state.profile = profile;
            });
        }
        Ok(())
    }

    /// Create the identity, then wait (bounded) for its profile row.
    pub async fn sign_up_with_email(
        &self,
        email: &str,
        password: &str,
        username: &str,
        full_name: &str,
    ) -> Result<AuthResponse, AuthError> {
        validate::sign_up(email, password, username, full_name)?;

        let mut data = Map::new();
        data.insert("username".to_string(), Value::from(username));
        data.insert("full_name".to_string(), Value::from(full_name));

        let epoch = self.sign_outs.load(Ordering::SeqCst);
        let response = self
            .backend
            .sign_up(SignUpRequest {
                email: email.to_string(),
                password: password.to_string(),
                data,
            })
            .await
            .map_err(|e| {
                error!("Error signing up: {}", e);
                AuthError::from(e)
            })?;

        if let Some(user) = &response.user {
            if let Some(profile) = self.wait_for_profile(&user.id).await {
                self.set_profile_for(&user.id, epoch, profile);
            }
        }
        Ok(response)
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.subscription.unsubscribe();

        self.backend.sign_out().await.map_err(|e| {
            error!("Error signing out: {}", e);
            AuthError::from(e)
        })?;

        self.update(|state| {
            self.sign_outs.fetch_add(1, Ordering::SeqCst);
            state.clear_identity();
            state.initialized = false;
        });
        Ok(())
    }

    pub async fn update_profile(&self, updates: ProfileUpdate) -> Result<UserProfile, AuthError> {
        let profile_id = self
            .state()
            .profile
            .map(|p| p.id)
            .ok_or(AuthError::NoProfile)?;

        let changes = serde_json::to_value(&updates).map_err(BackendError::from)?;
        let rows = self
            .backend
            .update(&Query::table("users").eq("id", profile_id.as_str()), changes)
            .await
            .map_err(|e| {
                error!("Error updating profile: {}", e);
                AuthError::from(e)
            })?;

        let profile: UserProfile = decode_single(rows)?;
        self.update(|state| state.profile = Some(profile.clone()));
        Ok(profile)
    }

    /// Re-read the session snapshot, e.g. after the app regains focus.
    pub async fn refresh_session(&self) {
        self.update(|state| state.loading = true);

        match self.backend.get_session().await {
            Ok(Some(session)) => {
                let profile = self.fetch_profile_logged(&session.user.id).await;
                self.update(|state| {
                    state.user = Some(session.user.clone());
                    state.session = Some(session);
                    state.profile = profile;
                    state.loading = false;
                });
            }
            Ok(None) => self.update(|state| {
                state.clear_identity();
                state.loading = false;
            }),
            Err(e) => {
                error!("Error in refresh_session: {}", e);
                self.update(|state| state.loading = false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{FakeBackend, profile_row, test_session, test_user};
    use crate::storage::MemoryStorage;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn quick_poll() -> AuthOptions {
        AuthOptions {
            redirect_to: Url::parse("http://localhost:5173/auth/callback").unwrap(),
            profile_poll: ProfilePoll {
                attempts: 4,
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
            },
        }
    }

    fn store_with(backend: Arc<FakeBackend>, storage: Arc<MemoryStorage>) -> Arc<AuthStore> {
        let subscription = Arc::new(AuthSubscription::new(backend.clone()));
        AuthStore::new(backend, storage, subscription, quick_poll())
    }

    #[tokio::test]
    async fn test_initialize_fetches_session_once() {
        let backend = FakeBackend::new();
        backend.set_session(Some(test_session(test_user("u1"))));
        backend.seed("users", vec![profile_row("u1", "ada")]);
        let store = store_with(backend.clone(), Arc::new(MemoryStorage::new()));

        store.initialize().await;
        store.initialize().await;

        assert_eq!(backend.session_calls.load(Ordering::SeqCst), 1);
        let state = store.state();
        assert!(state.initialized);
        assert!(!state.loading);
        assert_eq!(state.profile.unwrap().username, "ada");
        assert_eq!(state.user.unwrap().id, "u1");
    }

    #[tokio::test]
    async fn test_initialize_failure_still_completes() {
        let backend = FakeBackend::new();
        backend.fail("get_session");
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(
                AUTH_STORAGE_KEY,
                &serde_json::json!({
                    "user": test_user("stale"),
                    "profile": null,
                    "session": test_session(test_user("stale")),
                })
                .to_string(),
            )
            .unwrap();
        let store = store_with(backend.clone(), storage);

        store.initialize().await;

        let state = store.state();
        assert!(state.initialized);
        assert!(!state.loading);
        assert!(state.user.is_none());
        assert!(state.session.is_none());
        assert_eq!(backend.listener_registrations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rehydration_forces_revalidation() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(
                AUTH_STORAGE_KEY,
                &serde_json::json!({
                    "user": test_user("u1"),
                    "profile": profile_row("u1", "ada"),
                    "session": test_session(test_user("u1")),
                    "loading": false,
                    "initialized": true,
                })
                .to_string(),
            )
            .unwrap();

        let store = store_with(FakeBackend::new(), storage);
        let state = store.state();
        assert!(state.loading);
        assert!(!state.initialized);
        assert_eq!(state.user.unwrap().id, "u1");
        assert_eq!(state.profile.unwrap().username, "ada");
    }

    #[tokio::test]
    async fn test_rehydrated_identity_unconfirmed_until_initialized() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(
                AUTH_STORAGE_KEY,
                &serde_json::json!({
                    "user": test_user("ghost"),
                    "profile": null,
                    "session": test_session(test_user("ghost")),
                })
                .to_string(),
            )
            .unwrap();
        let store = store_with(FakeBackend::new(), storage);

        assert_eq!(store.session_status(), SessionStatus::Checking);
        assert!(!store.is_authenticated());
        assert_eq!(store.user_id(), None);

        store.initialize().await;
        assert_eq!(store.session_status(), SessionStatus::SignedOut);
        assert_eq!(store.user_id(), None);
    }

    #[tokio::test]
    async fn test_confirmed_session_is_signed_in() {
        let backend = FakeBackend::new();
        backend.set_session(Some(test_session(test_user("u1"))));
        let store = store_with(backend, Arc::new(MemoryStorage::new()));

        store.initialize().await;
        assert_eq!(store.session_status(), SessionStatus::SignedIn);
        assert_eq!(store.user_id().as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_ignored() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(AUTH_STORAGE_KEY, "{not json").unwrap();
        let store = store_with(FakeBackend::new(), storage);
        assert_eq!(store.state(), AuthState::default());
    }

    #[tokio::test]
    async fn test_sign_in_with_email_sets_profile() {
        let backend = FakeBackend::new();
        backend.add_account("ada@example.com", "Secr3t!pw", test_user("u1"));
        backend.seed("users", vec![profile_row("u1", "ada")]);
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(backend, storage.clone());

        store
            .sign_in_with_email("ada@example.com", "Secr3t!pw")
            .await
            .unwrap();

        let state = store.state();
        assert_eq!(state.user.unwrap().id, "u1");
        assert!(state.session.is_some());
        assert_eq!(state.profile.unwrap().username, "ada");

        let persisted = storage.get(AUTH_STORAGE_KEY).unwrap().unwrap();
        assert!(persisted.contains("\"username\":\"ada\""));
        assert!(!persisted.contains("initialized"));
    }

    #[tokio::test]
    async fn test_bad_credentials_leave_state_alone() {
        let backend = FakeBackend::new();
        backend.add_account("ada@example.com", "Secr3t!pw", test_user("u1"));
        let store = store_with(backend, Arc::new(MemoryStorage::new()));

        let err = store
            .sign_in_with_email("ada@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Backend(BackendError::Auth(_))));
        assert!(store.state().user.is_none());
    }

    #[tokio::test]
    async fn test_sign_up_waits_for_delayed_profile() {
        let backend = FakeBackend::new();
        *backend.profile_trigger.lock().unwrap() = false;
        let store = store_with(backend.clone(), Arc::new(MemoryStorage::new()));

        let late = backend.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(12)).await;
            late.seed("users", vec![profile_row("id-1", "grace")]);
        });

        let response = store
            .sign_up_with_email("grace@example.com", "Hopper#1906", "grace", "Grace Hopper")
            .await
            .unwrap();

        let user = response.user.unwrap();
        assert_eq!(user.id, "id-1");
        assert_eq!(user.metadata_str("full_name"), Some("Grace Hopper"));
        assert_eq!(store.state().profile.unwrap().username, "grace");
    }

    #[tokio::test]
    async fn test_sign_up_gives_up_after_bounded_poll() {
        let backend = FakeBackend::new();
        *backend.profile_trigger.lock().unwrap() = false;
        let store = store_with(backend.clone(), Arc::new(MemoryStorage::new()));

        store
            .sign_up_with_email("x@example.com", "Hopper#1906", "xavier", "Xavier")
            .await
            .unwrap();

        assert!(store.state().profile.is_none());
        assert_eq!(backend.select_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_sign_out_drops_profile_from_earlier_sign_up() {
        let backend = FakeBackend::new();
        *backend.profile_trigger.lock().unwrap() = false;
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(backend.clone(), storage.clone());

        let signing_up = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .sign_up_with_email("grace@example.com", "Hopper#1906", "grace", "Grace Hopper")
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.sign_out().await.unwrap();
        backend.seed("users", vec![profile_row("id-1", "grace")]);

        signing_up.await.unwrap().unwrap();

        let state = store.state();
        assert!(state.user.is_none());
        assert!(state.profile.is_none());
        let persisted = storage.get(AUTH_STORAGE_KEY).unwrap().unwrap();
        assert!(!persisted.contains("grace"));
    }

    #[tokio::test]
    async fn test_sign_up_rejects_weak_password() {
        let store = store_with(FakeBackend::new(), Arc::new(MemoryStorage::new()));
        let err = store
            .sign_up_with_email("x@example.com", "password", "xavier", "Xavier")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn test_sign_out_clears_identity() {
        let backend = FakeBackend::new();
        backend.set_session(Some(test_session(test_user("u1"))));
        backend.seed("users", vec![profile_row("u1", "ada")]);
        let subscription = Arc::new(AuthSubscription::new(backend.clone()));
        let store = AuthStore::new(
            backend.clone(),
            Arc::new(MemoryStorage::new()),
            subscription.clone(),
            quick_poll(),
        );

        store.initialize().await;
        assert!(subscription.is_subscribed());

        store.sign_out().await.unwrap();

        let state = store.state();
        assert!(state.user.is_none());
        assert!(state.profile.is_none());
        assert!(state.session.is_none());
        assert!(!state.initialized);
        assert!(!subscription.is_subscribed());
    }

    #[tokio::test]
    async fn test_sign_out_failure_keeps_identity() {
        let backend = FakeBackend::new();
        backend.set_session(Some(test_session(test_user("u1"))));
        backend.fail("sign_out");
        let store = store_with(backend, Arc::new(MemoryStorage::new()));

        store.initialize().await;
        assert!(store.sign_out().await.is_err());
        assert!(store.state().user.is_some());
    }

    #[tokio::test]
    async fn test_update_profile_requires_profile() {
        let store = store_with(FakeBackend::new(), Arc::new(MemoryStorage::new()));
        let err = store
            .update_profile(ProfileUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NoProfile));
    }

    #[tokio::test]
    async fn test_update_profile_replaces_row() {
        let backend = FakeBackend::new();
        backend.set_session(Some(test_session(test_user("u1"))));
        backend.seed("users", vec![profile_row("u1", "ada")]);
        let store = store_with(backend, Arc::new(MemoryStorage::new()));
        store.initialize().await;

        let profile = store
            .update_profile(ProfileUpdate {
                bio: Some("Analytical engines".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(profile.bio.as_deref(), Some("Analytical engines"));
        assert_eq!(
            store.state().profile.unwrap().bio.as_deref(),
            Some("Analytical engines")
        );
    }

    #[tokio::test]
    async fn test_auth_events_drive_state() {
        let backend = FakeBackend::new();
        let store = store_with(backend.clone(), Arc::new(MemoryStorage::new()));
        store.initialize().await;
        assert!(store.state().user.is_none());

        backend.seed("users", vec![profile_row("u2", "linus")]);
        backend.emit(
            AuthEventKind::SignedIn,
            Some(test_session(test_user("u2"))),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        let state = store.state();
        assert_eq!(state.user.unwrap().id, "u2");
        assert_eq!(state.profile.unwrap().username, "linus");

        backend.emit(AuthEventKind::SignedOut, None);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.state().user.is_none());
    }

    #[tokio::test]
    async fn test_refresh_session_swallows_errors() {
        let backend = FakeBackend::new();
        let store = store_with(backend.clone(), Arc::new(MemoryStorage::new()));
        store.initialize().await;

        backend.fail("get_session");
        store.refresh_session().await;
        assert!(!store.state().loading);

        backend.recover("get_session");
        backend.set_session(Some(test_session(test_user("u3"))));
        store.refresh_session().await;
        let state = store.state();
        assert!(!state.loading);
        assert_eq!(state.user.unwrap().id, "u3");
        assert!(state.profile.is_none());
    }

    #[tokio::test]
    async fn test_oauth_uses_callback_and_scopes() {
        let store = store_with(FakeBackend::new(), Arc::new(MemoryStorage::new()));
        let url = store.sign_in_with_github().await.unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("provider".into(), "github".into())));
        assert!(pairs.contains(&(
            "redirect_to".into(),
            "http://localhost:5173/auth/callback".into()
        )));
        assert!(pairs.contains(&("scopes".into(), "read:user user:email".into())));

        let url = store.sign_in_with_google().await.unwrap();
        assert!(url.query_pairs().any(|(k, v)| k == "scopes" && v == "email profile"));
    }
}
