// SPDX-License-Identifier: MPL-2.0

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::auth::{AuthOptions, AuthStore, AuthSubscription};
use crate::backend::{Backend, BackendError, SupabaseClient};
use crate::config::Config;
use crate::models::{
    Competition, NewCompetition, NewTribe, Post, Tribe, TopicReplyWithUser, TopicWithUser,
};
use crate::routes::{self, Navigation};
use crate::storage::{SqliteStorage, StateStorage, StorageError};
use crate::stores::{CompetitionStore, PostStore, StoreError, TopicStore, TribeStore};

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("failed to open state storage: {0}")]
    Storage(#[from] StorageError),
    #[error("failed to create backend client: {0}")]
    Backend(#[from] BackendError),
}

/// The composition root: one backend, one auth subscription, and every
/// state container built on them.
pub struct HashTribe {
    subscription: Arc<AuthSubscription>,
    auth: Arc<AuthStore>,
    tribes: TribeStore,
    posts: PostStore,
    topics: TopicStore,
    competitions: CompetitionStore,
}

impl HashTribe {
    pub fn new(
        backend: Arc<dyn Backend>,
        storage: Arc<dyn StateStorage>,
        options: AuthOptions,
    ) -> Self {
        let subscription = Arc::new(AuthSubscription::new(backend.clone()));
        let auth = AuthStore::new(backend.clone(), storage, subscription.clone(), options);

        Self {
            subscription,
            auth,
            tribes: TribeStore::new(backend.clone()),
            posts: PostStore::new(backend.clone()),
            topics: TopicStore::new(backend.clone()),
            competitions: CompetitionStore::new(backend),
        }
    }

    /// Wire the HTTP backend and durable SQLite state from configuration.
    pub fn connect(config: &Config) -> Result<Self, ConnectError> {
        let storage: Arc<dyn StateStorage> = match &config.state_path {
            Some(path) => Arc::new(SqliteStorage::open(path)?),
            None => Arc::new(SqliteStorage::open_default()?),
        };
        let backend = SupabaseClient::from_config(config, Some(storage.clone()))?;
        info!(url = %config.supabase_url, "backend client ready");

        Ok(Self::new(
            Arc::new(backend),
            storage,
            AuthOptions::from_config(config),
        ))
    }

    pub fn auth(&self) -> &Arc<AuthStore> {
        &self.auth
    }

    pub fn subscription(&self) -> &AuthSubscription {
        &self.subscription
    }

    pub fn tribes(&self) -> &TribeStore {
        &self.tribes
    }

    pub fn posts(&self) -> &PostStore {
        &self.posts
    }

    pub fn topics(&self) -> &TopicStore {
        &self.topics
    }

    pub fn competitions(&self) -> &CompetitionStore {
        &self.competitions
    }

    /// Run the startup session check.
    pub async fn start(&self) {
        self.auth.initialize().await;
    }

    /// Re-read the session when the app comes back to the foreground.
    /// Returns whether a refresh ran.
    pub async fn on_visibility_change(&self, visible: bool) -> bool {
        let state = self.auth.state();
        if !visible || !state.initialized || state.loading {
            debug!(visible, "skipping session refresh");
            return false;
        }
        self.auth.refresh_session().await;
        true
    }

    pub fn navigate(&self, path: &str) -> Navigation {
        routes::resolve(path, self.auth.session_status())
    }

    fn require_user(&self) -> Result<String, StoreError> {
        self.auth.user_id().ok_or(StoreError::NotLoggedIn)
    }

    pub async fn load_tribes(&self) {
        let user_id = self.auth.user_id();
        self.tribes.fetch_tribes(user_id.as_deref()).await;
    }

    pub async fn load_feed(&self) {
        let user_id = self.auth.user_id();
        self.posts.fetch_feed(user_id.as_deref()).await;
    }

    pub async fn load_tribe_posts(&self, tribe_id: &str) {
        let user_id = self.auth.user_id();
        self.posts.fetch_posts(tribe_id, user_id.as_deref()).await;
    }

    pub async fn create_tribe(&self, new: NewTribe) -> Result<Tribe, StoreError> {
        let user_id = self.require_user()?;
        self.tribes.create_tribe(&user_id, new).await
    }

    pub async fn join_tribe(&self, tribe_id: &str) -> Result<(), StoreError> {
        let user_id = self.require_user()?;
        self.tribes.join_tribe(tribe_id, &user_id).await
    }

    pub async fn leave_tribe(&self, tribe_id: &str) -> Result<(), StoreError> {
        let user_id = self.require_user()?;
        self.tribes.leave_tribe(tribe_id, &user_id).await
    }

    pub async fn create_post(
        &self,
        tribe_id: &str,
        content: &str,
        image_urls: Vec<String>,
    ) -> Result<Post, StoreError> {
        let user_id = self.require_user()?;
        self.posts
            .create_post(tribe_id, &user_id, content, image_urls)
            .await
    }

    pub async fn toggle_like(&self, post_id: &str) -> Result<(), StoreError> {
        let user_id = self.require_user()?;
        self.posts.toggle_like(post_id, &user_id).await
    }

    pub async fn create_topic(
        &self,
        tribe_id: &str,
        title: &str,
        content: &str,
    ) -> Result<TopicWithUser, StoreError> {
        let user_id = self.require_user()?;
        self.topics
            .create_topic(tribe_id, &user_id, title, content)
            .await
    }

    pub async fn create_reply(
        &self,
        topic_id: &str,
        content: &str,
        code_snippet: Option<&str>,
    ) -> Result<TopicReplyWithUser, StoreError> {
        let user_id = self.require_user()?;
        self.topics
            .create_reply(topic_id, &user_id, content, code_snippet)
            .await
    }

    pub async fn create_competition(&self, new: NewCompetition) -> Result<Competition, StoreError> {
        let user_id = self.require_user()?;
        self.competitions.create_competition(&user_id, new).await
    }
}
