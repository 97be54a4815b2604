// SPDX-License-Identifier: MPL-2.0

use crate::backend::{Backend, BackendError, Query, decode_single, fetch_all};
use crate::config::FEED_LIMIT;
use crate::models::Post;
use crate::stores::{StoreError, read_failure};
use crate::validate;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, warn};

const POST_COLUMNS: &str = "*, \
    user:users!posts_user_id_fkey(username, display_name, avatar_url), \
    tribe:tribes(name, slug, visibility)";

/// Which list the container currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostScope {
    /// Newest posts across all tribes.
    Feed,
    Tribe(String),
}

impl PostScope {
    fn describe(&self) -> &'static str {
        match self {
            PostScope::Feed => "fetch feed",
            PostScope::Tribe(_) => "fetch posts",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostState {
    pub posts: Vec<Post>,
    pub scope: Option<PostScope>,
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LikeRow {
    post_id: String,
}

pub struct PostStore {
    backend: Arc<dyn Backend>,
    state: RwLock<PostState>,
    /// Posts with a like toggle awaiting the backend.
    in_flight: Mutex<HashSet<String>>,
    /// Bumped per list load; a response for an older load is dropped.
    generation: AtomicU64,
}

impl PostStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            state: RwLock::new(PostState::default()),
            in_flight: Mutex::new(HashSet::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> PostState {
        self.state.read().expect("post state lock poisoned").clone()
    }

    fn update<F: FnOnce(&mut PostState)>(&self, change: F) {
        change(&mut self.state.write().expect("post state lock poisoned"));
    }

    pub fn is_like_pending(&self, post_id: &str) -> bool {
        self.in_flight
            .lock()
            .expect("like set lock poisoned")
            .contains(post_id)
    }

    /// Posts in one tribe, newest first.
    pub async fn fetch_posts(&self, tribe_id: &str, user_id: Option<&str>) {
        self.load(PostScope::Tribe(tribe_id.to_string()), user_id)
            .await;
    }

    /// The cross-tribe feed, newest first, capped at [`FEED_LIMIT`].
    pub async fn fetch_feed(&self, user_id: Option<&str>) {
        self.load(PostScope::Feed, user_id).await;
    }

    async fn load(&self, scope: PostScope, user_id: Option<&str>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.update(|s| {
            s.scope = Some(scope.clone());
            s.loading = true;
            s.error = None;
        });

        let result = self.load_posts(&scope, user_id).await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(?scope, "dropping superseded post list");
            return;
        }

        match result {
            Ok(posts) => self.update(|s| {
                s.posts = posts;
                s.loading = false;
            }),
            Err(e) => {
                let message = read_failure(scope.describe(), &e);
                self.update(|s| {
                    s.loading = false;
                    s.error = Some(message);
                });
            }
        }
    }

    async fn load_posts(
        &self,
        scope: &PostScope,
        user_id: Option<&str>,
    ) -> Result<Vec<Post>, BackendError> {
        let mut query = Query::table("posts").select(POST_COLUMNS);
        query = match scope {
            PostScope::Feed => query.order("created_at", false).limit(FEED_LIMIT),
            PostScope::Tribe(tribe_id) => query
                .eq("tribe_id", tribe_id.as_str())
                .order("created_at", false),
        };

        let mut posts: Vec<Post> = fetch_all(self.backend.as_ref(), &query).await?;
        for post in &mut posts {
            post.liked_by_user = false;
        }

        if let Some(user_id) = user_id.filter(|_| !posts.is_empty()) {
            let query = Query::table("post_likes")
                .select("post_id")
                .eq("user_id", user_id)
                .in_list("post_id", posts.iter().map(|p| p.id.clone()));
            let liked: HashSet<String> = fetch_all::<LikeRow>(self.backend.as_ref(), &query)
                .await?
                .into_iter()
                .map(|row| row.post_id)
                .collect();
            for post in &mut posts {
                post.liked_by_user = liked.contains(&post.id);
            }
        }

        Ok(posts)
    }

    /// Publish a post, then reload whatever list is on screen.
    pub async fn create_post(
        &self,
        tribe_id: &str,
        user_id: &str,
        content: &str,
        image_urls: Vec<String>,
    ) -> Result<Post, StoreError> {
        validate::post(content)?;

        let row = json!({
            "tribe_id": tribe_id,
            "user_id": user_id,
            "content": content,
            "image_urls": image_urls,
        });
        let rows = self
            .backend
            .insert("posts", row, Some("*"))
            .await
            .map_err(|e| {
                error!("Error creating post: {}", e);
                e
            })?;
        let post: Post = decode_single(rows)?;

        let scope = self
            .state
            .read()
            .expect("post state lock poisoned")
            .scope
            .clone()
            .unwrap_or_else(|| PostScope::Tribe(tribe_id.to_string()));
        self.load(scope, Some(user_id)).await;
        Ok(post)
    }

    pub async fn delete_post(&self, post_id: &str) -> Result<(), StoreError> {
        let query = Query::table("posts").eq("id", post_id);
        self.backend.delete(&query).await.map_err(|e| {
            error!("Error deleting post: {}", e);
            e
        })?;

        self.update(|s| s.posts.retain(|p| p.id != post_id));
        Ok(())
    }

    /// Flip the viewer's like on a displayed post.
    ///
    /// The flip shows immediately; the join row and the counter follow. On
    /// failure only this post goes back to its pre-toggle values. A toggle
    /// for a post that already has one pending is ignored.
    pub async fn toggle_like(&self, post_id: &str, user_id: &str) -> Result<(), StoreError> {
        let Some((was_liked, was_count)) = self.flip_like(post_id) else {
            return Ok(());
        };

        let result = self.persist_like(post_id, user_id, !was_liked).await;
        self.in_flight
            .lock()
            .expect("like set lock poisoned")
            .remove(post_id);

        match result {
            Ok(count) => {
                if let Some(count) = count {
                    self.update(|s| {
                        if let Some(post) = s.posts.iter_mut().find(|p| p.id == post_id) {
                            post.likes_count = count;
                        }
                    });
                }
                Ok(())
            }
            Err(e) => {
                error!("Error toggling like: {}", e);
                self.update(|s| {
                    if let Some(post) = s.posts.iter_mut().find(|p| p.id == post_id) {
                        post.liked_by_user = was_liked;
                        post.likes_count = was_count;
                    }
                });
                Err(e.into())
            }
        }
    }

    /// Apply the optimistic flip and mark the post in flight. Returns the
    /// pre-toggle `(liked, count)`, or `None` if nothing should happen.
    fn flip_like(&self, post_id: &str) -> Option<(bool, i64)> {
        let mut state = self.state.write().expect("post state lock poisoned");
        let post = state.posts.iter_mut().find(|p| p.id == post_id)?;

        let mut in_flight = self.in_flight.lock().expect("like set lock poisoned");
        if !in_flight.insert(post_id.to_string()) {
            debug!(post_id, "like toggle already pending");
            return None;
        }

        let before = (post.liked_by_user, post.likes_count);
        post.liked_by_user = !before.0;
        post.likes_count = if before.0 {
            (before.1 - 1).max(0)
        } else {
            before.1 + 1
        };
        Some(before)
    }

    /// Write the join row and move the counter. Returns the server's count
    /// when the counter function reports one.
    async fn persist_like(
        &self,
        post_id: &str,
        user_id: &str,
        like: bool,
    ) -> Result<Option<i64>, BackendError> {
        let likes = Query::table("post_likes")
            .eq("post_id", post_id)
            .eq("user_id", user_id);

        if like {
            self.backend
                .insert(
                    "post_likes",
                    json!({ "post_id": post_id, "user_id": user_id }),
                    None,
                )
                .await?;
        } else {
            self.backend.delete(&likes).await?;
        }

        let function = if like {
            "increment_likes"
        } else {
            "decrement_likes"
        };
        match self.backend.rpc(function, json!({ "row_id": post_id })).await {
            Ok(value) => Ok(count_from(&value)),
            Err(e) => {
                // keep the join row consistent with the counter we failed to move
                let undo = if like {
                    self.backend.delete(&likes).await
                } else {
                    self.backend
                        .insert(
                            "post_likes",
                            json!({ "post_id": post_id, "user_id": user_id }),
                            None,
                        )
                        .await
                        .map(|_| ())
                };
                if let Err(undo_err) = undo {
                    warn!("Failed to undo like row after counter error: {}", undo_err);
                }
                Err(e)
            }
        }
    }
}

/// Counter functions may return the new count bare or as `[{"likes_count": n}]`.
fn count_from(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::Array(rows) => rows.first().and_then(|row| row.get("likes_count")?.as_i64()),
        Value::Object(row) => row.get("likes_count")?.as_i64(),
        _ => None,
    }
}
