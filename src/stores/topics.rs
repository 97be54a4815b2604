// SPDX-License-Identifier: MPL-2.0

use crate::backend::{Backend, BackendError, Query, decode_single, fetch_all, fetch_single};
use crate::models::{TopicReplyWithUser, TopicWithUser};
use crate::stores::{StoreError, read_failure};
use crate::validate;
use serde_json::{Value, json};
use std::sync::{Arc, RwLock};
use tracing::{error, warn};

const TOPIC_COLUMNS: &str =
    "*, user:users!topics_created_by_fkey(username, display_name, avatar_url)";
const REPLY_COLUMNS: &str =
    "*, user:users!topic_replies_created_by_fkey(username, display_name, avatar_url)";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicState {
    pub topics: Vec<TopicWithUser>,
    pub current_topic: Option<TopicWithUser>,
    /// Replies of `current_topic`, oldest first.
    pub replies: Vec<TopicReplyWithUser>,
    pub loading: bool,
    pub error: Option<String>,
}

impl TopicState {
    fn adjust_reply_count(&mut self, topic_id: &str, delta: i64) {
        let topics = self
            .topics
            .iter_mut()
            .chain(self.current_topic.as_mut())
            .filter(|t| t.topic.id == topic_id);
        for topic in topics {
            topic.topic.reply_count = (topic.topic.reply_count + delta).max(0);
        }
    }
}

pub struct TopicStore {
    backend: Arc<dyn Backend>,
    state: RwLock<TopicState>,
}

impl TopicStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            state: RwLock::new(TopicState::default()),
        }
    }

    pub fn state(&self) -> TopicState {
        self.state.read().expect("topic state lock poisoned").clone()
    }

    fn update<F: FnOnce(&mut TopicState)>(&self, change: F) {
        change(&mut self.state.write().expect("topic state lock poisoned"));
    }

    pub async fn fetch_topics(&self, tribe_id: &str) {
        self.update(|s| {
            s.loading = true;
            s.error = None;
        });

        let query = Query::table("topics")
            .select(TOPIC_COLUMNS)
            .eq("tribe_id", tribe_id)
            .order("created_at", false);
        match fetch_all::<TopicWithUser>(self.backend.as_ref(), &query).await {
            Ok(topics) => self.update(|s| {
                s.topics = topics;
                s.loading = false;
            }),
            Err(e) => {
                let message = read_failure("fetch topics", &e);
                self.update(|s| {
                    s.loading = false;
                    s.error = Some(message);
                });
            }
        }
    }

    /// Load a topic and its replies; the displayed reply count is the
    /// number of replies actually returned.
    pub async fn fetch_topic_by_id(&self, topic_id: &str) {
        self.update(|s| {
            s.loading = true;
            s.error = None;
        });

        match self.load_topic(topic_id).await {
            Ok((topic, replies)) => self.update(|s| {
                s.current_topic = Some(topic);
                s.replies = replies;
                s.loading = false;
            }),
            Err(e) => {
                let message = read_failure("fetch topic", &e);
                self.update(|s| {
                    s.loading = false;
                    s.error = Some(message);
                });
            }
        }
    }

    async fn load_topic(
        &self,
        topic_id: &str,
    ) -> Result<(TopicWithUser, Vec<TopicReplyWithUser>), BackendError> {
        let query = Query::table("topics")
            .select(TOPIC_COLUMNS)
            .eq("id", topic_id);
        let mut topic: TopicWithUser = fetch_single(self.backend.as_ref(), &query).await?;

        let query = Query::table("topic_replies")
            .select(REPLY_COLUMNS)
            .eq("topic_id", topic_id)
            .order("created_at", true);
        let replies: Vec<TopicReplyWithUser> = fetch_all(self.backend.as_ref(), &query).await?;

        topic.topic.reply_count = replies.len() as i64;
        Ok((topic, replies))
    }

    pub async fn create_topic(
        &self,
        tribe_id: &str,
        user_id: &str,
        title: &str,
        content: &str,
    ) -> Result<TopicWithUser, StoreError> {
        validate::topic(title, content)?;

        let row = json!({
            "tribe_id": tribe_id,
            "title": title,
            "content": content,
            "created_by": user_id,
        });
        let rows = self
            .backend
            .insert("topics", row, Some(TOPIC_COLUMNS))
            .await
            .map_err(|e| {
                error!("Error creating topic: {}", e);
                e
            })?;
        let mut topic: TopicWithUser = decode_single(rows)?;
        topic.topic.reply_count = 0;

        self.update(|s| s.topics.insert(0, topic.clone()));
        Ok(topic)
    }

    pub async fn create_reply(
        &self,
        topic_id: &str,
        user_id: &str,
        content: &str,
        code_snippet: Option<&str>,
    ) -> Result<TopicReplyWithUser, StoreError> {
        validate::reply(content)?;

        let row = json!({
            "topic_id": topic_id,
            "content": content,
            "code_snippet": code_snippet,
            "created_by": user_id,
        });
        let rows = self
            .backend
            .insert("topic_replies", row, Some(REPLY_COLUMNS))
            .await
            .map_err(|e| {
                error!("Error creating reply: {}", e);
                e
            })?;
        let reply: TopicReplyWithUser = decode_single(rows)?;

        if let Err(e) = self
            .backend
            .rpc("increment_topic_reply_count", json!({ "topic_id": topic_id }))
            .await
        {
            warn!("Failed to bump reply count for topic {}: {}", topic_id, e);
        }

        self.update(|s| {
            s.replies.push(reply.clone());
            s.adjust_reply_count(topic_id, 1);
        });
        Ok(reply)
    }

    pub async fn delete_topic(&self, topic_id: &str) -> Result<(), StoreError> {
        let query = Query::table("topics").eq("id", topic_id);
        self.backend.delete(&query).await.map_err(|e| {
            error!("Error deleting topic: {}", e);
            e
        })?;

        self.update(|s| {
            s.topics.retain(|t| t.topic.id != topic_id);
            if s.current_topic.as_ref().is_some_and(|t| t.topic.id == topic_id) {
                s.current_topic = None;
                s.replies.clear();
            }
        });
        Ok(())
    }

    /// Delete a displayed reply. Unknown ids are ignored.
    pub async fn delete_reply(&self, reply_id: &str) -> Result<(), StoreError> {
        let topic_id = {
            let state = self.state.read().expect("topic state lock poisoned");
            match state.replies.iter().find(|r| r.reply.id == reply_id) {
                Some(reply) => reply.reply.topic_id.clone(),
                None => return Ok(()),
            }
        };

        let query = Query::table("topic_replies").eq("id", reply_id);
        self.backend.delete(&query).await.map_err(|e| {
            error!("Error deleting reply: {}", e);
            e
        })?;

        if let Err(e) = self
            .backend
            .rpc("decrement_topic_reply_count", json!({ "topic_id": topic_id }))
            .await
        {
            warn!("Failed to lower reply count for topic {}: {}", topic_id, e);
        }

        self.update(|s| {
            s.replies.retain(|r| r.reply.id != reply_id);
            s.adjust_reply_count(&topic_id, -1);
        });
        Ok(())
    }

    /// Add one upvote. Failures are logged and otherwise ignored.
    pub async fn upvote_topic(&self, topic_id: &str) {
        let known = {
            let state = self.state.read().expect("topic state lock poisoned");
            state
                .topics
                .iter()
                .chain(state.current_topic.as_ref())
                .any(|t| t.topic.id == topic_id)
        };
        if !known {
            return;
        }

        match self
            .backend
            .rpc("increment_topic_upvotes", json!({ "topic_id": topic_id }))
            .await
        {
            Ok(value) => self.update(|s| {
                let topics = s
                    .topics
                    .iter_mut()
                    .chain(s.current_topic.as_mut())
                    .filter(|t| t.topic.id == topic_id);
                for topic in topics {
                    topic.topic.upvotes = upvotes_from(&value, topic.topic.upvotes);
                }
            }),
            Err(e) => error!("Error upvoting topic: {}", e),
        }
    }

    pub async fn upvote_reply(&self, reply_id: &str) {
        let known = self
            .state
            .read()
            .expect("topic state lock poisoned")
            .replies
            .iter()
            .any(|r| r.reply.id == reply_id);
        if !known {
            return;
        }

        match self
            .backend
            .rpc("increment_reply_upvotes", json!({ "reply_id": reply_id }))
            .await
        {
            Ok(value) => self.update(|s| {
                if let Some(reply) = s.replies.iter_mut().find(|r| r.reply.id == reply_id) {
                    reply.reply.upvotes = upvotes_from(&value, reply.reply.upvotes);
                }
            }),
            Err(e) => error!("Error upvoting reply: {}", e),
        }
    }
}

/// The counter functions return the new total; fall back to a local bump.
fn upvotes_from(value: &Value, previous: i64) -> i64 {
    value.as_i64().unwrap_or(previous + 1)
}
