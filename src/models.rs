// SPDX-License-Identifier: MPL-2.0

//! Row mirrors of the backend's tables.
//!
//! These are cached, possibly stale copies; the backend is authoritative.
//! Decoupled from any wire representation so the containers own their types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Authentication identity as issued by the backend's auth service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Auxiliary claims supplied at sign-up (`username`, `full_name`) or by the
    /// OAuth provider.
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.user_metadata.get(key).and_then(Value::as_str)
    }
}

/// Token material owned by the backend client; the app only reads snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// True when the access token is gone or about to go within `margin_secs`.
    pub fn expires_within(&self, now: i64, margin_secs: i64) -> bool {
        match self.expires_at {
            Some(at) => at - margin_secs <= now,
            None => false,
        }
    }
}

/// Result of a password grant or sign-up.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthResponse {
    pub user: Option<User>,
    /// Absent when sign-up is waiting for email confirmation.
    pub session: Option<Session>,
}

/// Application-level user row in `users`, keyed by the auth identity id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub github_username: Option<String>,
    #[serde(default)]
    pub github_id: Option<i64>,
    #[serde(default)]
    pub devcom_score: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial profile update; unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Author columns embedded through a foreign-key join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TribeVisibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TribeRole {
    Admin,
    Moderator,
    Member,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tribe {
    pub id: String,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub visibility: TribeVisibility,
    pub created_by: String,
    #[serde(default)]
    pub is_official: bool,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub rules: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A tribe plus the per-viewer fields computed client-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TribeWithMembership {
    #[serde(flatten)]
    pub tribe: Tribe,
    pub member_count: u64,
    pub is_member: bool,
    pub user_role: Option<TribeRole>,
}

/// Membership row; identity is the `(tribe_id, user_id)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TribeMember {
    pub tribe_id: String,
    pub user_id: String,
    pub role: TribeRole,
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub users: Option<UserSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTribe {
    pub name: String,
    pub description: String,
    pub visibility: TribeVisibility,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TribeUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<TribeVisibility>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Tribe columns embedded on a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostTribe {
    pub name: String,
    pub slug: String,
    pub visibility: TribeVisibility,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub tribe_id: String,
    pub user_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub image_urls: Option<Vec<String>>,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Denormalized count of `post_likes` rows.
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub replies_count: i64,
    #[serde(default)]
    pub reposts_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: Option<UserSummary>,
    #[serde(default)]
    pub tribe: Option<PostTribe>,
    /// Computed from `post_likes` for the viewing user; never stored remotely.
    #[serde(default)]
    pub liked_by_user: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub tribe_id: String,
    pub title: String,
    pub content: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub upvotes: i64,
    /// Maintained remotely by the reply-count functions.
    #[serde(default)]
    pub reply_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicWithUser {
    #[serde(flatten)]
    pub topic: Topic,
    #[serde(default)]
    pub user: Option<UserSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicReply {
    pub id: String,
    pub topic_id: String,
    pub content: String,
    #[serde(default)]
    pub code_snippet: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub upvotes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicReplyWithUser {
    #[serde(flatten)]
    pub reply: TopicReply,
    #[serde(default)]
    pub user: Option<UserSummary>,
}

/// Displayed only; transitions happen on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompetitionStatus {
    Draft,
    Upcoming,
    Live,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompetitionDifficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competition {
    pub id: String,
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub description: String,
    pub difficulty: CompetitionDifficulty,
    pub status: CompetitionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub created_by: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub participant_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCompetition {
    pub title: String,
    pub description: String,
    pub difficulty: CompetitionDifficulty,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}
