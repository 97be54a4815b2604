// SPDX-License-Identifier: MPL-2.0

use crate::backend::{
    Backend, BackendError, Query, decode_single, fetch_all, fetch_optional, fetch_single,
};
use crate::models::{
    NewTribe, Tribe, TribeMember, TribeRole, TribeUpdate, TribeWithMembership,
};
use crate::slug::unique_slug;
use crate::stores::{StoreError, read_failure, to_row};
use crate::validate;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, error};

const TRIBE_LIST_COLUMNS: &str = "*, tribe_members(count)";
const MEMBER_COLUMNS: &str = "*, users:user_id(username, display_name, avatar_url)";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TribeState {
    pub tribes: Vec<TribeWithMembership>,
    pub current_tribe: Option<Tribe>,
    pub members: Vec<TribeMember>,
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Membership {
    tribe_id: String,
    role: TribeRole,
}

pub struct TribeStore {
    backend: Arc<dyn Backend>,
    state: RwLock<TribeState>,
    /// User the list was last fetched for; list refreshes reuse it.
    viewer: RwLock<Option<String>>,
}

impl TribeStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            state: RwLock::new(TribeState::default()),
            viewer: RwLock::new(None),
        }
    }

    pub fn state(&self) -> TribeState {
        self.state.read().expect("tribe state lock poisoned").clone()
    }

    fn update<F: FnOnce(&mut TribeState)>(&self, change: F) {
        change(&mut self.state.write().expect("tribe state lock poisoned"));
    }

    fn current_tribe_id(&self) -> Option<String> {
        self.state
            .read()
            .expect("tribe state lock poisoned")
            .current_tribe
            .as_ref()
            .map(|t| t.id.clone())
    }

    /// Load every tribe, newest first, with member counts and (when
    /// `user_id` is given) the viewer's membership and role.
    pub async fn fetch_tribes(&self, user_id: Option<&str>) {
        *self.viewer.write().expect("tribe viewer lock poisoned") = user_id.map(str::to_string);
        self.update(|s| {
            s.loading = true;
            s.error = None;
        });

        match self.load_tribes(user_id).await {
            Ok(tribes) => {
                debug!(count = tribes.len(), "tribes loaded");
                self.update(|s| {
                    s.tribes = tribes;
                    s.loading = false;
                });
            }
            Err(e) => {
                let message = read_failure("fetch tribes", &e);
                self.update(|s| {
                    s.loading = false;
                    s.error = Some(message);
                });
            }
        }
    }

    async fn load_tribes(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<TribeWithMembership>, BackendError> {
        let query = Query::table("tribes")
            .select(TRIBE_LIST_COLUMNS)
            .order("created_at", false);
        let rows = self.backend.select(&query).await?;

        let memberships: HashMap<String, TribeRole> = match user_id {
            Some(user_id) => {
                let query = Query::table("tribe_members")
                    .select("tribe_id, role")
                    .eq("user_id", user_id);
                fetch_all::<Membership>(self.backend.as_ref(), &query)
                    .await?
                    .into_iter()
                    .map(|m| (m.tribe_id, m.role))
                    .collect()
            }
            None => HashMap::new(),
        };

        rows.into_iter()
            .map(|row| with_membership(row, &memberships))
            .collect()
    }

    /// Load one tribe, then its members.
    pub async fn fetch_tribe_by_slug(&self, slug: &str) {
        self.update(|s| {
            s.loading = true;
            s.error = None;
        });

        let query = Query::table("tribes").eq("slug", slug);
        match fetch_single::<Tribe>(self.backend.as_ref(), &query).await {
            Ok(tribe) => {
                let tribe_id = tribe.id.clone();
                self.update(|s| {
                    s.current_tribe = Some(tribe);
                    s.loading = false;
                });
                self.fetch_tribe_members(&tribe_id).await;
            }
            Err(e) => {
                let message = read_failure("fetch tribe", &e);
                self.update(|s| {
                    s.loading = false;
                    s.error = Some(message);
                });
            }
        }
    }

    /// Members with their user summary, most recent join first.
    pub async fn fetch_tribe_members(&self, tribe_id: &str) {
        let query = Query::table("tribe_members")
            .select(MEMBER_COLUMNS)
            .eq("tribe_id", tribe_id)
            .order("joined_at", false);

        match fetch_all::<TribeMember>(self.backend.as_ref(), &query).await {
            Ok(members) => self.update(|s| s.members = members),
            Err(e) => {
                let message = read_failure("fetch tribe members", &e);
                self.update(|s| s.error = Some(message));
            }
        }
    }

    pub async fn create_tribe(&self, creator_id: &str, new: NewTribe) -> Result<Tribe, StoreError> {
        validate::tribe(&new.name, &new.description)?;

        let mut row = to_row(&new)?;
        row.insert("slug".to_string(), Value::from(unique_slug(&new.name)));
        row.insert("created_by".to_string(), Value::from(creator_id));

        let rows = self
            .backend
            .insert("tribes", Value::Object(row), Some("*"))
            .await
            .map_err(|e| {
                error!("Error creating tribe: {}", e);
                e
            })?;
        let tribe: Tribe = decode_single(rows)?;

        self.fetch_tribes(Some(creator_id)).await;
        Ok(tribe)
    }

    pub async fn join_tribe(&self, tribe_id: &str, user_id: &str) -> Result<(), StoreError> {
        let row = json!({
            "tribe_id": tribe_id,
            "user_id": user_id,
            "role": TribeRole::Member,
        });
        self.backend
            .insert("tribe_members", row, None)
            .await
            .map_err(|e| {
                error!("Error joining tribe: {}", e);
                e
            })?;

        self.refresh_membership(tribe_id, user_id).await;
        Ok(())
    }

    pub async fn leave_tribe(&self, tribe_id: &str, user_id: &str) -> Result<(), StoreError> {
        let query = Query::table("tribe_members")
            .eq("tribe_id", tribe_id)
            .eq("user_id", user_id);
        self.backend.delete(&query).await.map_err(|e| {
            error!("Error leaving tribe: {}", e);
            e
        })?;

        self.refresh_membership(tribe_id, user_id).await;
        Ok(())
    }

    async fn refresh_membership(&self, tribe_id: &str, user_id: &str) {
        self.fetch_tribes(Some(user_id)).await;
        if self.current_tribe_id().as_deref() == Some(tribe_id) {
            self.fetch_tribe_members(tribe_id).await;
        }
    }

    pub async fn update_tribe(
        &self,
        tribe_id: &str,
        updates: TribeUpdate,
    ) -> Result<(), StoreError> {
        if let Some(name) = &updates.name {
            validate::tribe(name, updates.description.as_deref().unwrap_or(""))?;
        }

        let changes = Value::Object(to_row(&updates)?);
        let query = Query::table("tribes").eq("id", tribe_id);
        self.backend.update(&query, changes).await.map_err(|e| {
            error!("Error updating tribe: {}", e);
            e
        })?;

        if self.current_tribe_id().as_deref() == Some(tribe_id) {
            let reread = fetch_optional::<Tribe>(self.backend.as_ref(), &query).await?;
            if let Some(tribe) = reread {
                self.update(|s| s.current_tribe = Some(tribe));
            }
        }
        Ok(())
    }

    pub async fn delete_tribe(&self, tribe_id: &str) -> Result<(), StoreError> {
        let query = Query::table("tribes").eq("id", tribe_id);
        self.backend.delete(&query).await.map_err(|e| {
            error!("Error deleting tribe: {}", e);
            e
        })?;

        let viewer = self.viewer.read().expect("tribe viewer lock poisoned").clone();
        self.fetch_tribes(viewer.as_deref()).await;
        self.update(|s| s.current_tribe = None);
        Ok(())
    }
}

/// Merge a raw `tribes` row (with its `tribe_members(count)` embed) with the
/// viewer's memberships.
fn with_membership(
    row: Value,
    memberships: &HashMap<String, TribeRole>,
) -> Result<TribeWithMembership, BackendError> {
    let member_count = row
        .get("tribe_members")
        .and_then(|embed| embed.get(0))
        .and_then(|first| first.get("count"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let tribe: Tribe = serde_json::from_value(row)?;
    let user_role = memberships.get(&tribe.id).copied();

    Ok(TribeWithMembership {
        member_count,
        is_member: user_role.is_some(),
        user_role,
        tribe,
    })
}
