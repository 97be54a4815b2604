// SPDX-License-Identifier: MPL-2.0

use crate::backend::{Backend, Query, decode_single, fetch_all, fetch_single};
use crate::models::{Competition, CompetitionStatus, NewCompetition};
use crate::slug::unique_slug;
use crate::stores::{StoreError, read_failure};
use crate::validate::{self, ValidationError};
use serde_json::json;
use std::sync::{Arc, RwLock};
use tracing::error;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompetitionState {
    pub competitions: Vec<Competition>,
    pub current_competition: Option<Competition>,
    pub loading: bool,
    pub error: Option<String>,
}

pub struct CompetitionStore {
    backend: Arc<dyn Backend>,
    state: RwLock<CompetitionState>,
}

impl CompetitionStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            state: RwLock::new(CompetitionState::default()),
        }
    }

    pub fn state(&self) -> CompetitionState {
        self.state
            .read()
            .expect("competition state lock poisoned")
            .clone()
    }

    fn update<F: FnOnce(&mut CompetitionState)>(&self, change: F) {
        change(&mut self.state.write().expect("competition state lock poisoned"));
    }

    /// Published competitions, soonest start first. Drafts are hidden.
    pub async fn fetch_competitions(&self) {
        self.update(|s| {
            s.loading = true;
            s.error = None;
        });

        let query = Query::table("competitions")
            .neq("status", "draft")
            .order("start_time", true);
        match fetch_all::<Competition>(self.backend.as_ref(), &query).await {
            Ok(competitions) => self.update(|s| {
                s.competitions = competitions;
                s.loading = false;
            }),
            Err(e) => {
                let message = read_failure("fetch competitions", &e);
                self.update(|s| {
                    s.loading = false;
                    s.error = Some(message);
                });
            }
        }
    }

    /// The previous detail is cleared first so a failed load never shows
    /// a stale competition.
    pub async fn fetch_competition_by_slug(&self, slug: &str) {
        self.update(|s| {
            s.loading = true;
            s.error = None;
            s.current_competition = None;
        });

        let query = Query::table("competitions").eq("slug", slug);
        match fetch_single::<Competition>(self.backend.as_ref(), &query).await {
            Ok(competition) => self.update(|s| {
                s.current_competition = Some(competition);
                s.loading = false;
            }),
            Err(e) => {
                let message = read_failure("fetch competition", &e);
                self.update(|s| {
                    s.loading = false;
                    s.error = Some(message);
                });
            }
        }
    }

    pub async fn create_competition(
        &self,
        user_id: &str,
        new: NewCompetition,
    ) -> Result<Competition, StoreError> {
        validate::competition(&new.title, &new.description)?;
        if new.end_time <= new.start_time {
            return Err(ValidationError::Invalid {
                field: "end time",
                reason: "must be after the start time",
            }
            .into());
        }

        let row = json!({
            "title": new.title,
            "description": new.description,
            "difficulty": new.difficulty,
            "start_time": new.start_time,
            "end_time": new.end_time,
            "slug": unique_slug(&new.title),
            "status": CompetitionStatus::Upcoming,
            "created_by": user_id,
        });
        let rows = self
            .backend
            .insert("competitions", row, Some("*"))
            .await
            .map_err(|e| {
                error!("Error creating competition: {}", e);
                e
            })?;
        let competition: Competition = decode_single(rows)?;

        self.update(|s| s.competitions.insert(0, competition.clone()));
        Ok(competition)
    }
}
