// SPDX-License-Identifier: MPL-2.0

//! Domain state containers: one per feature area, each a snapshot behind a
//! lock plus the async operations that keep it in sync with the backend.
//!
//! Reads fail soft: the error is logged, its message lands in the
//! container's `error` field, and whatever was displayed stays. Writes
//! return their error to the caller.

mod competitions;
mod posts;
mod topics;
mod tribes;

pub use competitions::{CompetitionState, CompetitionStore};
pub use posts::{PostScope, PostState, PostStore};
pub use topics::{TopicState, TopicStore};
pub use tribes::{TribeState, TribeStore};

use crate::backend::BackendError;
use crate::validate::ValidationError;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("you must be signed in to do that")]
    NotLoggedIn,
}

/// Log a failed read and produce the message stored on the container.
fn read_failure(action: &str, err: &BackendError) -> String {
    let message = format!("Failed to {action}: {err}");
    error!("{}", message);
    message
}

/// Serialize a write payload into a JSON object row.
fn to_row<T: Serialize>(value: &T) -> Result<serde_json::Map<String, Value>, BackendError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(BackendError::InvalidResponse(format!(
            "expected an object row, got {other}"
        ))),
    }
}
