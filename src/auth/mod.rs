// SPDX-License-Identifier: MPL-2.0

mod store;
mod subscription;

pub use store::{AuthOptions, AuthState, AuthStore};
pub use subscription::AuthSubscription;

use crate::backend::BackendError;
use crate::validate::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("no profile loaded")]
    NoProfile,
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
