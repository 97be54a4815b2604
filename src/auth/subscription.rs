// SPDX-License-Identifier: MPL-2.0

use crate::backend::{AuthEvent, Backend};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The one listener on the backend's auth-change stream.
///
/// Owned by the composition root and lent to the auth container; repeated
/// `subscribe` calls while a listener is live register nothing new.
pub struct AuthSubscription {
    backend: Arc<dyn Backend>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AuthSubscription {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            task: Mutex::new(None),
        }
    }

    /// Register `callback` for every future auth event, in delivery order.
    /// Returns `false` (and does nothing) if a listener is already live.
    pub fn subscribe<F, Fut>(&self, callback: F) -> bool
    where
        F: Fn(AuthEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut task = self.task.lock().expect("subscription lock poisoned");
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("auth listener already registered");
            return false;
        }

        let mut events = self.backend.on_auth_state_change();
        *task = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        debug!(kind = ?event.kind, user_id = ?event.session.as_ref().map(|s| &s.user.id), "auth state changed");
                        callback(event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Auth listener fell behind, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
        true
    }

    /// Release the listener so a later `subscribe` registers afresh.
    pub fn unsubscribe(&self) {
        if let Some(handle) = self.task.lock().expect("subscription lock poisoned").take() {
            handle.abort();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.task
            .lock()
            .expect("subscription lock poisoned")
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
