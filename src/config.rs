// SPDX-License-Identifier: MPL-2.0

//! Startup configuration.
//!
//! The two backend values are required; everything else has a default.
//! A missing backend value is fatal: the binary refuses to start.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const APP_NAME: &str = "HashTribe";
/// Sent as `x-application-name` on every backend request.
pub const CLIENT_NAME: &str = "hashtribe";

pub const AUTH_CALLBACK_PATH: &str = "/auth/callback";
pub const DEFAULT_SITE_URL: &str = "http://localhost:5173";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Row cap on the cross-tribe feed query.
pub const FEED_LIMIT: usize = 50;

/// Durable slot holding the `{user, profile, session}` snapshot.
pub const AUTH_STORAGE_KEY: &str = "auth-storage";
/// Durable slot the HTTP client keeps its own token material in.
pub const SESSION_STORAGE_KEY: &str = "supabase.auth.token";

/// Refresh the access token when it expires within this window.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// How long to keep looking for the profile row the backend creates
/// asynchronously after sign-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfilePoll {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ProfilePoll {
    /// Delay before the given zero-based attempt, doubling up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl Default for ProfilePoll {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub supabase_url: Url,
    pub supabase_anon_key: String,
    /// Origin the OAuth provider redirects back to.
    pub site_url: Url,
    /// SQLite file for durable client state; `None` uses the data directory.
    pub state_path: Option<PathBuf>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let raw_url = non_empty("SUPABASE_URL").ok_or(ConfigError::Missing("SUPABASE_URL"))?;
        let supabase_url = Url::parse(raw_url.trim()).map_err(|e| ConfigError::Invalid {
            name: "SUPABASE_URL",
            reason: e.to_string(),
        })?;

        let supabase_anon_key =
            non_empty("SUPABASE_ANON_KEY").ok_or(ConfigError::Missing("SUPABASE_ANON_KEY"))?;

        let raw_site =
            non_empty("HASHTRIBE_SITE_URL").unwrap_or_else(|| DEFAULT_SITE_URL.to_string());
        let site_url = Url::parse(raw_site.trim()).map_err(|e| ConfigError::Invalid {
            name: "HASHTRIBE_SITE_URL",
            reason: e.to_string(),
        })?;

        let state_path = non_empty("HASHTRIBE_STATE_PATH").map(PathBuf::from);
        let log_level =
            non_empty("HASHTRIBE_LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        Ok(Self {
            supabase_url,
            supabase_anon_key: supabase_anon_key.trim().to_string(),
            site_url,
            state_path,
            log_level,
        })
    }

    /// Where the OAuth provider sends the browser after consent.
    pub fn auth_callback_url(&self) -> Url {
        let mut url = self.site_url.clone();
        url.set_path(AUTH_CALLBACK_PATH);
        url.set_query(None);
        url.set_fragment(None);
        url
    }
}
