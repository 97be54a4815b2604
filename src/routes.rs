// SPDX-License-Identifier: MPL-2.0

//! Client-side route table and the sign-in guard in front of it.

use url::form_urlencoded;

pub const LOGIN_PATH: &str = "/login";
pub const HOME_PATH: &str = "/feed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Login,
    Signup,
    AuthCallback,
    /// `/`, which only ever redirects.
    Root,
    Feed,
    Tribes,
    CreateTribe,
    Tribe { slug: String },
    Topic { topic_id: String },
    Competitions,
    Competition { slug: String },
    Leaderboard,
    Profile { username: String },
    About,
    Careers,
    Privacy,
    Terms,
    NotFound,
}

impl Route {
    /// Match a path (query and fragment ignored, trailing slash tolerated).
    pub fn parse(path: &str) -> Self {
        let (path, _) = split_query(path);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            [] => Route::Root,
            ["login"] => Route::Login,
            ["signup"] => Route::Signup,
            ["auth", "callback"] => Route::AuthCallback,
            ["feed"] => Route::Feed,
            ["tribes"] => Route::Tribes,
            ["tribes", "create"] => Route::CreateTribe,
            ["tribes", "topics", topic_id] => Route::Topic {
                topic_id: topic_id.to_string(),
            },
            ["tribes", slug] => Route::Tribe {
                slug: slug.to_string(),
            },
            ["competitions"] => Route::Competitions,
            ["competitions", slug] => Route::Competition {
                slug: slug.to_string(),
            },
            ["leaderboard"] => Route::Leaderboard,
            ["profile", username] => Route::Profile {
                username: username.to_string(),
            },
            ["about"] => Route::About,
            ["careers"] => Route::Careers,
            ["privacy"] => Route::Privacy,
            ["terms"] => Route::Terms,
            _ => Route::NotFound,
        }
    }

    /// Reachable without a session.
    pub fn is_public(&self) -> bool {
        matches!(
            self,
            Route::Login
                | Route::Signup
                | Route::AuthCallback
                | Route::About
                | Route::Careers
                | Route::Privacy
                | Route::Terms
                | Route::NotFound
        )
    }
}

/// What the guard knows about the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// A persisted snapshot exists but the startup check has not confirmed it.
    Checking,
    SignedOut,
    SignedIn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// Nothing renders until the session check completes.
    Pending,
    Render(Route),
    Redirect(String),
}

/// Decide what to show for `path` given the session status.
pub fn resolve(path: &str, status: SessionStatus) -> Navigation {
    let authenticated = match status {
        SessionStatus::Checking => return Navigation::Pending,
        SessionStatus::SignedOut => false,
        SessionStatus::SignedIn => true,
    };

    let route = Route::parse(path);
    match route {
        Route::Root => Navigation::Redirect(HOME_PATH.to_string()),
        Route::Login | Route::Signup if authenticated => {
            let (_, query) = split_query(path);
            let target = query
                .and_then(redirect_target)
                .unwrap_or_else(|| HOME_PATH.to_string());
            Navigation::Redirect(target)
        }
        route if !route.is_public() && !authenticated => {
            let query = form_urlencoded::Serializer::new(String::new())
                .append_pair("redirect", path)
                .finish();
            Navigation::Redirect(format!("{LOGIN_PATH}?{query}"))
        }
        route => Navigation::Render(route),
    }
}

/// The preserved path from a `redirect=` query, if it stays on this site.
pub fn redirect_target(query: &str) -> Option<String> {
    let query = query.strip_prefix('?').unwrap_or(query);
    let (_, target) = form_urlencoded::parse(query.as_bytes()).find(|(key, _)| key == "redirect")?;

    let local = target.starts_with('/') && !target.starts_with("//") && !target.contains('\\');
    local.then(|| target.into_owned())
}

fn split_query(path: &str) -> (&str, Option<&str>) {
    let path = path.split('#').next().unwrap_or(path);
    match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_routes() {
        assert_eq!(Route::parse("/"), Route::Root);
        assert_eq!(Route::parse("/feed/"), Route::Feed);
        assert_eq!(Route::parse("/tribes/create"), Route::CreateTribe);
        assert_eq!(
            Route::parse("/tribes/rust-weekly-k3x9?tab=topics"),
            Route::Tribe {
                slug: "rust-weekly-k3x9".into()
            }
        );
        assert_eq!(
            Route::parse("/tribes/topics/42"),
            Route::Topic {
                topic_id: "42".into()
            }
        );
        assert_eq!(
            Route::parse("/profile/ada"),
            Route::Profile {
                username: "ada".into()
            }
        );
        assert_eq!(Route::parse("/auth/callback#access_token=x"), Route::AuthCallback);
        assert_eq!(Route::parse("/nope/nope"), Route::NotFound);
    }

    use SessionStatus::{Checking, SignedIn, SignedOut};

    #[test]
    fn test_guard_sends_anonymous_to_login() {
        assert_eq!(
            resolve("/tribes/rust", SignedOut),
            Navigation::Redirect("/login?redirect=%2Ftribes%2Frust".into())
        );
        assert_eq!(
            resolve("/about", SignedOut),
            Navigation::Render(Route::About)
        );
        assert_eq!(
            resolve("/feed", SignedIn),
            Navigation::Render(Route::Feed)
        );
    }

    #[test]
    fn test_nothing_renders_while_checking() {
        assert_eq!(resolve("/feed", Checking), Navigation::Pending);
        assert_eq!(resolve("/about", Checking), Navigation::Pending);
        assert_eq!(resolve("/", Checking), Navigation::Pending);
    }

    #[test]
    fn test_root_goes_to_feed() {
        assert_eq!(resolve("/", SignedIn), Navigation::Redirect("/feed".into()));
        assert_eq!(resolve("/", SignedOut), Navigation::Redirect("/feed".into()));
    }

    #[test]
    fn test_signed_in_user_leaves_login() {
        assert_eq!(
            resolve("/login?redirect=%2Ftribes%2Frust", SignedIn),
            Navigation::Redirect("/tribes/rust".into())
        );
        assert_eq!(resolve("/signup", SignedIn), Navigation::Redirect("/feed".into()));
        assert_eq!(resolve("/login", SignedOut), Navigation::Render(Route::Login));
    }

    #[test]
    fn test_redirect_target_stays_local() {
        assert_eq!(redirect_target("redirect=%2Fleaderboard"), Some("/leaderboard".into()));
        assert_eq!(redirect_target("?redirect=/feed"), Some("/feed".into()));
        assert_eq!(redirect_target("redirect=https%3A%2F%2Fevil.example"), None);
        assert_eq!(redirect_target("redirect=%2F%2Fevil.example"), None);
        assert_eq!(redirect_target("other=1"), None);
    }
}
