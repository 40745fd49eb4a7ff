//! Session credentials and login redirects.
//!
//! One `SessionStore` is shared by every tab of a browser profile, so clearing
//! it after an unauthorized response signs all of them out.

use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionCredentials {
    /// User access token.
    pub token: Option<String>,
    /// User refresh token.
    pub refresh_token: Option<String>,
    /// Admin access token.
    pub admin_token: Option<String>,
    /// Admin refresh token.
    pub admin_refresh_token: Option<String>,
    /// Signed-in user id.
    pub user_id: Option<String>,
}

#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<SessionCredentials>>,
}

impl SessionStore {
    pub fn new(credentials: SessionCredentials) -> Self {
        Self {
            inner: Arc::new(Mutex::new(credentials)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionCredentials> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn snapshot(&self) -> SessionCredentials {
        self.lock().clone()
    }

    /// Token sent as `Authorization: Bearer ...`, if signed in.
    pub fn bearer_token(&self) -> Option<String> {
        self.lock()
            .token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    }

    /// Drop every credential of the profile, user and admin alike.
    pub fn clear(&self) {
        *self.lock() = SessionCredentials::default();
        tracing::info!("session credentials cleared");
    }
}

/// Navigation to the login surface, with the reason shown to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginRedirect {
    pub location: String,
    pub reason: String,
}

impl LoginRedirect {
    pub fn new(login_path: &str, reason: &str) -> Self {
        let path = if login_path.trim().is_empty() {
            "/login"
        } else {
            login_path.trim()
        };
        let sep = if path.contains('?') { '&' } else { '?' };
        Self {
            location: format!("{path}{sep}reason={}", urlencoding::encode(reason)),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_in() -> SessionStore {
        SessionStore::new(SessionCredentials {
            token: Some("tok".to_string()),
            refresh_token: Some("refresh".to_string()),
            admin_token: Some("admin".to_string()),
            admin_refresh_token: Some("admin-refresh".to_string()),
            user_id: Some("17".to_string()),
        })
    }

    #[test]
    fn clear_removes_all_credentials() {
        let store = signed_in();
        store.clear();
        assert_eq!(store.snapshot(), SessionCredentials::default());
        assert!(store.bearer_token().is_none());
    }

    #[test]
    fn bearer_token_ignores_blank_values() {
        let store = SessionStore::new(SessionCredentials {
            token: Some("   ".to_string()),
            ..SessionCredentials::default()
        });
        assert!(store.bearer_token().is_none());
        let padded = SessionStore::new(SessionCredentials {
            token: Some(" abc ".to_string()),
            ..SessionCredentials::default()
        });
        assert_eq!(padded.bearer_token().as_deref(), Some("abc"));
    }

    #[test]
    fn clones_share_one_store() {
        let store = signed_in();
        let other_tab = store.clone();
        other_tab.clear();
        assert!(store.bearer_token().is_none());
    }

    #[test]
    fn login_redirect_encodes_reason() {
        let redirect = LoginRedirect::new("/login", "session expired & denied");
        assert_eq!(redirect.location, "/login?reason=session%20expired%20%26%20denied");
        assert_eq!(redirect.reason, "session expired & denied");
    }

    #[test]
    fn login_redirect_appends_to_existing_query() {
        let redirect = LoginRedirect::new("/login?from=player", "expired");
        assert_eq!(redirect.location, "/login?from=player&reason=expired");
    }

    #[test]
    fn login_redirect_defaults_blank_path() {
        assert_eq!(LoginRedirect::new("  ", "x").location, "/login?reason=x");
    }
}
