//! Session extraction and authorization.
//!
//! Authentication itself lives outside this crate; handlers receive a
//! `Session` resolved through the narrow `SessionAuthenticator` interface.
//! Mutating handlers additionally check the CSRF header captured at
//! extraction time.

use super::state::ServerState;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::IntoResponse,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use std::collections::HashSet;

pub const COOKIE_SESSION_TOKEN_KEY: &str = "session_token";
pub const HEADER_SESSION_TOKEN_KEY: &str = "Authorization";
pub const HEADER_CSRF_TOKEN_KEY: &str = "x-csrf-token";

/// Permissions consulted by the smart upload surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Manage system configuration (the settings API).
    ManageSystemConfig,
    /// Upload scores and view upload sessions.
    ManageUploads,
}

/// The authenticated principal behind a request token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub permissions: HashSet<Permission>,
    /// Expected CSRF token for this session's mutating requests.
    pub csrf_token: String,
}

/// Narrow interface to the external auth subsystem.
pub trait SessionAuthenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<AuthenticatedUser>;
}

/// Token-table authenticator used by the binary's bootstrap and the tests.
pub struct StaticTokenAuthenticator {
    users: std::collections::HashMap<String, AuthenticatedUser>,
}

impl StaticTokenAuthenticator {
    pub fn new() -> Self {
        Self {
            users: std::collections::HashMap::new(),
        }
    }

    pub fn with_user(
        mut self,
        token: impl Into<String>,
        user_id: impl Into<String>,
        permissions: impl IntoIterator<Item = Permission>,
        csrf_token: impl Into<String>,
    ) -> Self {
        self.users.insert(
            token.into(),
            AuthenticatedUser {
                user_id: user_id.into(),
                permissions: permissions.into_iter().collect(),
                csrf_token: csrf_token.into(),
            },
        );
        self
    }
}

impl Default for StaticTokenAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionAuthenticator for StaticTokenAuthenticator {
    fn authenticate(&self, token: &str) -> Option<AuthenticatedUser> {
        self.users.get(token).cloned()
    }
}

#[derive(Debug)]
pub struct Session {
    pub user_id: String,
    permissions: HashSet<Permission>,
    csrf_token: String,
    provided_csrf: Option<String>,
}

impl Session {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Whether the request carried the session's CSRF token. Only consulted
    /// by mutating handlers.
    pub fn csrf_valid(&self) -> bool {
        self.provided_csrf.as_deref() == Some(self.csrf_token.as_str())
    }
}

pub enum SessionExtractionError {
    Unauthenticated,
}

impl IntoResponse for SessionExtractionError {
    fn into_response(self) -> axum::response::Response {
        match self {
            SessionExtractionError::Unauthenticated => StatusCode::UNAUTHORIZED.into_response(),
        }
    }
}

async fn extract_token_from_cookies(parts: &mut Parts, state: &ServerState) -> Option<String> {
    CookieJar::from_request_parts(parts, state)
        .await
        .ok()?
        .get(COOKIE_SESSION_TOKEN_KEY)
        .map(Cookie::value)
        .map(|s| s.to_string())
}

fn extract_token_from_headers(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(HEADER_SESSION_TOKEN_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start_matches("Bearer ").to_string())
}

impl FromRequestParts<ServerState> for Session {
    type Rejection = SessionExtractionError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let token = match extract_token_from_cookies(parts, state).await {
            Some(token) => token,
            None => extract_token_from_headers(parts)
                .ok_or(SessionExtractionError::Unauthenticated)?,
        };

        let user = state
            .authenticator
            .authenticate(&token)
            .ok_or(SessionExtractionError::Unauthenticated)?;

        let provided_csrf = parts
            .headers
            .get(HEADER_CSRF_TOKEN_KEY)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Session {
            user_id: user.user_id,
            permissions: user.permissions,
            csrf_token: user.csrf_token,
            provided_csrf,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session(provided_csrf: Option<&str>) -> Session {
        Session {
            user_id: "u-1".to_string(),
            permissions: [Permission::ManageSystemConfig].into_iter().collect(),
            csrf_token: "csrf-abc".to_string(),
            provided_csrf: provided_csrf.map(str::to_string),
        }
    }

    #[test]
    fn permissions_are_checked_exactly() {
        let session = sample_session(None);
        assert!(session.has_permission(Permission::ManageSystemConfig));
        assert!(!session.has_permission(Permission::ManageUploads));
    }

    #[test]
    fn csrf_requires_the_exact_token() {
        assert!(sample_session(Some("csrf-abc")).csrf_valid());
        assert!(!sample_session(Some("wrong")).csrf_valid());
        assert!(!sample_session(None).csrf_valid());
    }

    #[test]
    fn static_authenticator_resolves_tokens() {
        let auth = StaticTokenAuthenticator::new().with_user(
            "tok",
            "u-1",
            [Permission::ManageUploads],
            "csrf",
        );
        assert!(auth.authenticate("tok").is_some());
        assert!(auth.authenticate("nope").is_none());
    }
}
