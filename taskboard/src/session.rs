//! The current actor and the access gate.
//!
//! A [`Session`] is created by login (networked mode) or for the local user
//! (local mode) and dropped on logout. Every mutating board operation
//! passes through [`authorize`] before touching any state.

use std::fmt;

use taskboard_proto::api::User;

use crate::board::{Action, BoardError};

/// A bearer token. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for request headers and the push URL.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// The authenticated (or local) user and their credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    user: User,
    token: Option<AccessToken>,
}

impl Session {
    /// A session backed by a token issued by the remote service.
    #[must_use]
    pub const fn authenticated(user: User, token: AccessToken) -> Self {
        Self {
            user,
            token: Some(token),
        }
    }

    /// The always-active session of local mode.
    #[must_use]
    pub fn local(name: &str) -> Self {
        Self {
            user: User {
                id: 0,
                username: name.to_string(),
                email: None,
                full_name: None,
                is_active: true,
                is_admin: false,
            },
            token: None,
        }
    }

    #[must_use]
    pub const fn user(&self) -> &User {
        &self.user
    }

    #[must_use]
    pub const fn token(&self) -> Option<&AccessToken> {
        self.token.as_ref()
    }

    /// Inactive users may read the board but never change it.
    #[must_use]
    pub const fn can_mutate(&self) -> bool {
        self.user.is_active
    }

    /// Replaces the user record, e.g. after `GET /auth/me`.
    pub fn refresh_user(&mut self, user: User) {
        self.user = user;
    }
}

/// Checks that `session` may perform `action`.
///
/// # Errors
///
/// Returns [`BoardError::PermissionDenied`] when there is no session or
/// the user is inactive.
pub fn authorize(session: Option<&Session>, action: Action) -> Result<&Session, BoardError> {
    match session {
        Some(session) if session.can_mutate() => Ok(session),
        Some(session) => {
            tracing::debug!(user = %session.user.username, %action, "inactive user denied");
            Err(BoardError::PermissionDenied(action))
        }
        None => {
            tracing::debug!(%action, "no session, denied");
            Err(BoardError::PermissionDenied(action))
        }
    }
}
