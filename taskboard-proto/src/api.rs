//! Request and response bodies of the task service REST API.
//!
//! All paths live under [`API_PREFIX`]. Only the bodies the client sends
//! or reads are modelled here; unknown response fields are ignored.

use serde::{Deserialize, Serialize};

use crate::task::Task;

/// Path prefix of every REST endpoint.
pub const API_PREFIX: &str = "/api/v1";

/// Body of `POST /auth/login-json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Login name.
    pub username: String,
    /// Plain-text password.
    pub password: String,
}

/// An account on the task service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Server-side user id.
    pub id: u64,
    /// Login name.
    pub username: String,
    /// Contact email.
    #[serde(default)]
    pub email: Option<String>,
    /// Display name.
    #[serde(default)]
    pub full_name: Option<String>,
    /// Inactive users may read the board but not change it.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Administrators may manage other accounts.
    #[serde(default)]
    pub is_admin: bool,
}

const fn default_true() -> bool {
    true
}

impl User {
    /// Returns the name shown in the header.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.username)
    }
}

/// Response of `POST /auth/login-json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginResponse {
    /// Bearer token for subsequent calls.
    pub access_token: String,
    /// Always `"bearer"`.
    #[serde(default)]
    pub token_type: String,
    /// The authenticated user, when the service includes it.
    #[serde(default)]
    pub user: Option<User>,
}

/// Response of `POST /tasks/{id}/move?new_status=...`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MoveResponse {
    /// Human-readable confirmation.
    #[serde(default)]
    pub message: String,
    /// The task after the move.
    pub task: Task,
}

/// Response of `DELETE /tasks/clear-done`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClearDoneResponse {
    /// Human-readable summary.
    #[serde(default)]
    pub message: String,
    /// Number of tasks removed.
    #[serde(default)]
    pub deleted_count: usize,
    /// `"warning"` when there was nothing to clear.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiErrorBody {
    /// Human-readable reason.
    pub detail: String,
}
