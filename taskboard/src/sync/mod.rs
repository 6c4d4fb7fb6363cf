//! Sync channel between the board and the remote task service.
//!
//! Outbound requests go through the [`RemoteApi`] trait. Concrete
//! implementations:
//! - [`http::HttpRemote`]: REST client over reqwest
//! - [`loopback::LoopbackRemote`]: in-process service for tests and demos
//!
//! Inbound push events arrive over a WebSocket managed by
//! [`reconnect::spawn_push`], which reconnects with bounded exponential
//! backoff.

pub mod http;
pub mod loopback;
pub mod push;
pub mod reconnect;

use std::future::Future;

use taskboard_proto::api::{ClearDoneResponse, LoginResponse, User};
use taskboard_proto::guest::{GuestCode, GuestStatus};
use taskboard_proto::task::{NewTask, Task, TaskId, TaskPatch, TaskStatus};

use crate::session::AccessToken;

/// Errors that can occur when calling the remote service.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Network failure, timeout, or a 5xx response.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// 401: the token is missing, expired, or revoked.
    #[error("not authenticated")]
    Unauthorized,

    /// 403: the user may not perform this request.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// 404: the resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other 4xx, with the service's `detail`.
    #[error("request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// The response body did not match the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Classifies a non-2xx status and its `detail` text.
    #[must_use]
    pub fn from_status(status: u16, detail: String) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden(detail),
            404 => Self::NotFound(detail),
            500..=599 => Self::Unavailable(format!("server error {status}: {detail}")),
            _ => Self::Rejected { status, detail },
        }
    }

    /// The message to show the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Forbidden(detail) | Self::NotFound(detail) | Self::Rejected { detail, .. }
                if !detail.is_empty() =>
            {
                detail.clone()
            }
            other => other.to_string(),
        }
    }
}

/// Async request/response interface of the task service.
///
/// Every authenticated call takes the session's token explicitly; there is
/// no ambient credential.
pub trait RemoteApi: Send + Sync {
    /// `POST /auth/login-json`.
    fn login(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<LoginResponse, RemoteError>> + Send;

    /// `GET /auth/me`.
    fn me(&self, token: &AccessToken) -> impl Future<Output = Result<User, RemoteError>> + Send;

    /// `POST /auth/logout`. Best effort.
    fn logout(&self, token: &AccessToken)
    -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// `GET /tasks/`.
    fn list_tasks(
        &self,
        token: &AccessToken,
    ) -> impl Future<Output = Result<Vec<Task>, RemoteError>> + Send;

    /// `POST /tasks/`.
    fn create_task(
        &self,
        token: &AccessToken,
        new: &NewTask,
    ) -> impl Future<Output = Result<Task, RemoteError>> + Send;

    /// `PUT /tasks/{id}`.
    fn update_task(
        &self,
        token: &AccessToken,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> impl Future<Output = Result<Task, RemoteError>> + Send;

    /// `POST /tasks/{id}/move?new_status=...`.
    fn move_task(
        &self,
        token: &AccessToken,
        id: &TaskId,
        status: TaskStatus,
    ) -> impl Future<Output = Result<Task, RemoteError>> + Send;

    /// `DELETE /tasks/{id}`.
    fn delete_task(
        &self,
        token: &AccessToken,
        id: &TaskId,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// `DELETE /tasks/clear-done`.
    fn clear_done(
        &self,
        token: &AccessToken,
    ) -> impl Future<Output = Result<ClearDoneResponse, RemoteError>> + Send;

    /// `GET /guest/task-status/{code}`. No authentication.
    fn guest_status(
        &self,
        code: &GuestCode,
    ) -> impl Future<Output = Result<GuestStatus, RemoteError>> + Send;
}
