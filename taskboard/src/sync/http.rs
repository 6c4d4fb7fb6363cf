//! REST client for the task service.
//!
//! Every call is a single request with the configured timeout. Non-2xx
//! responses are classified by status through [`RemoteError::from_status`],
//! using the `detail` field of the error body when present.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use taskboard_proto::api::{
    API_PREFIX, ApiErrorBody, ClearDoneResponse, LoginRequest, LoginResponse, MoveResponse, User,
};
use taskboard_proto::guest::{GuestCode, GuestStatus};
use taskboard_proto::task::{NewTask, Task, TaskId, TaskPatch, TaskStatus};

use super::{RemoteApi, RemoteError};
use crate::session::AccessToken;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// [`RemoteApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    /// Service origin without the API prefix, e.g. `http://localhost:8000`.
    base_url: String,
}

impl HttpRemote {
    /// Creates a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Unavailable`] if the HTTP client cannot be built
    /// (e.g. the TLS backend fails to initialise).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.base_url)
    }
}

impl RemoteApi for HttpRemote {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, RemoteError> {
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let resp = self
            .client
            .post(self.endpoint("/auth/login-json"))
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;
        read_json(check(resp).await?).await
    }

    async fn me(&self, token: &AccessToken) -> Result<User, RemoteError> {
        let resp = self
            .client
            .get(self.endpoint("/auth/me"))
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(map_send_error)?;
        read_json(check(resp).await?).await
    }

    async fn logout(&self, token: &AccessToken) -> Result<(), RemoteError> {
        let resp = self
            .client
            .post(self.endpoint("/auth/logout"))
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(map_send_error)?;
        check(resp).await.map(drop)
    }

    async fn list_tasks(&self, token: &AccessToken) -> Result<Vec<Task>, RemoteError> {
        let resp = self
            .client
            .get(self.endpoint("/tasks/"))
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(map_send_error)?;
        read_json(check(resp).await?).await
    }

    async fn create_task(&self, token: &AccessToken, new: &NewTask) -> Result<Task, RemoteError> {
        let resp = self
            .client
            .post(self.endpoint("/tasks/"))
            .bearer_auth(token.expose())
            .json(new)
            .send()
            .await
            .map_err(map_send_error)?;
        read_json(check(resp).await?).await
    }

    async fn update_task(
        &self,
        token: &AccessToken,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> Result<Task, RemoteError> {
        let resp = self
            .client
            .put(self.endpoint(&format!("/tasks/{id}")))
            .bearer_auth(token.expose())
            .json(patch)
            .send()
            .await
            .map_err(map_send_error)?;
        read_json(check(resp).await?).await
    }

    async fn move_task(
        &self,
        token: &AccessToken,
        id: &TaskId,
        status: TaskStatus,
    ) -> Result<Task, RemoteError> {
        let resp = self
            .client
            .post(self.endpoint(&format!("/tasks/{id}/move")))
            .bearer_auth(token.expose())
            .query(&[("new_status", status.as_str())])
            .send()
            .await
            .map_err(map_send_error)?;
        let moved: MoveResponse = read_json(check(resp).await?).await?;
        Ok(moved.task)
    }

    async fn delete_task(&self, token: &AccessToken, id: &TaskId) -> Result<(), RemoteError> {
        let resp = self
            .client
            .delete(self.endpoint(&format!("/tasks/{id}")))
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(map_send_error)?;
        check(resp).await.map(drop)
    }

    async fn clear_done(&self, token: &AccessToken) -> Result<ClearDoneResponse, RemoteError> {
        let resp = self
            .client
            .delete(self.endpoint("/tasks/clear-done"))
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(map_send_error)?;
        read_json(check(resp).await?).await
    }

    async fn guest_status(&self, code: &GuestCode) -> Result<GuestStatus, RemoteError> {
        let resp = self
            .client
            .get(self.endpoint(&format!("/guest/task-status/{}", code.suffix())))
            .send()
            .await
            .map_err(map_send_error)?;
        read_json(check(resp).await?).await
    }
}

/// Passes 2xx responses through and turns everything else into an error.
async fn check(resp: Response) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.detail)
        .unwrap_or(body);
    tracing::debug!(status = status.as_u16(), %detail, "request failed");
    Err(RemoteError::from_status(status.as_u16(), detail))
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, RemoteError> {
    let body = resp.bytes().await.map_err(map_send_error)?;
    serde_json::from_slice(&body).map_err(|e| RemoteError::Decode(e.to_string()))
}

/// Maps transport-level failures (connect refused, timeout, reset).
fn map_send_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Unavailable("request timed out".to_string())
    } else if e.is_connect() {
        RemoteError::Unavailable(format!("connection failed: {e}"))
    } else {
        RemoteError::Unavailable(e.to_string())
    }
}
