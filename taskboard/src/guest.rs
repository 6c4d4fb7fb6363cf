//! Account-free status lookup by guest code.

use taskboard_proto::guest::{GuestCode, GuestCodeError, GuestStatus};

use crate::notify::{GUEST_ERROR_TTL, NoticeBoard, NoticeLevel};
use crate::sync::{RemoteApi, RemoteError};

/// Why a guest lookup failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuestLookupError {
    /// The input is not a guest code; no request was made.
    #[error(transparent)]
    InvalidGuestCode(#[from] GuestCodeError),
    /// No task has this code.
    #[error("Request not found, please check and enter again")]
    NotFound,
    /// The service could not answer.
    #[error("{0}")]
    Remote(String),
}

/// Validates `input` and asks the service for the task's status.
///
/// # Errors
///
/// [`GuestLookupError::InvalidGuestCode`] without touching the network,
/// [`GuestLookupError::NotFound`] for an unknown code, or
/// [`GuestLookupError::Remote`] for anything else.
pub async fn lookup<R: RemoteApi>(remote: &R, input: &str) -> Result<GuestStatus, GuestLookupError> {
    let code = GuestCode::parse(input)?;
    tracing::debug!(%code, "guest lookup");
    match remote.guest_status(&code).await {
        Ok(status) => {
            tracing::info!(%code, status = %status.status, "guest lookup resolved");
            Ok(status)
        }
        Err(RemoteError::NotFound(_)) => Err(GuestLookupError::NotFound),
        Err(e) => {
            tracing::warn!(%code, err = %e, "guest lookup failed");
            Err(GuestLookupError::Remote(e.user_message()))
        }
    }
}

/// Runs [`lookup`] and posts a failure as a long-lived error notice.
///
/// # Errors
///
/// Same as [`lookup`].
pub async fn lookup_with_notice<R: RemoteApi>(
    remote: &R,
    input: &str,
    notices: &mut NoticeBoard,
) -> Result<GuestStatus, GuestLookupError> {
    let result = lookup(remote, input).await;
    if let Err(e) = &result {
        notices.post_for(NoticeLevel::Error, e.to_string(), GUEST_ERROR_TTL);
    }
    result
}
