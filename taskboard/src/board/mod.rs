//! The kanban board core.
//!
//! [`TaskStore`] owns the task collection and its column ordering,
//! [`HistoryStack`] records reversible actions, [`DragSession`] tracks a
//! pointer gesture, and [`Board`] wires them to the session gate, the
//! remote service, and local persistence.

pub mod controller;
pub mod drag;
pub mod history;
pub mod ordering;
pub mod reconcile;
pub mod store;

pub use controller::{Board, BoardMode};
pub use drag::{DragOutcome, DragSession, DragState, Placeholder};
pub use history::{HistoryAction, HistoryStack};
pub use store::{BoardChange, TaskStore};

use std::fmt;

use taskboard_proto::task::{
    MAX_CLIENT_NAME_LENGTH, NewTask, Processing, TaskId, TaskPatch, TaskStatus, TaskType,
};
use thiserror::Error;

use crate::persist::StoreError;
use crate::sync::RemoteError;

/// A mutating action, used to phrase permission errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Edit,
    Move,
    Delete,
    Clear,
    Undo,
    Redo,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add tasks",
            Self::Edit => "edit tasks",
            Self::Move => "move tasks",
            Self::Delete => "delete tasks",
            Self::Clear => "clear tasks",
            Self::Undo => "undo actions",
            Self::Redo => "redo actions",
        })
    }
}

/// Input that failed validation. No state is changed when this is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Client name is empty after trimming.
    #[error("Please enter a client name")]
    MissingClientName,
    /// Client name exceeds [`MAX_CLIENT_NAME_LENGTH`].
    #[error("Client name must be at most {MAX_CLIENT_NAME_LENGTH} characters")]
    ClientNameTooLong,
    /// No category was selected.
    #[error("Please select a task type")]
    MissingTaskType,
    /// The category is not one of the known task types.
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),
    /// The processing value is not `normal` or `expedited`.
    #[error("Unknown processing type: {0}")]
    UnknownProcessing(String),
    /// An edit that changes nothing.
    #[error("Nothing to update")]
    EmptyPatch,
}

/// Errors returned by board operations.
#[derive(Debug, Error)]
pub enum BoardError {
    /// Input failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// No session, or the user is inactive.
    #[error("Inactive users cannot {0}")]
    PermissionDenied(Action),
    /// The task no longer exists.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// The requested column does not exist.
    #[error("invalid status: {0}")]
    InvalidStatus(String),
    /// There is nothing to undo or redo.
    #[error("nothing to {0}")]
    EmptyHistory(&'static str),
    /// A drag gesture is already active.
    #[error("a drag is already in progress")]
    DragInProgress,
    /// The remote service could not be reached.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),
    /// The remote service refused the request.
    #[error("{0}")]
    Rejected(String),
    /// The access token is no longer accepted; the session has ended.
    #[error("session expired, please log in again")]
    SessionExpired,
    /// Local persistence failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl BoardError {
    /// Maps a remote failure to a board error, naming the task for 404s.
    #[must_use]
    pub fn from_remote(err: RemoteError, id: Option<&TaskId>) -> Self {
        match err {
            RemoteError::Unavailable(reason) => Self::RemoteUnavailable(reason),
            RemoteError::Unauthorized => Self::SessionExpired,
            RemoteError::NotFound(detail) => match id {
                Some(id) => Self::NotFound(id.clone()),
                None => Self::Rejected(detail),
            },
            RemoteError::Forbidden(detail) | RemoteError::Rejected { detail, .. } => {
                Self::Rejected(detail)
            }
            RemoteError::Decode(reason) => Self::RemoteUnavailable(reason),
        }
    }
}

/// Raw "add task" form input, validated into a [`NewTask`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDraft {
    pub client_name: String,
    /// Selected category (`BDL`, `SDL`, `nBDL`, `nPO`, `Misc`).
    pub category: Option<String>,
    /// Custom label, used only when the category is `Misc`.
    pub misc_label: Option<String>,
    pub address: Option<String>,
    /// `normal` or `expedited`; defaults to normal.
    pub processing: Option<String>,
    pub description: Option<String>,
}

impl TaskDraft {
    /// Validates the draft.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for a blank or overlong client name, a
    /// missing or unknown category, or an unknown processing value.
    pub fn validate(&self) -> Result<NewTask, ValidationError> {
        let client_name = validate_client_name(&self.client_name)?;
        let category = self
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(ValidationError::MissingTaskType)?;
        let task_type = TaskType::from_selection(category, self.misc_label.as_deref())
            .map_err(|_| ValidationError::UnknownTaskType(category.to_string()))?;
        let processing = match self.processing.as_deref().map(str::trim) {
            None | Some("") => Processing::Normal,
            Some(raw) => raw
                .parse()
                .map_err(|_| ValidationError::UnknownProcessing(raw.to_string()))?,
        };

        Ok(NewTask {
            client_name,
            task_type,
            address: non_blank(self.address.as_deref()),
            processing,
            status: TaskStatus::Todo,
            description: non_blank(self.description.as_deref()),
        })
    }
}

/// Trims a client name and checks it is non-empty and within the length limit.
///
/// # Errors
///
/// Returns [`ValidationError::MissingClientName`] or
/// [`ValidationError::ClientNameTooLong`].
pub fn validate_client_name(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingClientName);
    }
    if trimmed.chars().count() > MAX_CLIENT_NAME_LENGTH {
        return Err(ValidationError::ClientNameTooLong);
    }
    Ok(trimmed.to_string())
}

/// Normalizes a [`NewTask`] built outside [`TaskDraft`].
///
/// # Errors
///
/// Returns a [`ValidationError`] if the client name is invalid.
pub fn validate_new_task(mut new: NewTask) -> Result<NewTask, ValidationError> {
    new.client_name = validate_client_name(&new.client_name)?;
    new.address = non_blank(new.address.as_deref());
    new.description = non_blank(new.description.as_deref());
    Ok(new)
}

/// Normalizes a [`TaskPatch`], rejecting a blank client name or an empty patch.
///
/// # Errors
///
/// Returns a [`ValidationError`] if the patch sets an invalid client name
/// or sets no field at all.
pub fn validate_patch(mut patch: TaskPatch) -> Result<TaskPatch, ValidationError> {
    if let Some(name) = &patch.client_name {
        patch.client_name = Some(validate_client_name(name)?);
    }
    if let Some(address) = &patch.address {
        patch.address = Some(non_blank(address.as_deref()));
    }
    if let Some(description) = &patch.description {
        patch.description = Some(non_blank(description.as_deref()));
    }
    if patch.is_empty() {
        return Err(ValidationError::EmptyPatch);
    }
    Ok(patch)
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Strictly parses a column name.
///
/// # Errors
///
/// Returns [`BoardError::InvalidStatus`] for anything but the four columns.
pub fn parse_status(raw: &str) -> Result<TaskStatus, BoardError> {
    raw.parse()
        .map_err(|_| BoardError::InvalidStatus(raw.trim().to_string()))
}
