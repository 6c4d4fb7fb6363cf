//! Guest status codes.
//!
//! Every task on a networked board has a six-character code that a client
//! can use to check progress without an account. Codes are shown and typed
//! as `RE-XXXXXX`; the bare six characters are also accepted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::task::{GUEST_CODE_PREFIX, TaskStatus};

/// Number of characters after the `RE-` prefix.
pub const GUEST_CODE_LEN: usize = 6;

/// Why a guest code was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuestCodeError {
    /// Nothing was entered.
    #[error("please enter a task ID")]
    Empty,
    /// Input is not `RE-` followed by six letters or digits.
    #[error("please enter a valid task ID in the format RE-XXXXXX")]
    InvalidFormat,
}

/// A validated guest code, stored as the six uppercase characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuestCode(String);

impl GuestCode {
    /// Parses user input into a guest code.
    ///
    /// Whitespace is trimmed and letters are uppercased. Accepts either the
    /// full `RE-XXXXXX` form or the bare six characters; text pasted around a
    /// code (e.g. `"Your ID: RE-AB12CD."`) is searched for the first match.
    ///
    /// # Errors
    ///
    /// Returns [`GuestCodeError::Empty`] for blank input and
    /// [`GuestCodeError::InvalidFormat`] for anything else that does not match.
    pub fn parse(input: &str) -> Result<Self, GuestCodeError> {
        let normalized = input.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(GuestCodeError::Empty);
        }

        let suffix = normalized
            .strip_prefix(GUEST_CODE_PREFIX)
            .unwrap_or(&normalized);
        if is_code_body(suffix) {
            return Ok(Self(suffix.to_string()));
        }

        find_embedded(&normalized)
            .map(|code| Self(code.to_string()))
            .ok_or(GuestCodeError::InvalidFormat)
    }

    /// The six-character code without prefix, as sent to the service.
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GuestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{GUEST_CODE_PREFIX}{}", self.0)
    }
}

impl FromStr for GuestCode {
    type Err = GuestCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_code_body(s: &str) -> bool {
    s.len() == GUEST_CODE_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Finds `RE-` followed by exactly six alphanumerics anywhere in `haystack`.
fn find_embedded(haystack: &str) -> Option<&str> {
    haystack.match_indices(GUEST_CODE_PREFIX).find_map(|(start, _)| {
        let body_start = start + GUEST_CODE_PREFIX.len();
        let body = haystack.get(body_start..body_start + GUEST_CODE_LEN)?;
        let trailing_ok = haystack[body_start + GUEST_CODE_LEN..]
            .bytes()
            .next()
            .is_none_or(|b| !b.is_ascii_alphanumeric());
        (is_code_body(body) && trailing_ok).then_some(body)
    })
}

/// Response of `GET /guest/task-status/{code}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestStatus {
    /// The code in `RE-XXXXXX` form.
    pub task_id: String,
    /// Current column of the task.
    pub status: TaskStatus,
    /// Client-facing explanation of the status.
    #[serde(default)]
    pub message: String,
}

impl GuestStatus {
    /// Returns the service message, or the standard text for the status.
    #[must_use]
    pub fn message_or_default(&self) -> &str {
        if self.message.is_empty() {
            status_message(self.status)
        } else {
            &self.message
        }
    }
}

/// Standard client-facing text for each status.
#[must_use]
pub const fn status_message(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => {
            "Your request has been received and is currently queued for processing. \
             We will begin working on it shortly."
        }
        TaskStatus::InReview => {
            "Your request is currently under review by our team. Please allow additional \
             time for processing and await further communication."
        }
        TaskStatus::AwaitingDocuments => {
            "Your request requires additional documentation or information. Please check \
             your email for our correspondence or contact our office for details."
        }
        TaskStatus::Done => {
            "Your request has been completed successfully. No further action is required \
             on your part. Thank you for choosing our services."
        }
    }
}
