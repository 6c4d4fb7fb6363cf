//! Task data model for `Taskboard`.
//!
//! Defines the task record exchanged with the remote service and persisted
//! in local mode, together with the enums for board columns, processing
//! priority, and task categories. All enums use the exact wire strings of
//! the REST API so that records round-trip through JSON unchanged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Maximum allowed client name length in characters.
pub const MAX_CLIENT_NAME_LENGTH: usize = 100;

/// Prefix used when rendering a task's guest-facing code.
pub const GUEST_CODE_PREFIX: &str = "RE-";

/// Error returned when a string cannot be parsed into one of the task enums.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The string is not a valid task identifier.
    #[error("invalid task id: {0}")]
    TaskId(String),
    /// The string is not one of the four board columns.
    #[error("invalid status: {0}")]
    Status(String),
    /// The string is not a known processing priority.
    #[error("invalid processing type: {0}")]
    Processing(String),
    /// The string is not one of the task categories.
    #[error("invalid task type: {0}")]
    TaskType(String),
}

/// Unique identifier for a task.
///
/// Networked boards use the integer ids assigned by the service; local
/// boards (and optimistic records awaiting a server id) use UUID v7 values.
/// Serialized untagged, so JSON carries either a number or a UUID string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskId {
    /// Identifier assigned by the remote service.
    Remote(u64),
    /// Identifier generated on this client.
    Local(Uuid),
}

impl TaskId {
    /// Creates a new time-ordered local identifier (UUID v7).
    #[must_use]
    pub fn new_local() -> Self {
        Self::Local(Uuid::now_v7())
    }

    /// Returns `true` if this id was generated locally.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Returns the server-assigned integer, if any.
    #[must_use]
    pub const fn as_remote(&self) -> Option<u64> {
        match self {
            Self::Remote(n) => Some(*n),
            Self::Local(_) => None,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(n) => write!(f, "{n}"),
            Self::Local(uuid) => write!(f, "{uuid}"),
        }
    }
}

impl FromStr for TaskId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u64>() {
            return Ok(Self::Remote(n));
        }
        Uuid::parse_str(s)
            .map(Self::Local)
            .map_err(|_| ParseError::TaskId(s.to_string()))
    }
}

/// The column a task currently occupies.
///
/// Decoding from the wire is lenient: any unrecognized string maps to
/// [`TaskStatus::Todo`]. Use [`FromStr`] for strict parsing of user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskStatus {
    /// Newly created, not yet started.
    #[default]
    Todo,
    /// Under review.
    InReview,
    /// Blocked on documents from the client.
    AwaitingDocuments,
    /// Completed.
    Done,
}

impl TaskStatus {
    /// All columns in board order.
    pub const ALL: [Self; 4] = [
        Self::Todo,
        Self::InReview,
        Self::AwaitingDocuments,
        Self::Done,
    ];

    /// Returns the wire string for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InReview => "in-review",
            Self::AwaitingDocuments => "awaiting-documents",
            Self::Done => "done",
        }
    }

    /// Returns the human-readable column title.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Todo => "To Do",
            Self::InReview => "In Review",
            Self::AwaitingDocuments => "Awaiting Documents",
            Self::Done => "Done",
        }
    }

    /// Returns the column position (0-based) in board order.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Todo => 0,
            Self::InReview => 1,
            Self::AwaitingDocuments => 2,
            Self::Done => 3,
        }
    }

    /// Lenient conversion used for wire data: unknown values become `Todo`.
    #[must_use]
    pub fn from_wire(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseError::Status(trimmed.to_string()))
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

/// Processing priority of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Processing {
    /// Regular FIFO processing.
    #[default]
    Normal,
    /// Sorts ahead of every normal task in its column.
    Expedited,
}

impl Processing {
    /// Sort rank within a column: lower ranks come first.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Expedited => 0,
            Self::Normal => 1,
        }
    }

    /// Returns the wire string for this priority.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Expedited => "expedited",
        }
    }
}

impl fmt::Display for Processing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Processing {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "expedited" => Ok(Self::Expedited),
            other => Err(ParseError::Processing(other.to_string())),
        }
    }
}

/// Task category.
///
/// `Misc` optionally carries a free-form label and renders as
/// `"Misc - <label>"`; an empty label collapses to plain `"Misc"`.
/// Categories the service knows but this client does not decode as
/// [`TaskType::Other`] and are written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// `BDL`
    Bdl,
    /// `SDL`
    Sdl,
    /// `nBDL`
    NBdl,
    /// `nPO`
    NPo,
    /// `Misc`, with an optional custom label.
    Misc(Option<String>),
    /// A category outside the form's list, as received from the service.
    Other(String),
}

impl TaskType {
    /// Category names in form order.
    pub const CATEGORIES: [&'static str; 5] = ["BDL", "SDL", "nBDL", "nPO", "Misc"];

    /// Builds a `Misc` type from a custom label, trimming whitespace.
    #[must_use]
    pub fn misc(label: &str) -> Self {
        let label = label.trim();
        if label.is_empty() {
            Self::Misc(None)
        } else {
            Self::Misc(Some(label.to_string()))
        }
    }

    /// Builds a type from a selected category and the optional misc label.
    ///
    /// The label is ignored for every category except `Misc`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::TaskType`] if the category is unknown.
    pub fn from_selection(category: &str, misc_label: Option<&str>) -> Result<Self, ParseError> {
        let category = category.trim();
        match category {
            c if c.eq_ignore_ascii_case("BDL") => Ok(Self::Bdl),
            c if c.eq_ignore_ascii_case("SDL") => Ok(Self::Sdl),
            c if c.eq_ignore_ascii_case("nBDL") => Ok(Self::NBdl),
            c if c.eq_ignore_ascii_case("nPO") => Ok(Self::NPo),
            c if c.eq_ignore_ascii_case("Misc") => Ok(Self::misc(misc_label.unwrap_or_default())),
            other => Err(ParseError::TaskType(other.to_string())),
        }
    }

    /// Lenient conversion used for wire data: an unknown category is kept
    /// verbatim as [`TaskType::Other`].
    #[must_use]
    pub fn from_wire(s: &str) -> Self {
        s.parse()
            .unwrap_or_else(|_| Self::Other(s.trim().to_string()))
    }

    /// Returns the category name without any misc label.
    #[must_use]
    pub fn category(&self) -> &str {
        match self {
            Self::Bdl => "BDL",
            Self::Sdl => "SDL",
            Self::NBdl => "nBDL",
            Self::NPo => "nPO",
            Self::Misc(_) => "Misc",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Misc(Some(label)) => write!(f, "Misc - {label}"),
            other => f.write_str(other.category()),
        }
    }
}

impl FromStr for TaskType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((head, label)) = s.split_once('-')
            && head.trim().eq_ignore_ascii_case("Misc")
        {
            return Ok(Self::misc(label));
        }
        Self::from_selection(s, None)
    }
}

impl Serialize for TaskType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TaskType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

/// The user who created a task (networked mode only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOwner {
    /// Server-side user id.
    pub id: u64,
    /// Login name.
    pub username: String,
    /// Display name, if set.
    #[serde(default)]
    pub full_name: Option<String>,
}

impl TaskOwner {
    /// Returns the name shown on a task card.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.username)
    }
}

/// A task card on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: TaskId,
    /// Six-character guest code assigned by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
    /// Client the task is for. Never empty after trimming.
    pub client_name: String,
    /// Task category.
    pub task_type: TaskType,
    /// Property address.
    #[serde(default)]
    pub address: Option<String>,
    /// Processing priority.
    #[serde(default)]
    pub processing: Processing,
    /// Column the task occupies.
    #[serde(default)]
    pub status: TaskStatus,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Creator, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<TaskOwner>,
    /// Creation time; the FIFO tie-break within a priority class.
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    /// Last modification time, used as the record version.
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
    /// When the task entered `done`.
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Builds a task from creation fields with the given id and timestamp.
    #[must_use]
    pub fn from_new(id: TaskId, new: NewTask, created_at: DateTime<Utc>) -> Self {
        let completed_at = (new.status == TaskStatus::Done).then_some(created_at);
        Self {
            id,
            custom_id: None,
            client_name: new.client_name,
            task_type: new.task_type,
            address: new.address,
            processing: new.processing,
            status: new.status,
            description: new.description,
            owner: None,
            created_at,
            updated_at: None,
            completed_at,
        }
    }

    /// Returns `true` for expedited tasks.
    #[must_use]
    pub fn is_expedited(&self) -> bool {
        self.processing == Processing::Expedited
    }

    /// Returns the guest-facing code (`RE-XXXXXX`), if the service assigned one.
    #[must_use]
    pub fn guest_code(&self) -> Option<String> {
        self.custom_id
            .as_ref()
            .map(|code| format!("{GUEST_CODE_PREFIX}{code}"))
    }

    /// Sets the status and keeps `completed_at` consistent with it.
    pub fn set_status(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        if status == self.status {
            return;
        }
        self.completed_at = (status == TaskStatus::Done).then_some(now);
        self.status = status;
    }
}

/// Fields accepted when creating a task (`POST /tasks/`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    /// Client the task is for.
    pub client_name: String,
    /// Task category.
    pub task_type: TaskType,
    /// Property address.
    #[serde(default)]
    pub address: Option<String>,
    /// Processing priority.
    #[serde(default)]
    pub processing: Processing,
    /// Initial column.
    #[serde(default)]
    pub status: TaskStatus,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewTask {
    /// Captures the creation fields of an existing task, status included.
    #[must_use]
    pub fn from_task(task: &Task) -> Self {
        Self {
            client_name: task.client_name.clone(),
            task_type: task.task_type.clone(),
            address: task.address.clone(),
            processing: task.processing,
            status: task.status,
            description: task.description.clone(),
        }
    }
}

/// Partial update of the editable fields (`PUT /tasks/{id}`).
///
/// Status is deliberately absent: columns change only through a move.
/// `address` and `description` use a nested `Option` so that `Some(None)`
/// clears the field while `None` leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskPatch {
    /// New client name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    /// New category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,
    /// New address, or `Some(None)` to clear.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Option<String>>,
    /// New processing priority.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing: Option<Processing>,
    /// New description, or `Some(None)` to clear.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
}

impl TaskPatch {
    /// A patch that sets every editable field to the values in `task`.
    #[must_use]
    pub fn from_task(task: &Task) -> Self {
        Self {
            client_name: Some(task.client_name.clone()),
            task_type: Some(task.task_type.clone()),
            address: Some(task.address.clone()),
            processing: Some(task.processing),
            description: Some(task.description.clone()),
        }
    }

    /// Returns `true` if the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.client_name.is_none()
            && self.task_type.is_none()
            && self.address.is_none()
            && self.processing.is_none()
            && self.description.is_none()
    }

    /// Applies the set fields to `task`. Never touches `status`.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(name) = &self.client_name {
            task.client_name.clone_from(name);
        }
        if let Some(task_type) = &self.task_type {
            task.task_type = task_type.clone();
        }
        if let Some(address) = &self.address {
            task.address.clone_from(address);
        }
        if let Some(processing) = self.processing {
            task.processing = processing;
        }
        if let Some(description) = &self.description {
            task.description.clone_from(description);
        }
    }
}

/// Timestamp decoding that tolerates a missing UTC offset.
///
/// The service emits RFC 3339 strings, but records stored without a time
/// zone come back as naive ISO-8601; those are read as UTC.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    /// Parses an RFC 3339 or naive ISO-8601 timestamp.
    #[must_use]
    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    /// Serde adapter for a required timestamp.
    ///
    /// # Errors
    ///
    /// Fails if the value is not a string in a supported format.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    /// Serde adapter for an optional timestamp (`null` or missing is `None`).
    ///
    /// # Errors
    ///
    /// Fails if a present value is not a string in a supported format.
    pub fn deserialize_option<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
        }
    }
}
