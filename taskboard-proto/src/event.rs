//! Push channel messages.
//!
//! The service broadcasts one JSON object per WebSocket text frame, tagged
//! by `type`. Task events carry the affected record under `data` together
//! with `user_id` and `timestamp` fields that the client does not need.

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskId, TaskStatus};

/// Text frame the client sends as a keepalive.
pub const PING_FRAME: &str = "ping";

/// Payload of a `task_deleted` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedTask {
    /// Id of the removed task.
    pub id: TaskId,
    /// Client name at deletion time.
    #[serde(default)]
    pub client_name: Option<String>,
    /// Status at deletion time.
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

/// Payload of a `tasks_cleared` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearedTasks {
    /// Ids of every removed task.
    pub deleted_task_ids: Vec<TaskId>,
    /// Number of removed tasks.
    #[serde(default)]
    pub count: usize,
}

/// A message received on the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// Sent once after the service accepts the connection.
    ConnectionEstablished {
        /// Greeting text.
        #[serde(default)]
        message: String,
        /// Username the token belongs to.
        #[serde(default)]
        user: Option<String>,
    },
    /// A task was created.
    TaskCreated {
        /// The new task.
        data: Task,
    },
    /// A task's fields were edited.
    TaskUpdated {
        /// The task after the edit.
        data: Task,
    },
    /// A task changed column.
    TaskMoved {
        /// The task after the move.
        data: Task,
    },
    /// A task was deleted.
    TaskDeleted {
        /// Identity of the removed task.
        data: DeletedTask,
    },
    /// Completed tasks were cleared.
    TasksCleared {
        /// Ids of the removed tasks.
        data: ClearedTasks,
    },
    /// Reply to a [`PING_FRAME`].
    Pong,
}

/// A board mutation made by someone else, ready to apply to the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    /// Insert the task.
    Created(Task),
    /// Replace the task's fields.
    Updated(Task),
    /// Replace the task, which now sits in a new column.
    Moved(Task),
    /// Remove the task with this id.
    Deleted(TaskId),
    /// Remove all of these ids.
    Cleared(Vec<TaskId>),
}

impl RemoteEvent {
    /// Returns the single task id this event touches, if any.
    #[must_use]
    pub const fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Created(t) | Self::Updated(t) | Self::Moved(t) => Some(&t.id),
            Self::Deleted(id) => Some(id),
            Self::Cleared(_) => None,
        }
    }
}

impl PushMessage {
    /// Converts a task event into a [`RemoteEvent`].
    ///
    /// Returns `None` for control messages (`connection_established`, `pong`).
    #[must_use]
    pub fn into_remote_event(self) -> Option<RemoteEvent> {
        match self {
            Self::TaskCreated { data } => Some(RemoteEvent::Created(data)),
            Self::TaskUpdated { data } => Some(RemoteEvent::Updated(data)),
            Self::TaskMoved { data } => Some(RemoteEvent::Moved(data)),
            Self::TaskDeleted { data } => Some(RemoteEvent::Deleted(data.id)),
            Self::TasksCleared { data } => Some(RemoteEvent::Cleared(data.deleted_task_ids)),
            Self::ConnectionEstablished { .. } | Self::Pong => None,
        }
    }
}
