//! Pointer-driven drag-and-drop of a task between columns.
//!
//! `Idle -> Dragging -> (Dropped | Cancelled) -> Idle`. The session never
//! mutates the store itself; a drop yields a [`DragOutcome`] that the board
//! turns into a move.

use taskboard_proto::task::{TaskId, TaskStatus};

use super::store::TaskStore;
use super::{Action, BoardError, ordering};
use crate::session::{Session, authorize};

/// Where the dragged task would land if released now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placeholder {
    pub status: TaskStatus,
    pub index: usize,
}

/// Current state of the gesture.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging {
        task_id: TaskId,
        origin: TaskStatus,
        /// Column under the pointer, if any.
        over: Option<TaskStatus>,
    },
}

/// How a gesture ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragOutcome {
    /// Released over a column; the board should move the task there.
    Dropped {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    /// Released outside any column or aborted; nothing changes.
    Cancelled { task_id: TaskId },
}

/// At most one drag gesture at a time.
#[derive(Debug, Default)]
pub struct DragSession {
    state: DragState,
}

impl DragSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn state(&self) -> &DragState {
        &self.state
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, DragState::Dragging { .. })
    }

    /// Starts dragging `task_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::DragInProgress`] if a gesture is already active,
    /// [`BoardError::PermissionDenied`] if the session may not move tasks, or
    /// [`BoardError::NotFound`] for an unknown task. The state is unchanged
    /// on error.
    pub fn begin(
        &mut self,
        session: Option<&Session>,
        store: &TaskStore,
        task_id: &TaskId,
    ) -> Result<(), BoardError> {
        if self.is_active() {
            return Err(BoardError::DragInProgress);
        }
        authorize(session, Action::Move)?;
        let task = store
            .get(task_id)
            .ok_or_else(|| BoardError::NotFound(task_id.clone()))?;
        tracing::trace!(%task_id, origin = %task.status, "drag started");
        self.state = DragState::Dragging {
            task_id: task_id.clone(),
            origin: task.status,
            over: None,
        };
        Ok(())
    }

    /// Updates the column under the pointer and returns the placeholder.
    ///
    /// No placeholder is shown over the origin column, outside any column,
    /// or when idle. If the task disappeared mid-gesture there is nothing
    /// to preview either.
    pub fn hover(&mut self, store: &TaskStore, column: Option<TaskStatus>) -> Option<Placeholder> {
        let DragState::Dragging {
            task_id,
            origin,
            over,
        } = &mut self.state
        else {
            return None;
        };
        *over = column;
        let origin = *origin;
        let status = column.filter(|c| *c != origin)?;
        let task = store.get(task_id)?;
        Some(Placeholder {
            status,
            index: ordering::position(task, store.column(status)),
        })
    }

    /// Ends the gesture at `column` (or outside any column with `None`).
    ///
    /// Returns `None` if no gesture was active. Always leaves the session idle.
    pub fn release(&mut self, column: Option<TaskStatus>) -> Option<DragOutcome> {
        let DragState::Dragging {
            task_id, origin, ..
        } = std::mem::take(&mut self.state)
        else {
            return None;
        };
        let outcome = match column {
            Some(to) => DragOutcome::Dropped {
                task_id,
                from: origin,
                to,
            },
            None => DragOutcome::Cancelled { task_id },
        };
        tracing::trace!(?outcome, "drag ended");
        Some(outcome)
    }

    /// Aborts the gesture (e.g. escape). Returns `None` if idle.
    pub fn cancel(&mut self) -> Option<DragOutcome> {
        self.release(None)
    }
}
