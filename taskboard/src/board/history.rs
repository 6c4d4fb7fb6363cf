//! Bounded linear undo/redo history.
//!
//! Entries are the actions that were performed, each carrying full task
//! snapshots so it can be reversed without a live reference into the store.
//! Recording a new action discards the redo log.

use std::collections::VecDeque;

use taskboard_proto::task::{Task, TaskId, TaskStatus};

use super::store::TaskStore;
use super::{Action, BoardError};
use crate::session::{Session, authorize};

/// Default number of undoable actions kept.
pub const DEFAULT_HISTORY_DEPTH: usize = 50;

/// A reversible board action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryAction {
    /// The task was created.
    Create(Task),
    /// The task was deleted.
    Delete(Task),
    /// The task's fields changed from `before` to `after`.
    Update { before: Task, after: Task },
    /// The task changed column.
    Move {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    /// These completed tasks were cleared.
    Clear(Vec<Task>),
    /// These tasks were put back (the inverse of a clear).
    Restore(Vec<Task>),
}

impl HistoryAction {
    /// Returns the action that undoes this one.
    #[must_use]
    pub fn inverse(&self) -> Self {
        match self {
            Self::Create(task) => Self::Delete(task.clone()),
            Self::Delete(task) => Self::Create(task.clone()),
            Self::Update { before, after } => Self::Update {
                before: after.clone(),
                after: before.clone(),
            },
            Self::Move { task_id, from, to } => Self::Move {
                task_id: task_id.clone(),
                from: *to,
                to: *from,
            },
            Self::Clear(tasks) => Self::Restore(tasks.clone()),
            Self::Restore(tasks) => Self::Clear(tasks.clone()),
        }
    }

    /// Short label for logs and notices.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Delete(_) => "delete",
            Self::Update { .. } => "edit",
            Self::Move { .. } => "move",
            Self::Clear(_) => "clear",
            Self::Restore(_) => "restore",
        }
    }

    /// Rewrites references to `old` so they point at `new`.
    ///
    /// Needed when a remote re-create gives a task a fresh id.
    pub fn remap_id(&mut self, old: &TaskId, new: &TaskId) {
        let fix = |task: &mut Task| {
            if &task.id == old {
                task.id = new.clone();
            }
        };
        match self {
            Self::Create(task) | Self::Delete(task) => fix(task),
            Self::Update { before, after } => {
                fix(before);
                fix(after);
            }
            Self::Move { task_id, .. } => {
                if task_id == old {
                    *task_id = new.clone();
                }
            }
            Self::Clear(tasks) | Self::Restore(tasks) => tasks.iter_mut().for_each(fix),
        }
    }

    /// Applies this action to the store directly, keeping original ids.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::NotFound`] if a task the action needs is gone.
    pub fn apply_local(&self, store: &mut TaskStore) -> Result<(), BoardError> {
        match self {
            Self::Create(task) => store.restore(task.clone()),
            Self::Delete(task) => {
                store.remove(&task.id)?;
            }
            Self::Update { after, .. } => {
                if !store.contains(&after.id) {
                    return Err(BoardError::NotFound(after.id.clone()));
                }
                store.restore(after.clone());
            }
            Self::Move { task_id, to, .. } => {
                store.move_task(task_id, *to)?;
            }
            Self::Clear(tasks) => {
                for task in tasks {
                    if store.contains(&task.id) {
                        store.remove(&task.id)?;
                    }
                }
            }
            Self::Restore(tasks) => {
                for task in tasks {
                    store.restore(task.clone());
                }
            }
        }
        Ok(())
    }
}

/// Two bounded stacks of actions.
#[derive(Debug)]
pub struct HistoryStack {
    undo: VecDeque<HistoryAction>,
    redo: Vec<HistoryAction>,
    depth: usize,
}

impl Default for HistoryStack {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_DEPTH)
    }
}

impl HistoryStack {
    /// Creates an empty history that keeps at most `depth` undo entries.
    #[must_use]
    pub fn new(depth: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            depth: depth.max(1),
        }
    }

    /// Records a newly performed action and clears the redo log.
    pub fn record(&mut self, action: HistoryAction) {
        tracing::trace!(action = action.label(), "history recorded");
        self.push_undo(action);
        self.redo.clear();
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Forgets everything, e.g. on logout or reload.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Undoes the latest action against the store.
    ///
    /// On success the action moves to the redo log. If the inverse cannot be
    /// applied the entry is dropped and the error returned.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::PermissionDenied`] before anything else if the
    /// session may not mutate, [`BoardError::EmptyHistory`] if there is
    /// nothing to undo, or the store error from applying the inverse.
    pub fn undo(
        &mut self,
        session: Option<&Session>,
        store: &mut TaskStore,
    ) -> Result<HistoryAction, BoardError> {
        authorize(session, Action::Undo)?;
        let action = self.take_undo()?;
        match action.inverse().apply_local(store) {
            Ok(()) => {
                tracing::debug!(action = action.label(), "undone");
                self.push_redo(action.clone());
                Ok(action)
            }
            Err(e) => {
                tracing::warn!(action = action.label(), err = %e, "undo failed, entry dropped");
                Err(e)
            }
        }
    }

    /// Re-applies the most recently undone action.
    ///
    /// # Errors
    ///
    /// Same as [`HistoryStack::undo`].
    pub fn redo(
        &mut self,
        session: Option<&Session>,
        store: &mut TaskStore,
    ) -> Result<HistoryAction, BoardError> {
        authorize(session, Action::Redo)?;
        let action = self.take_redo()?;
        match action.apply_local(store) {
            Ok(()) => {
                tracing::debug!(action = action.label(), "redone");
                self.push_undo(action.clone());
                Ok(action)
            }
            Err(e) => {
                tracing::warn!(action = action.label(), err = %e, "redo failed, entry dropped");
                Err(e)
            }
        }
    }

    /// Points every recorded reference to `old` at `new`.
    pub fn remap_id(&mut self, old: &TaskId, new: &TaskId) {
        for action in self.undo.iter_mut().chain(self.redo.iter_mut()) {
            action.remap_id(old, new);
        }
    }

    /// Pops the latest undo entry without applying it.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::EmptyHistory`] if there is nothing to undo.
    pub fn take_undo(&mut self) -> Result<HistoryAction, BoardError> {
        self.undo.pop_back().ok_or(BoardError::EmptyHistory("undo"))
    }

    /// Pops the latest redo entry without applying it.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::EmptyHistory`] if there is nothing to redo.
    pub fn take_redo(&mut self) -> Result<HistoryAction, BoardError> {
        self.redo.pop().ok_or(BoardError::EmptyHistory("redo"))
    }

    /// Pushes onto the undo log without touching the redo log.
    pub fn push_undo(&mut self, action: HistoryAction) {
        if self.undo.len() == self.depth {
            self.undo.pop_front();
        }
        self.undo.push_back(action);
    }

    /// Pushes onto the redo log.
    pub fn push_redo(&mut self, action: HistoryAction) {
        if self.redo.len() == self.depth {
            self.redo.remove(0);
        }
        self.redo.push(action);
    }
}
