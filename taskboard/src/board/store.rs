//! The authoritative in-memory task collection.
//!
//! `TaskStore` keeps one sorted vector per column plus an id index, so a
//! task always lives in exactly one column and ids are unique board-wide.
//! Every successful mutation is broadcast to subscribers as a
//! [`BoardChange`]. The store knows nothing about sessions, persistence, or
//! the network; [`super::Board`] layers those on top.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use taskboard_proto::event::RemoteEvent;
use taskboard_proto::task::{NewTask, Task, TaskId, TaskPatch, TaskStatus};
use tokio::sync::mpsc;

use super::reconcile::{self, Decision, RemoteOutcome, SkipReason};
use super::{BoardError, ordering, validate_new_task, validate_patch};

/// A change notification for the render layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardChange {
    /// A task was added to a column.
    Added { id: TaskId, status: TaskStatus },
    /// A task's fields changed without leaving its column.
    Updated { id: TaskId, status: TaskStatus },
    /// A task changed column.
    Moved {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    /// A task was removed.
    Removed { id: TaskId, status: TaskStatus },
    /// The order of a column changed.
    Reordered { status: TaskStatus },
    /// The whole board was replaced.
    Reloaded,
}

/// Most deleted ids remembered. Ids are never reused, so forgetting the
/// oldest only matters for events delayed past this many deletions.
pub const MAX_TOMBSTONES: usize = 1024;

/// Ids removed from the store, oldest evicted first.
#[derive(Debug, Default)]
struct Tombstones {
    ids: HashSet<TaskId>,
    order: VecDeque<TaskId>,
}

impl Tombstones {
    fn contains(&self, id: &TaskId) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: TaskId) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > MAX_TOMBSTONES
            && let Some(oldest) = self.order.pop_front()
        {
            self.ids.remove(&oldest);
        }
    }

    fn remove(&mut self, id: &TaskId) {
        if self.ids.remove(id) {
            self.order.retain(|t| t != id);
        }
    }

    fn clear(&mut self) {
        self.ids.clear();
        self.order.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Ordered, de-duplicated task collection grouped by column.
#[derive(Debug, Default)]
pub struct TaskStore {
    /// One sorted vector per [`TaskStatus`], indexed by `TaskStatus::index`.
    columns: [Vec<Task>; 4],
    /// Task ID -> column it currently occupies.
    index: HashMap<TaskId, TaskStatus>,
    /// Ids removed from this store; remote upserts for them are ignored.
    tombstones: Tombstones,
    subscribers: Vec<mpsc::UnboundedSender<BoardChange>>,
}

impl TaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `tasks`, sorted into their columns.
    ///
    /// Later duplicates of an id are dropped.
    #[must_use]
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let mut store = Self::new();
        store.load(tasks);
        store
    }

    /// Returns a receiver for every subsequent change.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<BoardChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    // --- reads ---

    /// Returns every column in board order with its tasks in column order.
    pub fn list(&self) -> impl Iterator<Item = (TaskStatus, &[Task])> {
        TaskStatus::ALL
            .into_iter()
            .map(|status| (status, self.column(status)))
    }

    /// Returns the tasks of one column in order.
    #[must_use]
    pub fn column(&self, status: TaskStatus) -> &[Task] {
        &self.columns[status.index()]
    }

    /// Iterates over all tasks in board order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.columns.iter().flatten()
    }

    /// Clones all tasks in board order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks().cloned().collect()
    }

    /// Looks up a task by id.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        let (status, idx) = self.locate(id)?;
        self.columns[status.index()].get(idx)
    }

    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    // --- local mutations ---

    /// Adds a task with a new local id, status from `new`, and `created_at = now`.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::Validation`] if the client name is blank or too long.
    pub fn create(&mut self, new: NewTask) -> Result<Task, BoardError> {
        let new = validate_new_task(new)?;
        let task = Task::from_new(TaskId::new_local(), new, Utc::now());
        tracing::debug!(task_id = %task.id, status = %task.status, "task created");
        self.upsert(task.clone());
        Ok(task)
    }

    /// Applies a partial edit. Status is never changed here.
    ///
    /// A change of processing class re-files the task within its column.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::NotFound`] for an unknown id or
    /// [`BoardError::Validation`] for an invalid patch.
    pub fn update(&mut self, id: &TaskId, patch: TaskPatch) -> Result<Task, BoardError> {
        let patch = validate_patch(patch)?;
        let mut task = self
            .get(id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(id.clone()))?;
        patch.apply_to(&mut task);
        task.updated_at = Some(Utc::now());
        tracing::debug!(task_id = %id, "task updated");
        self.upsert(task.clone());
        Ok(task)
    }

    /// Moves a task to another column, re-filing it by the ordering rules.
    ///
    /// Moving a task to the column it already occupies is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::NotFound`] for an unknown id.
    pub fn move_task(&mut self, id: &TaskId, status: TaskStatus) -> Result<Task, BoardError> {
        let mut task = self
            .get(id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(id.clone()))?;
        if task.status == status {
            return Ok(task);
        }
        let now = Utc::now();
        let from = task.status;
        task.set_status(status, now);
        task.updated_at = Some(now);
        tracing::debug!(task_id = %id, %from, to = %status, "task moved");
        self.upsert(task.clone());
        Ok(task)
    }

    /// Removes a task and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::NotFound`] for an unknown id.
    pub fn remove(&mut self, id: &TaskId) -> Result<Task, BoardError> {
        let task = self
            .take(id)
            .ok_or_else(|| BoardError::NotFound(id.clone()))?;
        self.tombstones.insert(id.clone());
        tracing::debug!(task_id = %id, "task removed");
        self.emit(BoardChange::Removed {
            id: task.id.clone(),
            status: task.status,
        });
        Ok(task)
    }

    /// Removes every task in the `done` column and returns them in order.
    ///
    /// An empty result means there was nothing to clear.
    pub fn clear_completed(&mut self) -> Vec<Task> {
        let removed = std::mem::take(&mut self.columns[TaskStatus::Done.index()]);
        for task in &removed {
            self.index.remove(&task.id);
            self.tombstones.insert(task.id.clone());
        }
        for task in &removed {
            self.emit(BoardChange::Removed {
                id: task.id.clone(),
                status: TaskStatus::Done,
            });
        }
        tracing::debug!(count = removed.len(), "cleared completed tasks");
        removed
    }

    /// Puts a task back exactly as given, even if it was deleted before.
    ///
    /// Used for undo and for rolling back optimistic mutations.
    pub fn restore(&mut self, task: Task) {
        self.tombstones.remove(&task.id);
        self.upsert(task);
    }

    /// Replaces a provisional record with the version confirmed by the server.
    ///
    /// The confirmed task may carry a different id than the provisional one.
    pub fn adopt(&mut self, provisional: &TaskId, confirmed: Task) {
        if provisional != &confirmed.id
            && let Some(old) = self.take(provisional)
        {
            self.emit(BoardChange::Removed {
                id: old.id,
                status: old.status,
            });
        }
        self.tombstones.remove(&confirmed.id);
        self.upsert(confirmed);
    }

    /// Discards a record without tombstoning it (rollback of an optimistic create).
    pub fn discard(&mut self, id: &TaskId) -> Option<Task> {
        let task = self.take(id)?;
        self.emit(BoardChange::Removed {
            id: task.id.clone(),
            status: task.status,
        });
        Some(task)
    }

    /// Replaces the whole collection, e.g. after a full fetch.
    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        self.load(tasks);
        self.tombstones.clear();
        tracing::debug!(count = self.len(), "board reloaded");
        self.emit(BoardChange::Reloaded);
    }

    // --- remote events ---

    /// Applies a remote-originated event idempotently.
    ///
    /// Echoes of changes already reflected locally, stale versions, and
    /// events for deleted tasks leave the store unchanged.
    pub fn apply_remote_event(&mut self, event: &RemoteEvent) -> RemoteOutcome {
        match event {
            RemoteEvent::Created(task) | RemoteEvent::Updated(task) | RemoteEvent::Moved(task) => {
                self.apply_remote_task(task)
            }
            RemoteEvent::Deleted(id) => self.remove_remote(std::slice::from_ref(id)),
            RemoteEvent::Cleared(ids) => self.remove_remote(ids),
        }
    }

    fn apply_remote_task(&mut self, incoming: &Task) -> RemoteOutcome {
        let tombstoned = self.tombstones.contains(&incoming.id);
        match reconcile::decide_upsert(self.get(&incoming.id), incoming, tombstoned) {
            Decision::Insert | Decision::Replace => {
                self.upsert(incoming.clone());
                RemoteOutcome::Changed
            }
            Decision::Skip(reason) => {
                tracing::trace!(task_id = %incoming.id, ?reason, "remote event skipped");
                RemoteOutcome::Skipped(reason)
            }
        }
    }

    fn remove_remote(&mut self, ids: &[TaskId]) -> RemoteOutcome {
        let mut changed = false;
        for id in ids {
            self.tombstones.insert(id.clone());
            if let Some(task) = self.take(id) {
                changed = true;
                self.emit(BoardChange::Removed {
                    id: task.id,
                    status: task.status,
                });
            }
        }
        if changed {
            RemoteOutcome::Changed
        } else {
            RemoteOutcome::Skipped(SkipReason::Absent)
        }
    }

    // --- internals ---

    fn load(&mut self, tasks: Vec<Task>) {
        for column in &mut self.columns {
            column.clear();
        }
        self.index.clear();
        for task in tasks {
            if self.index.contains_key(&task.id) {
                tracing::warn!(task_id = %task.id, "duplicate task id dropped");
                continue;
            }
            self.index.insert(task.id.clone(), task.status);
            self.columns[task.status.index()].push(task);
        }
        for column in &mut self.columns {
            ordering::sort_column(column);
        }
    }

    fn locate(&self, id: &TaskId) -> Option<(TaskStatus, usize)> {
        let status = *self.index.get(id)?;
        let idx = self.columns[status.index()]
            .iter()
            .position(|t| &t.id == id)?;
        Some((status, idx))
    }

    fn take(&mut self, id: &TaskId) -> Option<Task> {
        let (status, idx) = self.locate(id)?;
        self.index.remove(id);
        Some(self.columns[status.index()].remove(idx))
    }

    /// Inserts at the ordering position for its column.
    fn file(&mut self, task: Task) -> usize {
        let status = task.status;
        let column = &mut self.columns[status.index()];
        let idx = ordering::position(&task, column);
        self.index.insert(task.id.clone(), status);
        column.insert(idx, task);
        idx
    }

    /// Inserts or replaces a task and emits the matching change.
    ///
    /// A replacement with the same sort keys keeps its slot, so equal-key
    /// neighbours never swap.
    fn upsert(&mut self, task: Task) {
        let id = task.id.clone();
        let status = task.status;
        let Some((old_status, old_idx)) = self.locate(&id) else {
            self.file(task);
            self.emit(BoardChange::Added { id, status });
            return;
        };

        let column = &mut self.columns[old_status.index()];
        let same_slot = old_status == status
            && column[old_idx].processing == task.processing
            && column[old_idx].created_at == task.created_at;
        if same_slot {
            column[old_idx] = task;
            self.emit(BoardChange::Updated { id, status });
            return;
        }

        column.remove(old_idx);
        let new_idx = self.file(task);
        if old_status == status {
            self.emit(BoardChange::Updated { id, status });
            if new_idx != old_idx {
                self.emit(BoardChange::Reordered { status });
            }
        } else {
            self.emit(BoardChange::Moved {
                id,
                from: old_status,
                to: status,
            });
        }
    }

    fn emit(&mut self, change: BoardChange) {
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}
