//! The board controller.
//!
//! [`Board`] is the single entry point for user intent. Every mutating
//! operation follows the same path: access gate, validation, optimistic
//! store mutation, remote call (networked mode) or persistence (local
//! mode), then history and a user notice. A failed remote call rolls the
//! store back to what it was before the operation.
//!
//! Operations take `&mut self`, so mutations on the board are serialized;
//! push events are applied between operations in delivery order.

use std::sync::Arc;
use std::time::Duration;

use taskboard_proto::api::User;
use taskboard_proto::event::PushMessage;
use taskboard_proto::task::{NewTask, Task, TaskId, TaskPatch, TaskStatus};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::drag::{DragOutcome, DragSession, DragState, Placeholder};
use super::history::{DEFAULT_HISTORY_DEPTH, HistoryAction, HistoryStack};
use super::reconcile::RemoteOutcome;
use super::store::{BoardChange, TaskStore};
use super::{Action, BoardError, TaskDraft, parse_status, validate_new_task, validate_patch};
use crate::notify::{DEFAULT_NOTICE_TTL, Notice, NoticeBoard, NoticeLevel, VALIDATION_NOTICE_TTL};
use crate::persist::{AUTH_TOKEN_SLOT, KeyValueStore, Theme, load_tasks, load_theme, save_tasks, save_theme};
use crate::session::{AccessToken, Session, authorize};
use crate::sync::push::PushConnector;
use crate::sync::reconnect::{LinkEvent, LinkState, PushHandle, ReconnectPolicy, spawn_push};
use crate::sync::{RemoteApi, RemoteError};

/// Where tasks live.
#[derive(Debug)]
pub enum BoardMode<R> {
    /// Tasks are persisted in the key-value store; no network.
    Local,
    /// Tasks live on the task service; the store is an optimistic mirror.
    Remote(R),
}

/// Tunables for a [`Board`].
#[derive(Debug, Clone)]
pub struct BoardOptions {
    pub history_depth: usize,
    pub notice_ttl: Duration,
    /// Name of the always-active local-mode user.
    pub local_user: String,
}

impl Default for BoardOptions {
    fn default() -> Self {
        Self {
            history_depth: DEFAULT_HISTORY_DEPTH,
            notice_ttl: DEFAULT_NOTICE_TTL,
            local_user: "local".to_string(),
        }
    }
}

/// A kanban board bound to a session and a backing mode.
pub struct Board<R> {
    mode: BoardMode<R>,
    store: TaskStore,
    history: HistoryStack,
    drag: DragSession,
    notices: NoticeBoard,
    session: Option<Session>,
    prefs: Arc<dyn KeyValueStore>,
    theme: Theme,
    push: Option<PushHandle>,
    /// Set after the first `Connected`; later ones are reconnects.
    link_was_up: bool,
}

/// A remote compensation that stopped partway.
struct Interrupted {
    /// The part that reached the service.
    realised: Option<HistoryAction>,
    /// The part still to apply.
    pending: Option<HistoryAction>,
    error: BoardError,
}

impl Interrupted {
    /// A single-task action that failed. Nothing reached the service; the
    /// whole action stays pending unless the task is gone.
    fn single(action: &HistoryAction, error: BoardError) -> Self {
        let pending = (!matches!(error, BoardError::NotFound(_))).then(|| action.clone());
        Self {
            realised: None,
            pending,
            error,
        }
    }
}

impl<R: RemoteApi> Board<R> {
    /// Creates a board.
    ///
    /// Local mode loads the saved tasks and starts an active local session.
    /// Remote mode starts empty and unauthenticated; call [`Board::login`]
    /// or [`Board::resume`].
    pub fn new(mode: BoardMode<R>, prefs: Arc<dyn KeyValueStore>, options: BoardOptions) -> Self {
        let (store, session) = match &mode {
            BoardMode::Local => (
                TaskStore::from_tasks(load_tasks(prefs.as_ref())),
                Some(Session::local(&options.local_user)),
            ),
            BoardMode::Remote(_) => (TaskStore::new(), None),
        };
        let theme = load_theme(prefs.as_ref());
        tracing::info!(
            remote = matches!(mode, BoardMode::Remote(_)),
            tasks = store.len(),
            "board opened"
        );
        Self {
            mode,
            store,
            history: HistoryStack::new(options.history_depth),
            drag: DragSession::new(),
            notices: NoticeBoard::new(options.notice_ttl),
            session,
            prefs,
            theme,
            push: None,
            link_was_up: false,
        }
    }

    // --- reads ---

    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self.mode, BoardMode::Remote(_))
    }

    #[must_use]
    pub const fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Tasks of one column in display order.
    #[must_use]
    pub fn column(&self, status: TaskStatus) -> &[Task] {
        self.store.column(status)
    }

    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.store.get(id)
    }

    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub const fn history(&self) -> &HistoryStack {
        &self.history
    }

    #[must_use]
    pub const fn drag_state(&self) -> &DragState {
        self.drag.state()
    }

    #[must_use]
    pub const fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    /// Drops expired notices and returns them.
    pub fn tick_notices(&mut self, now: Instant) -> Vec<Notice> {
        self.notices.tick(now)
    }

    /// Change notifications for the render layer.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<BoardChange> {
        self.store.subscribe()
    }

    #[must_use]
    pub const fn theme(&self) -> Theme {
        self.theme
    }

    /// Current push link state; `Disconnected` if no link was started.
    #[must_use]
    pub fn link_state(&self) -> LinkState {
        self.push
            .as_ref()
            .map_or(LinkState::Disconnected, PushHandle::state)
    }

    // --- task operations ---

    /// Adds a task from form input.
    ///
    /// # Errors
    ///
    /// [`BoardError::PermissionDenied`] before anything else, then
    /// [`BoardError::Validation`], then remote failures (after rollback).
    pub async fn add_task(&mut self, draft: &TaskDraft) -> Result<Task, BoardError> {
        let token = self.gate(Action::Add)?;
        let new = match draft.validate() {
            Ok(new) => new,
            Err(e) => return Err(self.fail(e.into())),
        };
        self.finish_create(token, new).await
    }

    /// Adds a task from already-structured fields.
    ///
    /// # Errors
    ///
    /// Same as [`Board::add_task`].
    pub async fn create_task(&mut self, new: NewTask) -> Result<Task, BoardError> {
        let token = self.gate(Action::Add)?;
        let new = match validate_new_task(new) {
            Ok(new) => new,
            Err(e) => return Err(self.fail(e.into())),
        };
        self.finish_create(token, new).await
    }

    async fn finish_create(
        &mut self,
        token: Option<AccessToken>,
        new: NewTask,
    ) -> Result<Task, BoardError> {
        match self.do_create(token.as_ref(), new).await {
            Ok(task) => {
                tracing::info!(task_id = %task.id, status = %task.status, "task added");
                self.history.record(HistoryAction::Create(task.clone()));
                self.persist();
                self.notices
                    .post(NoticeLevel::Success, "Task created successfully!");
                Ok(task)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Edits a task's fields. Status is untouched.
    ///
    /// # Errors
    ///
    /// [`BoardError::PermissionDenied`], [`BoardError::Validation`],
    /// [`BoardError::NotFound`], or a remote failure (after rollback).
    pub async fn edit_task(&mut self, id: &TaskId, patch: TaskPatch) -> Result<Task, BoardError> {
        let token = self.gate(Action::Edit)?;
        let patch = match validate_patch(patch) {
            Ok(patch) => patch,
            Err(e) => return Err(self.fail(e.into())),
        };
        match self.do_update(token.as_ref(), id, patch).await {
            Ok((before, after)) => {
                tracing::info!(task_id = %id, "task edited");
                self.history.record(HistoryAction::Update {
                    before,
                    after: after.clone(),
                });
                self.persist();
                self.notices
                    .post(NoticeLevel::Success, "Task updated successfully!");
                Ok(after)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Moves a task to another column. Moving to the current column is a
    /// successful no-op that records nothing.
    ///
    /// # Errors
    ///
    /// [`BoardError::PermissionDenied`], [`BoardError::NotFound`], or a
    /// remote failure (after rollback).
    pub async fn move_task(&mut self, id: &TaskId, status: TaskStatus) -> Result<Task, BoardError> {
        let token = self.gate(Action::Move)?;
        match self.do_move(token.as_ref(), id, status).await {
            Ok((from, task)) => {
                if from != status {
                    tracing::info!(task_id = %id, %from, to = %status, "task moved");
                    self.history.record(HistoryAction::Move {
                        task_id: task.id.clone(),
                        from,
                        to: status,
                    });
                    self.persist();
                }
                Ok(task)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Moves a task to a column given by name.
    ///
    /// # Errors
    ///
    /// As [`Board::move_task`], plus [`BoardError::InvalidStatus`] for an
    /// unknown column (checked after the gate).
    pub async fn move_task_to(&mut self, id: &TaskId, column: &str) -> Result<Task, BoardError> {
        self.gate(Action::Move)?;
        let status = match parse_status(column) {
            Ok(status) => status,
            Err(e) => return Err(self.fail(e)),
        };
        self.move_task(id, status).await
    }

    /// Deletes a task.
    ///
    /// # Errors
    ///
    /// [`BoardError::PermissionDenied`], [`BoardError::NotFound`], or a
    /// remote failure (after rollback).
    pub async fn delete_task(&mut self, id: &TaskId) -> Result<Task, BoardError> {
        let token = self.gate(Action::Delete)?;
        match self.do_delete(token.as_ref(), id).await {
            Ok(task) => {
                tracing::info!(task_id = %id, "task deleted");
                self.history.record(HistoryAction::Delete(task.clone()));
                self.persist();
                self.notices
                    .post(NoticeLevel::Success, "Task deleted successfully!");
                Ok(task)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Removes every completed task and returns what was removed.
    ///
    /// An empty result is not an error; it posts a warning notice instead
    /// of a success notice and records nothing.
    ///
    /// # Errors
    ///
    /// [`BoardError::PermissionDenied`] or a remote failure (after rollback).
    pub async fn clear_completed(&mut self) -> Result<Vec<Task>, BoardError> {
        let token = self.gate(Action::Clear)?;
        let (removed, message) = match self.do_clear(token.as_ref()).await {
            Ok(result) => result,
            Err(e) => return Err(self.fail(e)),
        };
        if removed.is_empty() && message.as_ref().is_none_or(|(count, _)| *count == 0) {
            let text = message.map_or_else(|| "No completed tasks to clear".to_string(), |(_, m)| m);
            self.notices.post(NoticeLevel::Warning, text);
            return Ok(removed);
        }
        tracing::info!(count = removed.len(), "completed tasks cleared");
        if !removed.is_empty() {
            self.history.record(HistoryAction::Clear(removed.clone()));
        }
        self.persist();
        let text = message.map_or_else(
            || format!("Cleared {} completed task(s)", removed.len()),
            |(_, m)| m,
        );
        self.notices.post(NoticeLevel::Success, text);
        Ok(removed)
    }

    // --- history ---

    /// Reverses the latest action.
    ///
    /// Local mode restores snapshots with their original ids. Networked
    /// mode issues compensating requests; a re-created task gets a new id
    /// from the service and the history is rewritten to follow it.
    ///
    /// # Errors
    ///
    /// [`BoardError::PermissionDenied`] with no state change,
    /// [`BoardError::EmptyHistory`], or the failure of the compensating
    /// action. A task that is gone remotely drops the entry; any other
    /// failure keeps the part not yet applied so it can be retried.
    pub async fn undo(&mut self) -> Result<HistoryAction, BoardError> {
        let token = self.gate(Action::Undo)?;
        let result = match token {
            Some(token) if self.is_remote() => self.undo_remote(&token).await,
            _ => self.history.undo(self.session.as_ref(), &mut self.store),
        };
        match result {
            Ok(action) => {
                self.persist();
                self.notices
                    .post(NoticeLevel::Info, format!("Undid {}", action.label()));
                Ok(action)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Re-applies the most recently undone action.
    ///
    /// # Errors
    ///
    /// Same as [`Board::undo`].
    pub async fn redo(&mut self) -> Result<HistoryAction, BoardError> {
        let token = self.gate(Action::Redo)?;
        let result = match token {
            Some(token) if self.is_remote() => self.redo_remote(&token).await,
            _ => self.history.redo(self.session.as_ref(), &mut self.store),
        };
        match result {
            Ok(action) => {
                self.persist();
                self.notices
                    .post(NoticeLevel::Info, format!("Redid {}", action.label()));
                Ok(action)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn undo_remote(&mut self, token: &AccessToken) -> Result<HistoryAction, BoardError> {
        let action = self.history.take_undo()?;
        match self.compensate(token, &action.inverse()).await {
            Ok(realised) => {
                self.history.push_redo(realised.inverse());
                Ok(action)
            }
            Err(Interrupted {
                realised,
                pending,
                error,
            }) => {
                // An expired session has already wiped the history.
                if self.session.is_some() {
                    if let Some(done) = realised {
                        self.history.push_redo(done.inverse());
                    }
                    if let Some(rest) = pending {
                        self.history.push_undo(rest.inverse());
                    }
                }
                tracing::warn!(action = action.label(), err = %error, "undo failed");
                Err(error)
            }
        }
    }

    async fn redo_remote(&mut self, token: &AccessToken) -> Result<HistoryAction, BoardError> {
        let action = self.history.take_redo()?;
        match self.compensate(token, &action).await {
            Ok(realised) => {
                self.history.push_undo(realised);
                Ok(action)
            }
            Err(Interrupted {
                realised,
                pending,
                error,
            }) => {
                if self.session.is_some() {
                    if let Some(done) = realised {
                        self.history.push_undo(done);
                    }
                    if let Some(rest) = pending {
                        self.history.push_redo(rest);
                    }
                }
                tracing::warn!(action = action.label(), err = %error, "redo failed");
                Err(error)
            }
        }
    }

    /// Performs `action` against the service and returns it as realised
    /// (with server-assigned ids and current snapshots).
    ///
    /// Multi-task actions stop at the first failure and report the part
    /// that reached the service apart from the part still to apply.
    async fn compensate(
        &mut self,
        token: &AccessToken,
        action: &HistoryAction,
    ) -> Result<HistoryAction, Interrupted> {
        match action {
            HistoryAction::Create(task) => {
                let created = self
                    .recreate(token, task)
                    .await
                    .map_err(|e| Interrupted::single(action, e))?;
                Ok(HistoryAction::Create(created))
            }
            HistoryAction::Delete(task) => {
                let removed = self
                    .do_delete(Some(token), &task.id)
                    .await
                    .map_err(|e| Interrupted::single(action, e))?;
                Ok(HistoryAction::Delete(removed))
            }
            HistoryAction::Update { after, .. } => {
                let (before, after) = self
                    .do_update(Some(token), &after.id, TaskPatch::from_task(after))
                    .await
                    .map_err(|e| Interrupted::single(action, e))?;
                Ok(HistoryAction::Update { before, after })
            }
            HistoryAction::Move { task_id, to, .. } => {
                let (from, task) = self
                    .do_move(Some(token), task_id, *to)
                    .await
                    .map_err(|e| Interrupted::single(action, e))?;
                Ok(HistoryAction::Move {
                    task_id: task.id,
                    from,
                    to: *to,
                })
            }
            HistoryAction::Clear(tasks) => {
                let mut removed = Vec::with_capacity(tasks.len());
                for (i, task) in tasks.iter().enumerate() {
                    match self.do_delete(Some(token), &task.id).await {
                        Ok(task) => removed.push(task),
                        // Already gone; nothing to clear.
                        Err(BoardError::NotFound(_)) => {}
                        Err(error) => {
                            return Err(Interrupted {
                                realised: (!removed.is_empty())
                                    .then(|| HistoryAction::Clear(removed)),
                                pending: Some(HistoryAction::Clear(tasks[i..].to_vec())),
                                error,
                            });
                        }
                    }
                }
                Ok(HistoryAction::Clear(removed))
            }
            HistoryAction::Restore(tasks) => {
                let mut created = Vec::with_capacity(tasks.len());
                for (i, task) in tasks.iter().enumerate() {
                    match self.recreate(token, task).await {
                        Ok(task) => created.push(task),
                        Err(error) => {
                            return Err(Interrupted {
                                realised: (!created.is_empty())
                                    .then(|| HistoryAction::Restore(created)),
                                pending: Some(HistoryAction::Restore(tasks[i..].to_vec())),
                                error,
                            });
                        }
                    }
                }
                Ok(HistoryAction::Restore(created))
            }
        }
    }

    /// Re-creates a snapshot on the service and follows its new id.
    async fn recreate(&mut self, token: &AccessToken, task: &Task) -> Result<Task, BoardError> {
        let created = self
            .do_create(Some(token), NewTask::from_task(task))
            .await?;
        if created.id != task.id {
            self.history.remap_id(&task.id, &created.id);
        }
        Ok(created)
    }

    // --- drag and drop ---

    /// Starts dragging a task.
    ///
    /// # Errors
    ///
    /// [`BoardError::DragInProgress`], [`BoardError::PermissionDenied`], or
    /// [`BoardError::NotFound`]; the drag state is unchanged.
    pub fn begin_drag(&mut self, id: &TaskId) -> Result<(), BoardError> {
        match self.drag.begin(self.session.as_ref(), &self.store, id) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Updates the column under the pointer; returns the landing preview.
    pub fn hover_drag(&mut self, column: Option<TaskStatus>) -> Option<Placeholder> {
        self.drag.hover(&self.store, column)
    }

    /// Ends the gesture. Dropping over a column moves the task there.
    ///
    /// The drag session is idle afterwards whether or not the move worked.
    ///
    /// # Errors
    ///
    /// Whatever [`Board::move_task`] returns.
    pub async fn drop_drag(&mut self, column: Option<TaskStatus>) -> Result<Option<Task>, BoardError> {
        match self.drag.release(column) {
            Some(DragOutcome::Dropped { task_id, to, .. }) => {
                self.move_task(&task_id, to).await.map(Some)
            }
            Some(DragOutcome::Cancelled { .. }) | None => Ok(None),
        }
    }

    /// Aborts the gesture.
    pub fn cancel_drag(&mut self) {
        self.drag.cancel();
    }

    // --- session ---

    /// Logs in and loads the board.
    ///
    /// # Errors
    ///
    /// [`BoardError::Rejected`] for bad credentials or in local mode;
    /// [`BoardError::RemoteUnavailable`] if the service cannot be reached.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<User, BoardError> {
        let BoardMode::Remote(api) = &self.mode else {
            return Err(BoardError::Rejected(
                "login requires a task service".to_string(),
            ));
        };
        let result = async {
            let resp = api.login(username, password).await?;
            let token = AccessToken::new(resp.access_token);
            let user = match resp.user {
                Some(user) => user,
                None => api.me(&token).await?,
            };
            let tasks = api.list_tasks(&token).await?;
            Ok::<_, RemoteError>((user, token, tasks))
        }
        .await;

        match result {
            Ok((user, token, tasks)) => {
                self.begin_session(user.clone(), token, tasks);
                Ok(user)
            }
            Err(RemoteError::Unauthorized) => Err(self.fail(BoardError::Rejected(
                "Incorrect username or password".to_string(),
            ))),
            Err(e) => Err(self.fail(BoardError::from_remote(e, None))),
        }
    }

    /// Resumes the session saved by a previous login.
    ///
    /// Returns `None` if there is no saved token or the service no longer
    /// accepts it (the stale token is then forgotten).
    ///
    /// # Errors
    ///
    /// [`BoardError::Storage`] if the token slot cannot be read, or
    /// [`BoardError::RemoteUnavailable`].
    pub async fn resume(&mut self) -> Result<Option<User>, BoardError> {
        let BoardMode::Remote(api) = &self.mode else {
            return Ok(None);
        };
        let Some(raw) = self.prefs.get(AUTH_TOKEN_SLOT)? else {
            return Ok(None);
        };
        let token = AccessToken::new(raw);
        let result = async {
            let user = api.me(&token).await?;
            let tasks = api.list_tasks(&token).await?;
            Ok::<_, RemoteError>((user, tasks))
        }
        .await;

        match result {
            Ok((user, tasks)) => {
                self.begin_session(user.clone(), token, tasks);
                Ok(Some(user))
            }
            Err(RemoteError::Unauthorized) => {
                tracing::info!("saved token rejected, staying logged out");
                self.forget_session();
                Ok(None)
            }
            Err(e) => Err(self.fail(BoardError::from_remote(e, None))),
        }
    }

    /// Ends the session: stops the push link, tells the service (best
    /// effort), and forgets the token. A no-op in local mode.
    pub async fn logout(&mut self) {
        if !self.is_remote() {
            return;
        }
        self.stop_push().await;
        let token = self.session.take().and_then(|s| s.token().cloned());
        if let (BoardMode::Remote(api), Some(token)) = (&self.mode, token)
            && let Err(e) = api.logout(&token).await
        {
            tracing::warn!(err = %e, "logout request failed, clearing session anyway");
        }
        self.forget_session();
        tracing::info!("logged out");
        self.notices.post(NoticeLevel::Info, "Logged out");
    }

    /// Reloads every task from the service. In local mode this re-reads the
    /// saved board.
    ///
    /// # Errors
    ///
    /// [`BoardError::SessionExpired`] without a session, or a remote failure.
    pub async fn refresh(&mut self) -> Result<usize, BoardError> {
        if !self.is_remote() {
            self.store.replace_all(load_tasks(self.prefs.as_ref()));
            return Ok(self.store.len());
        }
        let Some(token) = self.session.as_ref().and_then(Session::token).cloned() else {
            return Err(self.fail(BoardError::SessionExpired));
        };
        let result = match &self.mode {
            BoardMode::Remote(api) => api.list_tasks(&token).await,
            BoardMode::Local => return Ok(self.store.len()),
        };
        match result {
            Ok(tasks) => {
                self.store.replace_all(tasks);
                tracing::debug!(tasks = self.store.len(), "board refreshed");
                Ok(self.store.len())
            }
            Err(e) => {
                let e = self.remote_error(e, None);
                Err(self.fail(e))
            }
        }
    }

    fn begin_session(&mut self, user: User, token: AccessToken, tasks: Vec<Task>) {
        if let Err(e) = self.prefs.set(AUTH_TOKEN_SLOT, token.expose()) {
            tracing::warn!(err = %e, "failed to save auth token");
        }
        tracing::info!(user = %user.username, active = user.is_active, "session started");
        self.notices.post(
            NoticeLevel::Success,
            format!("Welcome, {}!", user.display_name()),
        );
        if !user.is_active {
            self.notices.post(
                NoticeLevel::Warning,
                "Your account is inactive. The board is read-only.",
            );
        }
        self.session = Some(Session::authenticated(user, token));
        self.history.clear();
        self.store.replace_all(tasks);
    }

    /// Drops all session-bound state after a 401 or a push rejection.
    fn expire_session(&mut self) {
        tracing::warn!("session expired");
        if let Some(push) = self.push.take() {
            push.request_stop();
        }
        self.session = None;
        self.forget_session();
    }

    fn forget_session(&mut self) {
        if let Err(e) = self.prefs.remove(AUTH_TOKEN_SLOT) {
            tracing::warn!(err = %e, "failed to remove auth token");
        }
        self.history.clear();
        self.drag.cancel();
        self.store.replace_all(Vec::new());
    }

    // --- push ---

    /// Starts the live-update link for the current session.
    ///
    /// Feed the returned events to [`Board::handle_link_event`].
    ///
    /// # Errors
    ///
    /// [`BoardError::SessionExpired`] without an authenticated session.
    pub fn start_push<C: PushConnector>(
        &mut self,
        connector: C,
        policy: ReconnectPolicy,
        capacity: usize,
    ) -> Result<mpsc::Receiver<LinkEvent>, BoardError> {
        let Some(token) = self.session.as_ref().and_then(Session::token).cloned() else {
            return Err(BoardError::SessionExpired);
        };
        if let Some(old) = self.push.take() {
            old.request_stop();
        }
        let (handle, events) = spawn_push(connector, token, policy, capacity);
        self.push = Some(handle);
        self.link_was_up = false;
        Ok(events)
    }

    /// Closes the live-update link and cancels any pending reconnect.
    pub async fn stop_push(&mut self) {
        if let Some(push) = self.push.take() {
            push.stop().await;
        }
    }

    /// Reacts to a link supervisor event.
    ///
    /// A reconnect triggers a full refresh to catch up on missed events.
    /// Returns the reconciliation outcome for push messages.
    pub async fn handle_link_event(&mut self, event: LinkEvent) -> Option<RemoteOutcome> {
        match event {
            LinkEvent::Push(message) => return self.apply_push(message),
            LinkEvent::Connected => {
                if self.link_was_up {
                    match self.refresh().await {
                        Ok(_) => {
                            self.notices
                                .post(NoticeLevel::Success, "Live updates restored");
                        }
                        Err(e) => tracing::warn!(err = %e, "resync after reconnect failed"),
                    }
                }
                self.link_was_up = true;
            }
            LinkEvent::Disconnected { reason } => {
                self.notices.post(
                    NoticeLevel::Warning,
                    format!("Live updates disconnected: {reason}"),
                );
            }
            LinkEvent::Reconnecting {
                attempt,
                max_attempts,
                ..
            } => {
                self.notices.post(
                    NoticeLevel::Info,
                    format!("Reconnecting ({attempt}/{max_attempts})..."),
                );
            }
            LinkEvent::GaveUp => {
                self.notices.post(
                    NoticeLevel::Error,
                    "Live updates are unavailable. Refresh to try again.",
                );
            }
            LinkEvent::SessionRejected { code, reason } => {
                tracing::warn!(code, %reason, "push link rejected the session");
                self.expire_session();
                self.fail(BoardError::SessionExpired);
            }
        }
        None
    }

    /// Applies one push message to the store.
    ///
    /// Returns `None` for control messages.
    pub fn apply_push(&mut self, message: PushMessage) -> Option<RemoteOutcome> {
        let event = message.into_remote_event()?;
        let outcome = self.store.apply_remote_event(&event);
        tracing::debug!(task_id = ?event.task_id(), ?outcome, "push event applied");
        Some(outcome)
    }

    // --- preferences ---

    /// Flips between light and dark and saves the choice.
    ///
    /// # Errors
    ///
    /// [`BoardError::Storage`] if the preference cannot be written.
    pub fn toggle_theme(&mut self) -> Result<Theme, BoardError> {
        let theme = self.theme.toggled();
        save_theme(self.prefs.as_ref(), theme)?;
        self.theme = theme;
        Ok(theme)
    }

    // --- primitives: store mutation plus remote call with rollback ---

    async fn do_create(
        &mut self,
        token: Option<&AccessToken>,
        new: NewTask,
    ) -> Result<Task, BoardError> {
        let provisional = self.store.create(new.clone())?;
        let result = match (&self.mode, token) {
            (BoardMode::Remote(api), Some(token)) => api.create_task(token, &new).await,
            _ => return Ok(provisional),
        };
        match result {
            Ok(confirmed) => {
                self.store.adopt(&provisional.id, confirmed.clone());
                Ok(confirmed)
            }
            Err(e) => {
                tracing::debug!(task_id = %provisional.id, "rolling back create");
                self.store.discard(&provisional.id);
                Err(self.remote_error(e, None))
            }
        }
    }

    /// Returns the task before and after the edit.
    async fn do_update(
        &mut self,
        token: Option<&AccessToken>,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<(Task, Task), BoardError> {
        let before = self
            .store
            .get(id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(id.clone()))?;
        let optimistic = self.store.update(id, patch.clone())?;
        let result = match (&self.mode, token) {
            (BoardMode::Remote(api), Some(token)) => api.update_task(token, id, &patch).await,
            _ => return Ok((before, optimistic)),
        };
        match result {
            Ok(confirmed) => {
                self.store.adopt(id, confirmed.clone());
                Ok((before, confirmed))
            }
            Err(e) => {
                self.roll_back(before, &e);
                Err(self.remote_error(e, Some(id)))
            }
        }
    }

    /// Returns the original column and the moved task.
    async fn do_move(
        &mut self,
        token: Option<&AccessToken>,
        id: &TaskId,
        status: TaskStatus,
    ) -> Result<(TaskStatus, Task), BoardError> {
        let before = self
            .store
            .get(id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(id.clone()))?;
        if before.status == status {
            return Ok((status, before));
        }
        let from = before.status;
        let optimistic = self.store.move_task(id, status)?;
        let result = match (&self.mode, token) {
            (BoardMode::Remote(api), Some(token)) => api.move_task(token, id, status).await,
            _ => return Ok((from, optimistic)),
        };
        match result {
            Ok(confirmed) => {
                self.store.adopt(id, confirmed.clone());
                Ok((from, confirmed))
            }
            Err(e) => {
                self.roll_back(before, &e);
                Err(self.remote_error(e, Some(id)))
            }
        }
    }

    async fn do_delete(
        &mut self,
        token: Option<&AccessToken>,
        id: &TaskId,
    ) -> Result<Task, BoardError> {
        let removed = self.store.remove(id)?;
        let result = match (&self.mode, token) {
            (BoardMode::Remote(api), Some(token)) => api.delete_task(token, id).await,
            _ => return Ok(removed),
        };
        match result {
            Ok(()) => Ok(removed),
            Err(e) => {
                // A 404 means someone else deleted it; keep it gone.
                if !matches!(e, RemoteError::NotFound(_)) {
                    tracing::debug!(task_id = %id, "rolling back delete");
                    self.store.restore(removed);
                }
                Err(self.remote_error(e, Some(id)))
            }
        }
    }

    /// Returns the removed tasks and, in networked mode, the service's
    /// `(deleted_count, message)`.
    async fn do_clear(
        &mut self,
        token: Option<&AccessToken>,
    ) -> Result<(Vec<Task>, Option<(usize, String)>), BoardError> {
        let removed = self.store.clear_completed();
        let result = match (&self.mode, token) {
            (BoardMode::Remote(api), Some(token)) => api.clear_done(token).await,
            _ => return Ok((removed, None)),
        };
        match result {
            Ok(resp) => Ok((removed, Some((resp.deleted_count, resp.message)))),
            Err(e) => {
                tracing::debug!(count = removed.len(), "rolling back clear");
                for task in removed {
                    self.store.restore(task);
                }
                Err(self.remote_error(e, None))
            }
        }
    }

    /// Undoes an optimistic edit or move. A 404 drops the task instead.
    fn roll_back(&mut self, before: Task, err: &RemoteError) {
        if matches!(err, RemoteError::NotFound(_)) {
            tracing::debug!(task_id = %before.id, "task gone remotely, dropping it");
            // Tombstoned so a late upsert cannot bring it back.
            if let Err(e) = self.store.remove(&before.id) {
                tracing::trace!(err = %e, "task already absent locally");
            }
        } else {
            tracing::debug!(task_id = %before.id, "rolling back");
            self.store.restore(before);
        }
    }

    // --- helpers ---

    /// Checks the access gate and returns the token to use.
    fn gate(&mut self, action: Action) -> Result<Option<AccessToken>, BoardError> {
        let remote = self.is_remote();
        match authorize(self.session.as_ref(), action).map(|s| s.token().cloned()) {
            Ok(None) if remote => Err(self.fail(BoardError::SessionExpired)),
            Ok(token) => Ok(token),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Converts a remote failure, ending the session on a 401.
    fn remote_error(&mut self, err: RemoteError, id: Option<&TaskId>) -> BoardError {
        tracing::warn!(err = %err, "remote request failed");
        if err == RemoteError::Unauthorized {
            self.expire_session();
        }
        BoardError::from_remote(err, id)
    }

    /// Posts `err` as a notice and hands it back.
    fn fail(&mut self, err: BoardError) -> BoardError {
        match &err {
            BoardError::Validation(_) => {
                self.notices
                    .post_for(NoticeLevel::Error, err.to_string(), VALIDATION_NOTICE_TTL);
            }
            BoardError::EmptyHistory(_) => {
                self.notices.post(NoticeLevel::Warning, err.to_string());
            }
            _ => {
                self.notices.post(NoticeLevel::Error, err.to_string());
            }
        }
        err
    }

    /// Saves the board in local mode.
    fn persist(&mut self) {
        if self.is_remote() {
            return;
        }
        if let Err(e) = save_tasks(self.prefs.as_ref(), &self.store.snapshot()) {
            tracing::error!(err = %e, "failed to save tasks");
            self.notices
                .post(NoticeLevel::Error, format!("Could not save tasks: {e}"));
        }
    }
}
