//! In-process stand-in for the task service.
//!
//! [`LoopbackRemote`] keeps users, tokens and tasks in memory and follows
//! the service's observable behaviour: server-assigned ids and guest codes,
//! 403 for inactive users, a broadcast of every mutation to all open push
//! links (the originator included), and the `"warning"` shape of an empty
//! clear. Failure injection (`set_offline`, `fail_next`, `fail_nth`,
//! `revoke_tokens`, `drop_links`) lets tests drive rollback and reconnect
//! paths.
//!
//! Clones share state, so one instance can serve as both the
//! [`RemoteApi`] and the [`PushConnector`] of a board.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use taskboard_proto::api::{ClearDoneResponse, LoginResponse, User};
use taskboard_proto::event::{ClearedTasks, DeletedTask, PushMessage};
use taskboard_proto::guest::{GuestCode, GuestStatus, status_message};
use taskboard_proto::task::{
    GUEST_CODE_PREFIX, NewTask, Task, TaskId, TaskOwner, TaskPatch, TaskStatus,
};
use tokio::sync::mpsc;

use super::push::{CloseReason, LinkFrame, PushConnector, PushError};
use super::{RemoteApi, RemoteError};
use crate::session::AccessToken;

/// Frame buffer per push link.
const LINK_CAPACITY: usize = 256;

#[derive(Debug)]
struct Account {
    user: User,
    password: String,
}

#[derive(Debug, Default)]
struct State {
    accounts: Vec<Account>,
    tokens: HashMap<String, u64>,
    tasks: Vec<Task>,
    next_user_id: u64,
    next_task_id: u64,
    next_token: u64,
    offline: bool,
    fail_next: Option<RemoteError>,
    /// Requests left before the armed failure fires.
    fail_after: Option<(u64, RemoteError)>,
    requests: u64,
    links: Vec<mpsc::Sender<LinkFrame>>,
}

impl State {
    /// Counts the request and applies offline/injected failures.
    fn enter(&mut self) -> Result<(), RemoteError> {
        self.requests += 1;
        if self.offline {
            return Err(RemoteError::Unavailable("loopback service offline".to_string()));
        }
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        if let Some((left, _)) = &mut self.fail_after {
            *left = left.saturating_sub(1);
            if *left == 0
                && let Some((_, err)) = self.fail_after.take()
            {
                return Err(err);
            }
        }
        Ok(())
    }

    fn authenticate(&mut self, token: &AccessToken) -> Result<User, RemoteError> {
        self.enter()?;
        let user_id = *self
            .tokens
            .get(token.expose())
            .ok_or(RemoteError::Unauthorized)?;
        self.accounts
            .iter()
            .find(|a| a.user.id == user_id)
            .map(|a| a.user.clone())
            .ok_or(RemoteError::Unauthorized)
    }

    /// Authenticates and requires an active account.
    fn authorize(&mut self, token: &AccessToken, verb: &str) -> Result<User, RemoteError> {
        let user = self.authenticate(token)?;
        if user.is_active {
            Ok(user)
        } else {
            Err(RemoteError::Forbidden(format!(
                "Inactive users cannot {verb} tasks"
            )))
        }
    }

    fn position(&self, id: &TaskId) -> Result<usize, RemoteError> {
        self.tasks
            .iter()
            .position(|t| &t.id == id)
            .ok_or_else(|| RemoteError::NotFound("Task not found".to_string()))
    }

    fn insert(&mut self, new: NewTask, owner: &User) -> Task {
        self.next_task_id += 1;
        let id = self.next_task_id;
        let now = Utc::now();
        let mut task = Task::from_new(TaskId::Remote(id), new, now);
        task.custom_id = Some(guest_code_for(id));
        task.owner = Some(TaskOwner {
            id: owner.id,
            username: owner.username.clone(),
            full_name: owner.full_name.clone(),
        });
        task.updated_at = Some(now);
        self.tasks.push(task.clone());
        self.broadcast(PushMessage::TaskCreated { data: task.clone() });
        task
    }

    /// Sends `message` to every open link, forgetting closed ones.
    fn broadcast(&mut self, message: PushMessage) {
        self.links.retain(|link| {
            match link.try_send(LinkFrame::Message(message.clone())) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("loopback push link full, event dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

/// In-memory task service.
#[derive(Debug, Clone, Default)]
pub struct LoopbackRemote {
    state: Arc<Mutex<State>>,
}

impl LoopbackRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account and returns its user record.
    pub fn add_user(&self, username: &str, password: &str, active: bool) -> User {
        let mut state = self.state.lock();
        state.next_user_id += 1;
        let user = User {
            id: state.next_user_id,
            username: username.to_string(),
            email: None,
            full_name: None,
            is_active: active,
            is_admin: false,
        };
        state.accounts.push(Account {
            user: user.clone(),
            password: password.to_string(),
        });
        user
    }

    /// Activates or deactivates an account.
    pub fn set_active(&self, username: &str, active: bool) {
        let mut state = self.state.lock();
        if let Some(account) = state
            .accounts
            .iter_mut()
            .find(|a| a.user.username == username)
        {
            account.user.is_active = active;
        }
    }

    /// While offline every request fails with `Unavailable` and push
    /// connects are refused.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Fails the next request with `err`.
    pub fn fail_next(&self, err: RemoteError) {
        self.state.lock().fail_next = Some(err);
    }

    /// Fails the `n`th request from now (1 is the next one) with `err`.
    pub fn fail_nth(&self, n: u64, err: RemoteError) {
        self.state.lock().fail_after = Some((n.max(1), err));
    }

    /// Invalidates every issued token, as if they all expired.
    pub fn revoke_tokens(&self) {
        self.state.lock().tokens.clear();
    }

    /// Drops every open push link as if the network went away.
    pub fn drop_links(&self) {
        let links = std::mem::take(&mut self.state.lock().links);
        for link in links {
            let _ = link.try_send(LinkFrame::Closed(CloseReason::Lost(
                "connection reset".to_string(),
            )));
        }
    }

    /// Number of push links currently open.
    #[must_use]
    pub fn link_count(&self) -> usize {
        let mut state = self.state.lock();
        state.links.retain(|l| !l.is_closed());
        state.links.len()
    }

    /// Requests served so far, including failed ones.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.state.lock().requests
    }

    /// The service's current task list.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.state.lock().tasks.clone()
    }

    /// Creates a task as `username`, the way another client would.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotFound`] for an unknown user.
    pub fn create_as(&self, username: &str, new: NewTask) -> Result<Task, RemoteError> {
        let mut state = self.state.lock();
        let owner = state
            .accounts
            .iter()
            .find(|a| a.user.username == username)
            .map(|a| a.user.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("user {username}")))?;
        Ok(state.insert(new, &owner))
    }

    /// Moves a task the way another client would.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotFound`] for an unknown task.
    pub fn move_as_other(&self, id: &TaskId, status: TaskStatus) -> Result<Task, RemoteError> {
        let mut state = self.state.lock();
        let idx = state.position(id)?;
        Ok(apply_move(&mut state, idx, status))
    }

    /// Deletes a task the way another client would.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotFound`] for an unknown task.
    pub fn delete_as_other(&self, id: &TaskId) -> Result<Task, RemoteError> {
        let mut state = self.state.lock();
        let idx = state.position(id)?;
        Ok(apply_delete(&mut state, idx))
    }
}

fn apply_move(state: &mut State, idx: usize, status: TaskStatus) -> Task {
    let now = Utc::now();
    let task = &mut state.tasks[idx];
    task.set_status(status, now);
    task.updated_at = Some(now);
    let task = task.clone();
    state.broadcast(PushMessage::TaskMoved { data: task.clone() });
    task
}

fn apply_delete(state: &mut State, idx: usize) -> Task {
    let task = state.tasks.remove(idx);
    state.broadcast(PushMessage::TaskDeleted {
        data: DeletedTask {
            id: task.id.clone(),
            client_name: Some(task.client_name.clone()),
            status: Some(task.status),
        },
    });
    task
}

/// Six-character uppercase alphanumeric code, unique per id.
fn guest_code_for(id: u64) -> String {
    const ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    const SPACE: u64 = 36 * 36 * 36 * 36 * 36 * 36;
    // Odd and not a multiple of 3, so the map is a bijection on 0..SPACE.
    let mut x = id.wrapping_mul(2_654_435_761) % SPACE;
    let mut code = [b'A'; 6];
    for slot in code.iter_mut().rev() {
        let digit = usize::try_from(x % 36).unwrap_or(0);
        *slot = ALPHABET[digit];
        x /= 36;
    }
    code.iter().map(|&b| char::from(b)).collect()
}

impl RemoteApi for LoopbackRemote {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, RemoteError> {
        let mut state = self.state.lock();
        state.enter()?;
        let user = state
            .accounts
            .iter()
            .find(|a| a.user.username == username && a.password == password)
            .map(|a| a.user.clone())
            .ok_or(RemoteError::Unauthorized)?;
        state.next_token += 1;
        let token = format!("loopback-token-{}", state.next_token);
        state.tokens.insert(token.clone(), user.id);
        tracing::debug!(user = %user.username, "loopback login");
        Ok(LoginResponse {
            access_token: token,
            token_type: "bearer".to_string(),
            user: Some(user),
        })
    }

    async fn me(&self, token: &AccessToken) -> Result<User, RemoteError> {
        self.state.lock().authenticate(token)
    }

    async fn logout(&self, token: &AccessToken) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.authenticate(token)?;
        state.tokens.remove(token.expose());
        Ok(())
    }

    async fn list_tasks(&self, token: &AccessToken) -> Result<Vec<Task>, RemoteError> {
        let mut state = self.state.lock();
        state.authenticate(token)?;
        let mut tasks = state.tasks.clone();
        tasks.sort_by_key(|t| (t.processing.rank(), t.created_at));
        Ok(tasks)
    }

    async fn create_task(&self, token: &AccessToken, new: &NewTask) -> Result<Task, RemoteError> {
        let mut state = self.state.lock();
        let user = state.authorize(token, "create")?;
        if new.client_name.trim().is_empty() {
            return Err(RemoteError::Rejected {
                status: 422,
                detail: "client_name is required".to_string(),
            });
        }
        Ok(state.insert(new.clone(), &user))
    }

    async fn update_task(
        &self,
        token: &AccessToken,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> Result<Task, RemoteError> {
        let mut state = self.state.lock();
        state.authorize(token, "modify")?;
        let idx = state.position(id)?;
        let task = &mut state.tasks[idx];
        patch.apply_to(task);
        task.updated_at = Some(Utc::now());
        let task = task.clone();
        state.broadcast(PushMessage::TaskUpdated { data: task.clone() });
        Ok(task)
    }

    async fn move_task(
        &self,
        token: &AccessToken,
        id: &TaskId,
        status: TaskStatus,
    ) -> Result<Task, RemoteError> {
        let mut state = self.state.lock();
        state.authorize(token, "move")?;
        let idx = state.position(id)?;
        Ok(apply_move(&mut state, idx, status))
    }

    async fn delete_task(&self, token: &AccessToken, id: &TaskId) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.authorize(token, "delete")?;
        let idx = state.position(id)?;
        apply_delete(&mut state, idx);
        Ok(())
    }

    async fn clear_done(&self, token: &AccessToken) -> Result<ClearDoneResponse, RemoteError> {
        let mut state = self.state.lock();
        state.authorize(token, "clear")?;
        let (done, rest): (Vec<Task>, Vec<Task>) = std::mem::take(&mut state.tasks)
            .into_iter()
            .partition(|t| t.status == TaskStatus::Done);
        state.tasks = rest;
        if done.is_empty() {
            return Ok(ClearDoneResponse {
                message: "No completed tasks to clear".to_string(),
                deleted_count: 0,
                kind: Some("warning".to_string()),
            });
        }
        let count = done.len();
        state.broadcast(PushMessage::TasksCleared {
            data: ClearedTasks {
                deleted_task_ids: done.into_iter().map(|t| t.id).collect(),
                count,
            },
        });
        Ok(ClearDoneResponse {
            message: format!("Successfully cleared {count} completed task(s)"),
            deleted_count: count,
            kind: None,
        })
    }

    async fn guest_status(&self, code: &GuestCode) -> Result<GuestStatus, RemoteError> {
        let mut state = self.state.lock();
        state.enter()?;
        let task = state
            .tasks
            .iter()
            .find(|t| t.custom_id.as_deref() == Some(code.suffix()))
            .ok_or_else(|| {
                RemoteError::NotFound("Request not found, please check and enter again".to_string())
            })?;
        Ok(GuestStatus {
            task_id: format!("{GUEST_CODE_PREFIX}{}", code.suffix()),
            status: task.status,
            message: status_message(task.status).to_string(),
        })
    }
}

impl PushConnector for LoopbackRemote {
    async fn connect(&self, token: &AccessToken) -> Result<mpsc::Receiver<LinkFrame>, PushError> {
        let mut state = self.state.lock();
        state.requests += 1;
        if state.offline {
            return Err(PushError::Connect("loopback service offline".to_string()));
        }
        let (tx, rx) = mpsc::channel(LINK_CAPACITY);
        let user = state
            .tokens
            .get(token.expose())
            .and_then(|id| state.accounts.iter().find(|a| a.user.id == *id))
            .map(|a| a.user.username.clone());
        let Some(username) = user else {
            let _ = tx.try_send(LinkFrame::Closed(CloseReason::Rejected {
                code: 4001,
                reason: "Invalid token".to_string(),
            }));
            return Ok(rx);
        };
        let _ = tx.try_send(LinkFrame::Message(PushMessage::ConnectionEstablished {
            message: "WebSocket connection established".to_string(),
            user: Some(username),
        }));
        state.links.push(tx);
        Ok(rx)
    }
}
