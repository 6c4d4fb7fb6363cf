// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::needless_pass_by_value
)]

//! Integration tests for the REST client against an axum fake of the task
//! service.
//!
//! The fake keeps tasks in memory, checks the bearer token on every
//! authenticated route, and answers errors the way the service does: a JSON
//! body with a `detail` field (a string, or a list for validation errors).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Value, json};
use taskboard::session::AccessToken;
use taskboard::sync::RemoteApi;
use taskboard::sync::RemoteError;
use taskboard::sync::http::HttpRemote;
use taskboard_proto::api::LoginRequest;
use taskboard_proto::guest::GuestCode;
use taskboard_proto::task::{
    NewTask, Processing, Task, TaskId, TaskPatch, TaskStatus, TaskType,
};

// =============================================================================
// Fake service
// =============================================================================

const TOKEN: &str = "tok-alice";
const INACTIVE_TOKEN: &str = "tok-inactive";

#[derive(Default)]
struct Service {
    tasks: Mutex<Vec<Task>>,
    next_id: Mutex<u64>,
    last_patch: Mutex<Option<Value>>,
    logged_out: Mutex<bool>,
}

type Shared = Arc<Service>;

fn detail(status: StatusCode, text: &str) -> Response {
    (status, Json(json!({ "detail": text }))).into_response()
}

/// Returns the bearer token or a 401 response.
fn bearer(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| *t == TOKEN || *t == INACTIVE_TOKEN || *t == "slow" || *t == "boom")
        .map(str::to_string)
        .ok_or_else(|| detail(StatusCode::UNAUTHORIZED, "Could not validate credentials"))
}

async fn login(Json(req): Json<LoginRequest>) -> Response {
    if req.username == "alice" && req.password == "secret" {
        Json(json!({
            "access_token": TOKEN,
            "token_type": "bearer",
            "user": {"id": 1, "username": "alice", "full_name": "Alice A", "is_active": true}
        }))
        .into_response()
    } else {
        detail(StatusCode::UNAUTHORIZED, "Incorrect username or password")
    }
}

async fn me(headers: HeaderMap) -> Response {
    match bearer(&headers) {
        Ok(token) => Json(json!({
            "id": 1,
            "username": "alice",
            "is_active": token != INACTIVE_TOKEN,
        }))
        .into_response(),
        Err(resp) => resp,
    }
}

async fn logout(State(service): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(resp) = bearer(&headers) {
        return resp;
    }
    *service.logged_out.lock() = true;
    Json(json!({"message": "Successfully logged out"})).into_response()
}

async fn list_tasks(State(service): State<Shared>, headers: HeaderMap) -> Response {
    match bearer(&headers).as_deref() {
        Err(_) => detail(StatusCode::UNAUTHORIZED, "Could not validate credentials"),
        Ok("boom") => detail(StatusCode::INTERNAL_SERVER_ERROR, "database is down"),
        Ok("slow") => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!([])).into_response()
        }
        Ok(_) => Json(service.tasks.lock().clone()).into_response(),
    }
}

async fn create_task(
    State(service): State<Shared>,
    headers: HeaderMap,
    Json(new): Json<NewTask>,
) -> Response {
    match bearer(&headers).as_deref() {
        Err(_) => return detail(StatusCode::UNAUTHORIZED, "Could not validate credentials"),
        Ok(INACTIVE_TOKEN) => {
            return detail(StatusCode::FORBIDDEN, "Inactive users cannot create tasks");
        }
        Ok(_) => {}
    }
    if new.client_name.trim().is_empty() {
        let body = json!({"detail": [{"loc": ["body", "client_name"], "msg": "field required"}]});
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response();
    }
    let id = {
        let mut next = service.next_id.lock();
        *next += 1;
        *next
    };
    let task = Task::from_new(TaskId::Remote(id), new, Utc::now());
    service.tasks.lock().push(task.clone());
    (StatusCode::CREATED, Json(task)).into_response()
}

async fn update_task(
    State(service): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Json(patch): Json<Value>,
) -> Response {
    if let Err(resp) = bearer(&headers) {
        return resp;
    }
    let mut tasks = service.tasks.lock();
    let Some(task) = tasks.iter_mut().find(|t| t.id == TaskId::Remote(id)) else {
        return detail(StatusCode::NOT_FOUND, "Task not found");
    };
    if let Some(name) = patch.get("client_name").and_then(Value::as_str) {
        task.client_name = name.to_string();
    }
    if let Some(address) = patch.get("address") {
        task.address = address.as_str().map(str::to_string);
    }
    let task = task.clone();
    *service.last_patch.lock() = Some(patch);
    Json(task).into_response()
}

async fn move_task(
    State(service): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(resp) = bearer(&headers) {
        return resp;
    }
    let Some(status) = params.get("new_status").and_then(|s| s.parse::<TaskStatus>().ok()) else {
        return detail(StatusCode::BAD_REQUEST, "Invalid status");
    };
    let mut tasks = service.tasks.lock();
    let Some(task) = tasks.iter_mut().find(|t| t.id == TaskId::Remote(id)) else {
        return detail(StatusCode::NOT_FOUND, "Task not found");
    };
    task.set_status(status, Utc::now());
    Json(json!({
        "message": format!("Task moved to {}", status.as_str()),
        "task": task.clone(),
    }))
    .into_response()
}

async fn delete_task(
    State(service): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response {
    if let Err(resp) = bearer(&headers) {
        return resp;
    }
    let mut tasks = service.tasks.lock();
    let before = tasks.len();
    tasks.retain(|t| t.id != TaskId::Remote(id));
    if tasks.len() == before {
        return detail(StatusCode::NOT_FOUND, "Task not found");
    }
    Json(json!({"message": "Task deleted successfully"})).into_response()
}

async fn clear_done(State(service): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(resp) = bearer(&headers) {
        return resp;
    }
    let mut tasks = service.tasks.lock();
    let before = tasks.len();
    tasks.retain(|t| t.status != TaskStatus::Done);
    let count = before - tasks.len();
    if count == 0 {
        return Json(json!({
            "message": "No completed tasks to clear",
            "deleted_count": 0,
            "type": "warning",
        }))
        .into_response();
    }
    Json(json!({
        "message": format!("Successfully cleared {count} completed task(s)"),
        "deleted_count": count,
    }))
    .into_response()
}

async fn guest_status(Path(code): Path<String>) -> Response {
    if code == "ABC123" {
        Json(json!({
            "task_id": "RE-ABC123",
            "status": "awaiting_documents",
            "message": ""
        }))
        .into_response()
    } else {
        detail(StatusCode::NOT_FOUND, "Task not found")
    }
}

async fn start_service() -> (String, Shared) {
    let service = Shared::default();
    let app = Router::new()
        .route("/api/v1/auth/login-json", post(login))
        .route("/api/v1/auth/me", get(me))
        .route("/api/v1/auth/logout", post(logout))
        .route("/api/v1/tasks/", get(list_tasks).post(create_task))
        .route("/api/v1/tasks/clear-done", delete(clear_done))
        .route("/api/v1/tasks/{id}", put(update_task).delete(delete_task))
        .route("/api/v1/tasks/{id}/move", post(move_task))
        .route("/api/v1/guest/task-status/{code}", get(guest_status))
        .with_state(service.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), service)
}

async fn client() -> (HttpRemote, Shared) {
    let (url, service) = start_service().await;
    let remote = HttpRemote::new(&url, Duration::from_secs(2)).unwrap();
    (remote, service)
}

fn token() -> AccessToken {
    AccessToken::new(TOKEN)
}

fn new_task(name: &str) -> NewTask {
    NewTask {
        client_name: name.to_string(),
        task_type: TaskType::Bdl,
        address: Some("12 High St".to_string()),
        processing: Processing::Expedited,
        status: TaskStatus::Todo,
        description: None,
    }
}

// =============================================================================
// Auth
// =============================================================================

#[tokio::test]
async fn login_returns_token_and_user() {
    let (remote, _) = client().await;
    let resp = remote.login("alice", "secret").await.unwrap();
    assert_eq!(resp.access_token, TOKEN);
    assert_eq!(resp.user.unwrap().display_name(), "Alice A");

    let user = remote.me(&token()).await.unwrap();
    assert_eq!(user.username, "alice");
    assert!(user.is_active);
}

#[tokio::test]
async fn bad_credentials_are_unauthorized() {
    let (remote, _) = client().await;
    let err = remote.login("alice", "nope").await.unwrap_err();
    assert_eq!(err, RemoteError::Unauthorized);

    let err = remote.me(&AccessToken::new("stale")).await.unwrap_err();
    assert_eq!(err, RemoteError::Unauthorized);
}

#[tokio::test]
async fn logout_sends_bearer() {
    let (remote, service) = client().await;
    remote.logout(&token()).await.unwrap();
    assert!(*service.logged_out.lock());
}

// =============================================================================
// Tasks
// =============================================================================

#[tokio::test]
async fn create_list_move_delete() {
    let (remote, _) = client().await;
    let created = remote.create_task(&token(), &new_task("Acme")).await.unwrap();
    assert_eq!(created.id, TaskId::Remote(1));
    assert_eq!(created.client_name, "Acme");
    assert_eq!(created.processing, Processing::Expedited);

    let moved = remote
        .move_task(&token(), &created.id, TaskStatus::InReview)
        .await
        .unwrap();
    assert_eq!(moved.status, TaskStatus::InReview);

    let listed = remote.list_tasks(&token()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, TaskStatus::InReview);

    remote.delete_task(&token(), &created.id).await.unwrap();
    assert!(remote.list_tasks(&token()).await.unwrap().is_empty());
}

#[tokio::test]
async fn patch_omits_untouched_fields_and_clears_with_null() {
    let (remote, service) = client().await;
    let created = remote.create_task(&token(), &new_task("Acme")).await.unwrap();

    let patch = TaskPatch {
        address: Some(None),
        ..TaskPatch::default()
    };
    let updated = remote.update_task(&token(), &created.id, &patch).await.unwrap();
    assert_eq!(updated.address, None);
    assert_eq!(updated.client_name, "Acme");
    assert_eq!(*service.last_patch.lock(), Some(json!({"address": null})));
}

#[tokio::test]
async fn missing_task_is_not_found_with_detail() {
    let (remote, _) = client().await;
    let err = remote
        .delete_task(&token(), &TaskId::Remote(99))
        .await
        .unwrap_err();
    assert_eq!(err, RemoteError::NotFound("Task not found".to_string()));
    assert_eq!(err.user_message(), "Task not found");

    let err = remote
        .move_task(&token(), &TaskId::Remote(99), TaskStatus::Done)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::NotFound(_)));
}

#[tokio::test]
async fn inactive_user_is_forbidden() {
    let (remote, _) = client().await;
    let err = remote
        .create_task(&AccessToken::new(INACTIVE_TOKEN), &new_task("Acme"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RemoteError::Forbidden("Inactive users cannot create tasks".to_string())
    );
}

#[tokio::test]
async fn validation_error_keeps_raw_body() {
    let (remote, _) = client().await;
    let err = remote
        .create_task(&token(), &new_task("  "))
        .await
        .unwrap_err();
    let RemoteError::Rejected { status, detail } = err else {
        panic!("expected a rejection, got {err:?}");
    };
    assert_eq!(status, 422);
    assert!(detail.contains("field required"), "detail was {detail}");
}

#[tokio::test]
async fn server_error_is_unavailable() {
    let (remote, _) = client().await;
    let err = remote
        .list_tasks(&AccessToken::new("boom"))
        .await
        .unwrap_err();
    let RemoteError::Unavailable(msg) = err else {
        panic!("expected unavailable, got {err:?}");
    };
    assert!(msg.contains("500"), "message was {msg}");
}

#[tokio::test]
async fn slow_response_times_out() {
    let (url, _) = start_service().await;
    let remote = HttpRemote::new(&url, Duration::from_millis(200)).unwrap();
    let err = remote
        .list_tasks(&AccessToken::new("slow"))
        .await
        .unwrap_err();
    assert_eq!(err, RemoteError::Unavailable("request timed out".to_string()));
}

#[tokio::test]
async fn clear_done_reports_count_and_warning() {
    let (remote, _) = client().await;
    let empty = remote.clear_done(&token()).await.unwrap();
    assert_eq!(empty.deleted_count, 0);
    assert_eq!(empty.kind.as_deref(), Some("warning"));

    for name in ["A", "B", "C"] {
        let task = remote.create_task(&token(), &new_task(name)).await.unwrap();
        if name != "C" {
            remote
                .move_task(&token(), &task.id, TaskStatus::Done)
                .await
                .unwrap();
        }
    }
    let cleared = remote.clear_done(&token()).await.unwrap();
    assert_eq!(cleared.deleted_count, 2);
    assert_eq!(cleared.message, "Successfully cleared 2 completed task(s)");
    assert_eq!(remote.list_tasks(&token()).await.unwrap().len(), 1);
}

// =============================================================================
// Guest lookup
// =============================================================================

#[tokio::test]
async fn guest_status_needs_no_token() {
    let (remote, _) = client().await;
    let code = GuestCode::parse("re-abc123").unwrap();
    let status = remote.guest_status(&code).await.unwrap();
    assert_eq!(status.task_id, "RE-ABC123");
    assert_eq!(status.status, TaskStatus::AwaitingDocuments);
    assert!(!status.message_or_default().is_empty());

    let unknown = GuestCode::parse("ZZZ999").unwrap();
    assert!(matches!(
        remote.guest_status(&unknown).await.unwrap_err(),
        RemoteError::NotFound(_)
    ));
}
