// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the WebSocket push link.
//!
//! An axum server stands in for the service's `/api/v1/ws/ws` endpoint. The
//! `token` query parameter picks its behaviour:
//!
//! | token     | behaviour                                           |
//! |-----------|-----------------------------------------------------|
//! | `good`    | greet, answer `ping` with `pong` plus a task event  |
//! | `denied`  | refuse the upgrade with HTTP 403                    |
//! | `expired` | accept, then close with code 4001                   |
//! | `bye`     | accept, then close with code 1000                   |
//! | `reset`   | accept, then drop the socket without a close frame  |

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use taskboard::session::AccessToken;
use taskboard::sync::push::{CloseReason, LinkFrame, PushConnector, PushError, WsConnector};
use taskboard::sync::reconnect::{LinkEvent, ReconnectPolicy, spawn_push};
use taskboard_proto::codec;
use taskboard_proto::event::{PING_FRAME, PushMessage};
use taskboard_proto::task::{NewTask, Processing, Task, TaskId, TaskStatus, TaskType};
use tokio::sync::mpsc;

// =============================================================================
// Fake push endpoint
// =============================================================================

#[derive(Default)]
struct PushServer {
    pings: AtomicUsize,
}

fn sample_task(id: u64) -> Task {
    Task::from_new(
        TaskId::Remote(id),
        NewTask {
            client_name: format!("Client {id}"),
            task_type: TaskType::Sdl,
            address: None,
            processing: Processing::Normal,
            status: TaskStatus::Todo,
            description: None,
        },
        Utc::now(),
    )
}

fn text(message: &PushMessage) -> Message {
    Message::Text(codec::encode_push(message).unwrap().into())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(server): State<Arc<PushServer>>,
) -> Response {
    let token = params.get("token").cloned().unwrap_or_default();
    if token == "denied" {
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, token, server))
}

async fn handle_socket(mut socket: WebSocket, token: String, server: Arc<PushServer>) {
    let close = |code: u16, reason: &'static str| {
        Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        }))
    };
    match token.as_str() {
        "expired" => {
            let _ = socket.send(close(4001, "Invalid token")).await;
            return;
        }
        "bye" => {
            let _ = socket.send(close(1000, "done")).await;
            return;
        }
        "reset" => return,
        _ => {}
    }

    let greeting = PushMessage::ConnectionEstablished {
        message: "Connected".to_string(),
        user: Some("alice".to_string()),
    };
    if socket.send(text(&greeting)).await.is_err() {
        return;
    }
    // Junk the client must skip without dropping the link.
    if socket.send(Message::Text("not json".into())).await.is_err() {
        return;
    }

    let (mut sender, mut receiver) = socket.split();
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(body) if body.as_str() == PING_FRAME => {
                let n = server.pings.fetch_add(1, Ordering::SeqCst) + 1;
                let id = u64::try_from(n).unwrap();
                if sender.send(text(&PushMessage::Pong)).await.is_err() {
                    break;
                }
                let event = PushMessage::TaskCreated {
                    data: sample_task(id),
                };
                if sender.send(text(&event)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn start_server() -> (String, Arc<PushServer>) {
    let server = Arc::new(PushServer::default());
    let app = Router::new()
        .route("/api/v1/ws/ws", get(ws_handler))
        .with_state(server.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("ws://{addr}/api/v1/ws/ws"), server)
}

async fn next_frame(frames: &mut mpsc::Receiver<LinkFrame>) -> LinkFrame {
    tokio::time::timeout(Duration::from_secs(5), frames.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("frame channel closed")
}

async fn open(url: &str, token: &str) -> Result<mpsc::Receiver<LinkFrame>, PushError> {
    WsConnector::new(url)
        .unwrap()
        .with_keepalive(Duration::from_millis(50))
        .connect(&AccessToken::new(token))
        .await
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn greeting_then_keepalive_round_trip() {
    let (url, server) = start_server().await;
    let mut frames = open(&url, "good").await.unwrap();

    let LinkFrame::Message(PushMessage::ConnectionEstablished { user, .. }) =
        next_frame(&mut frames).await
    else {
        panic!("expected greeting first");
    };
    assert_eq!(user.as_deref(), Some("alice"));

    // The malformed frame is skipped and pongs are swallowed, so the next
    // frame is the event the server sends after the first ping.
    let LinkFrame::Message(PushMessage::TaskCreated { data }) = next_frame(&mut frames).await
    else {
        panic!("expected a task event");
    };
    assert_eq!(data.id, TaskId::Remote(1));
    assert!(server.pings.load(Ordering::SeqCst) >= 1);

    // Keepalive keeps going.
    let LinkFrame::Message(PushMessage::TaskCreated { data }) = next_frame(&mut frames).await
    else {
        panic!("expected a second task event");
    };
    assert_eq!(data.id, TaskId::Remote(2));
}

#[tokio::test]
async fn handshake_refusal_is_rejected() {
    let (url, _server) = start_server().await;
    let err = open(&url, "denied").await.unwrap_err();
    assert!(matches!(err, PushError::Rejected { code: 403, .. }), "got {err:?}");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn close_4001_is_a_rejection() {
    let (url, _server) = start_server().await;
    let mut frames = open(&url, "expired").await.unwrap();
    assert_eq!(
        next_frame(&mut frames).await,
        LinkFrame::Closed(CloseReason::Rejected {
            code: 4001,
            reason: "Invalid token".to_string(),
        })
    );
}

#[tokio::test]
async fn normal_close_is_clean() {
    let (url, _server) = start_server().await;
    let mut frames = open(&url, "bye").await.unwrap();
    assert_eq!(
        next_frame(&mut frames).await,
        LinkFrame::Closed(CloseReason::Clean)
    );
}

#[tokio::test]
async fn dropped_socket_is_lost() {
    let (url, _server) = start_server().await;
    let mut frames = open(&url, "reset").await.unwrap();
    assert!(matches!(
        next_frame(&mut frames).await,
        LinkFrame::Closed(CloseReason::Lost(_))
    ));
}

#[tokio::test]
async fn supervisor_ends_session_on_4001() {
    let (url, _server) = start_server().await;
    let policy = ReconnectPolicy {
        base: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        max_attempts: 3,
    };
    let connector = WsConnector::new(&url).unwrap();
    let (_handle, mut events) = spawn_push(connector, AccessToken::new("expired"), policy, 16);

    let mut seen = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), events.recv()).await
    {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            LinkEvent::Connected,
            LinkEvent::SessionRejected {
                code: 4001,
                reason: "Invalid token".to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn supervisor_forwards_events_and_stops() {
    let (url, server) = start_server().await;
    let connector = WsConnector::new(&url)
        .unwrap()
        .with_keepalive(Duration::from_millis(50));
    let (handle, mut events) = spawn_push(
        connector,
        AccessToken::new("good"),
        ReconnectPolicy::default(),
        16,
    );

    let mut got_task = false;
    while !got_task {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        got_task = matches!(event, LinkEvent::Push(PushMessage::TaskCreated { .. }));
    }
    handle.stop().await;
    assert!(server.pings.load(Ordering::SeqCst) >= 1);
}
