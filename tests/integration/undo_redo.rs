// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for undo and redo through the board controller.
//!
//! Local mode restores snapshots with their original ids. Networked mode
//! issues compensating requests, so a task deleted and then restored comes
//! back under a new server id and later history entries follow it.

use std::sync::Arc;

use taskboard::board::controller::{Board, BoardMode, BoardOptions};
use taskboard::board::reconcile::{RemoteOutcome, SkipReason};
use taskboard::board::{BoardError, HistoryAction, TaskDraft};
use taskboard::persist::{KeyValueStore, MemoryStore, load_tasks};
use taskboard::sync::RemoteError;
use taskboard::sync::loopback::LoopbackRemote;
use taskboard_proto::event::PushMessage;
use taskboard_proto::task::{TaskPatch, TaskStatus};

fn draft(name: &str) -> TaskDraft {
    TaskDraft {
        client_name: name.to_string(),
        category: Some("BDL".to_string()),
        ..TaskDraft::default()
    }
}

fn local_board(prefs: Arc<dyn KeyValueStore>) -> Board<LoopbackRemote> {
    Board::new(BoardMode::Local, prefs, BoardOptions::default())
}

async fn remote_board() -> (LoopbackRemote, Board<LoopbackRemote>) {
    let service = LoopbackRemote::new();
    service.add_user("alice", "secret", true);
    let mut board = Board::new(
        BoardMode::Remote(service.clone()),
        Arc::new(MemoryStore::new()),
        BoardOptions::default(),
    );
    board.login("alice", "secret").await.unwrap();
    (service, board)
}

// =============================================================================
// Local mode
// =============================================================================

#[tokio::test]
async fn undo_and_redo_each_action_locally() {
    let prefs: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let mut board = local_board(prefs.clone());

    let task = board.add_task(&draft("Acme")).await.unwrap();
    board.move_task(&task.id, TaskStatus::InReview).await.unwrap();
    let patch = TaskPatch {
        client_name: Some("Acme Corp".to_string()),
        ..TaskPatch::default()
    };
    board.edit_task(&task.id, patch).await.unwrap();
    board.delete_task(&task.id).await.unwrap();
    assert!(board.store().is_empty());

    // Delete
    assert!(matches!(board.undo().await.unwrap(), HistoryAction::Delete(_)));
    let restored = board.task(&task.id).unwrap();
    assert_eq!(restored.client_name, "Acme Corp");
    assert_eq!(restored.status, TaskStatus::InReview);

    // Update
    board.undo().await.unwrap();
    assert_eq!(board.task(&task.id).unwrap().client_name, "Acme");

    // Move
    board.undo().await.unwrap();
    assert_eq!(board.task(&task.id).unwrap().status, TaskStatus::Todo);

    // Create
    board.undo().await.unwrap();
    assert!(board.store().is_empty());
    assert!(matches!(board.undo().await.unwrap_err(), BoardError::EmptyHistory(_)));

    // Redo everything back.
    for _ in 0..4 {
        board.redo().await.unwrap();
    }
    assert!(board.store().is_empty());
    assert!(!board.history().can_redo());

    // Each step was saved.
    assert!(load_tasks(prefs.as_ref()).is_empty());
    board.undo().await.unwrap();
    assert_eq!(load_tasks(prefs.as_ref()).len(), 1);
}

#[tokio::test]
async fn undo_clear_restores_all_cleared_tasks() {
    let mut board = local_board(Arc::new(MemoryStore::new()));
    let a = board.add_task(&draft("A")).await.unwrap();
    let b = board.add_task(&draft("B")).await.unwrap();
    board.add_task(&draft("C")).await.unwrap();
    board.move_task(&a.id, TaskStatus::Done).await.unwrap();
    board.move_task(&b.id, TaskStatus::Done).await.unwrap();

    assert_eq!(board.clear_completed().await.unwrap().len(), 2);
    assert_eq!(board.store().len(), 1);

    let undone = board.undo().await.unwrap();
    assert!(matches!(undone, HistoryAction::Clear(ref tasks) if tasks.len() == 2));
    assert_eq!(board.column(TaskStatus::Done).len(), 2);
    assert_eq!(board.notices().latest().unwrap().text, "Undid clear");
}

#[tokio::test]
async fn new_action_discards_redo() {
    let mut board = local_board(Arc::new(MemoryStore::new()));
    board.add_task(&draft("A")).await.unwrap();
    board.undo().await.unwrap();
    assert!(board.history().can_redo());
    board.add_task(&draft("B")).await.unwrap();
    assert!(!board.history().can_redo());
    assert!(matches!(board.redo().await.unwrap_err(), BoardError::EmptyHistory(_)));
}

#[tokio::test]
async fn history_depth_is_bounded() {
    let options = BoardOptions {
        history_depth: 3,
        ..BoardOptions::default()
    };
    let mut board: Board<LoopbackRemote> =
        Board::new(BoardMode::Local, Arc::new(MemoryStore::new()), options);
    for i in 0..5 {
        board.add_task(&draft(&format!("T{i}"))).await.unwrap();
    }
    assert_eq!(board.history().undo_len(), 3);
    for _ in 0..3 {
        board.undo().await.unwrap();
    }
    assert_eq!(board.store().len(), 2);
    assert!(board.undo().await.is_err());
}

// =============================================================================
// Networked mode
// =============================================================================

#[tokio::test]
async fn remote_undo_delete_recreates_under_new_id() {
    let (service, mut board) = remote_board().await;
    let task = board.add_task(&draft("Acme")).await.unwrap();
    board.move_task(&task.id, TaskStatus::AwaitingDocuments).await.unwrap();
    board.delete_task(&task.id).await.unwrap();
    assert!(service.tasks().is_empty());

    board.undo().await.unwrap();
    let tasks = service.tasks();
    assert_eq!(tasks.len(), 1);
    let recreated = &tasks[0];
    assert_ne!(recreated.id, task.id);
    assert_eq!(recreated.client_name, "Acme");
    assert_eq!(recreated.status, TaskStatus::AwaitingDocuments);
    assert_eq!(board.task(&recreated.id), Some(recreated));
    assert!(board.task(&task.id).is_none());

    // The move entry below now refers to the new id.
    board.undo().await.unwrap();
    assert_eq!(service.tasks()[0].status, TaskStatus::Todo);
    assert_eq!(board.task(&recreated.id).unwrap().status, TaskStatus::Todo);

    // And redo walks forward again on the same record.
    board.redo().await.unwrap();
    assert_eq!(
        board.task(&recreated.id).unwrap().status,
        TaskStatus::AwaitingDocuments
    );
    board.redo().await.unwrap();
    assert!(service.tasks().is_empty());
    assert!(board.store().is_empty());
}

#[tokio::test]
async fn remote_undo_create_deletes_on_service() {
    let (service, mut board) = remote_board().await;
    board.add_task(&draft("Acme")).await.unwrap();
    board.undo().await.unwrap();
    assert!(service.tasks().is_empty());
    assert!(board.store().is_empty());

    board.redo().await.unwrap();
    assert_eq!(service.tasks().len(), 1);
    assert_eq!(board.store().len(), 1);
}

#[tokio::test]
async fn remote_undo_edit_restores_fields() {
    let (service, mut board) = remote_board().await;
    let task = board.add_task(&draft("Acme")).await.unwrap();
    let patch = TaskPatch {
        address: Some(Some("1 Main St".to_string())),
        ..TaskPatch::default()
    };
    board.edit_task(&task.id, patch).await.unwrap();
    board.undo().await.unwrap();
    assert_eq!(service.tasks()[0].address, None);
    assert_eq!(board.task(&task.id).unwrap().address, None);
}

#[tokio::test]
async fn failed_remote_undo_drops_the_entry() {
    let (service, mut board) = remote_board().await;
    let task = board.add_task(&draft("Acme")).await.unwrap();
    board.move_task(&task.id, TaskStatus::Done).await.unwrap();
    service.delete_as_other(&task.id).unwrap();

    let err = board.undo().await.unwrap_err();
    assert!(matches!(err, BoardError::NotFound(_)));
    assert_eq!(board.history().undo_len(), 1);
    assert!(!board.history().can_redo());

    // The vanished task is dropped locally and stays dropped.
    assert!(board.task(&task.id).is_none());
    let late = PushMessage::TaskUpdated { data: task };
    assert_eq!(
        board.apply_push(late),
        Some(RemoteOutcome::Skipped(SkipReason::Tombstoned))
    );
}

#[tokio::test]
async fn interrupted_remote_undo_of_clear_keeps_the_rest() {
    let (service, mut board) = remote_board().await;
    for name in ["A", "B", "C"] {
        let task = board.add_task(&draft(name)).await.unwrap();
        board.move_task(&task.id, TaskStatus::Done).await.unwrap();
    }
    board.clear_completed().await.unwrap();
    assert!(service.tasks().is_empty());
    assert_eq!(board.history().undo_len(), 7);

    // The second re-create fails.
    service.fail_nth(2, RemoteError::Unavailable("down".to_string()));
    let err = board.undo().await.unwrap_err();
    assert!(matches!(err, BoardError::RemoteUnavailable(_)), "got {err:?}");
    let names: Vec<_> = service.tasks().into_iter().map(|t| t.client_name).collect();
    assert_eq!(names, ["A"]);
    assert_eq!(board.store().len(), 1);

    // What did not come back is still undoable; what did is redoable.
    assert_eq!(board.history().undo_len(), 7);
    assert_eq!(board.history().redo_len(), 1);

    board.undo().await.unwrap();
    let mut names: Vec<_> = service.tasks().into_iter().map(|t| t.client_name).collect();
    names.sort();
    assert_eq!(names, ["A", "B", "C"]);
    assert_eq!(board.column(TaskStatus::Done).len(), 3);
    assert_eq!(board.history().redo_len(), 2);

    // Redo clears everything again.
    board.redo().await.unwrap();
    board.redo().await.unwrap();
    assert!(service.tasks().is_empty());
    assert!(board.store().is_empty());
}

#[tokio::test]
async fn failed_single_undo_can_be_retried() {
    let (service, mut board) = remote_board().await;
    let task = board.add_task(&draft("Acme")).await.unwrap();
    board.move_task(&task.id, TaskStatus::Done).await.unwrap();

    service.fail_next(RemoteError::Unavailable("down".to_string()));
    assert!(board.undo().await.is_err());
    assert_eq!(board.task(&task.id).unwrap().status, TaskStatus::Done);
    assert_eq!(board.history().undo_len(), 2);

    board.undo().await.unwrap();
    assert_eq!(service.tasks()[0].status, TaskStatus::Todo);
}
