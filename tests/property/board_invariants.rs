//! Property-based tests for the task store.
//!
//! Uses proptest to verify:
//! 1. Columns stay sorted and every id lives in exactly one column, whatever
//!    mix of local edits and remote events is applied.
//! 2. Applying the same remote event twice changes nothing the second time.
//! 3. A task removed remotely is never brought back by a later upsert.
//! 4. Column order depends only on the tasks, not on the order they arrive.
//! 5. Undoing every recorded action restores every column exactly.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use taskboard::board::history::{HistoryAction, HistoryStack};
use taskboard::board::ordering;
use taskboard::board::reconcile::{RemoteOutcome, SkipReason};
use taskboard::board::store::TaskStore;
use taskboard::session::Session;
use taskboard_proto::event::RemoteEvent;
use taskboard_proto::task::*;

// --- Strategies ---

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::ALL.to_vec())
}

fn arb_processing() -> impl Strategy<Value = Processing> {
    prop_oneof![Just(Processing::Normal), Just(Processing::Expedited)]
}

/// Task `n` is created `n` minutes after the base time, so sort keys never tie.
fn make_task(n: u64, processing: Processing, status: TaskStatus) -> Task {
    let created = base_time() + Duration::minutes(i64::try_from(n).unwrap());
    let mut task = Task::from_new(
        TaskId::Remote(n),
        NewTask {
            client_name: format!("Client {n}"),
            task_type: TaskType::Bdl,
            address: None,
            processing,
            status,
            description: None,
        },
        created,
    );
    task.updated_at = Some(created);
    task
}

fn arb_tasks(max: usize) -> impl Strategy<Value = Vec<Task>> {
    prop::collection::vec((arb_processing(), arb_status()), 0..max).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (p, s))| make_task(i as u64 + 1, p, s))
            .collect()
    })
}

/// Operations refer to tasks by index into the current snapshot so they
/// stay meaningful as the store changes.
#[derive(Debug, Clone)]
enum Op {
    Move(usize, TaskStatus),
    Edit(usize, Processing),
    Delete(usize),
    Clear,
    RemoteCreate(Processing, TaskStatus),
    RemoteMove(usize, TaskStatus),
    RemoteDelete(usize),
    RemoteClear(Vec<usize>),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<usize>(), arb_status()).prop_map(|(i, s)| Op::Move(i, s)),
        2 => (any::<usize>(), arb_processing()).prop_map(|(i, p)| Op::Edit(i, p)),
        1 => any::<usize>().prop_map(Op::Delete),
        1 => Just(Op::Clear),
        2 => (arb_processing(), arb_status()).prop_map(|(p, s)| Op::RemoteCreate(p, s)),
        2 => (any::<usize>(), arb_status()).prop_map(|(i, s)| Op::RemoteMove(i, s)),
        1 => any::<usize>().prop_map(Op::RemoteDelete),
        1 => prop::collection::vec(any::<usize>(), 0..4).prop_map(Op::RemoteClear),
    ]
}

/// Local-only operations, for the undo property.
fn arb_local_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<usize>(), arb_status()).prop_map(|(i, s)| Op::Move(i, s)),
        2 => (any::<usize>(), arb_processing()).prop_map(|(i, p)| Op::Edit(i, p)),
        1 => any::<usize>().prop_map(Op::Delete),
        1 => Just(Op::Clear),
    ]
}

// --- Helpers ---

fn pick(store: &TaskStore, i: usize) -> Option<Task> {
    let snapshot = store.snapshot();
    if snapshot.is_empty() {
        None
    } else {
        Some(snapshot[i % snapshot.len()].clone())
    }
}

fn later(task: &Task) -> DateTime<Utc> {
    task.updated_at.unwrap_or(task.created_at) + Duration::seconds(1)
}

/// Applies `op` and returns the history entry it produced, if any.
fn apply(store: &mut TaskStore, next_id: &mut u64, op: &Op) -> Option<HistoryAction> {
    match op {
        Op::Move(i, status) => {
            let task = pick(store, *i)?;
            let moved = store.move_task(&task.id, *status).unwrap();
            (task.status != moved.status).then(|| HistoryAction::Move {
                task_id: task.id,
                from: task.status,
                to: moved.status,
            })
        }
        Op::Edit(i, processing) => {
            let before = pick(store, *i)?;
            let patch = TaskPatch {
                client_name: Some(format!("Edited {}", before.id)),
                processing: Some(*processing),
                ..TaskPatch::default()
            };
            let after = store.update(&before.id, patch).unwrap();
            Some(HistoryAction::Update { before, after })
        }
        Op::Delete(i) => {
            let task = pick(store, *i)?;
            Some(HistoryAction::Delete(store.remove(&task.id).unwrap()))
        }
        Op::Clear => {
            let cleared = store.clear_completed();
            (!cleared.is_empty()).then_some(HistoryAction::Clear(cleared))
        }
        Op::RemoteCreate(processing, status) => {
            *next_id += 1;
            let task = make_task(*next_id, *processing, *status);
            store.apply_remote_event(&RemoteEvent::Created(task));
            None
        }
        Op::RemoteMove(i, status) => {
            let mut task = pick(store, *i)?;
            let at = later(&task);
            task.set_status(*status, at);
            task.updated_at = Some(at);
            store.apply_remote_event(&RemoteEvent::Moved(task));
            None
        }
        Op::RemoteDelete(i) => {
            let task = pick(store, *i)?;
            store.apply_remote_event(&RemoteEvent::Deleted(task.id));
            None
        }
        Op::RemoteClear(indices) => {
            let ids = indices
                .iter()
                .filter_map(|i| pick(store, *i).map(|t| t.id))
                .collect();
            store.apply_remote_event(&RemoteEvent::Cleared(ids));
            None
        }
    }
}

fn column_ids(store: &TaskStore) -> Vec<Vec<TaskId>> {
    TaskStatus::ALL
        .iter()
        .map(|s| store.column(*s).iter().map(|t| t.id.clone()).collect())
        .collect()
}

fn assert_well_formed(store: &TaskStore) {
    let mut seen = HashSet::new();
    let mut total = 0;
    for status in TaskStatus::ALL {
        let column = store.column(status);
        assert!(ordering::is_sorted(column), "column {status} out of order");
        for task in column {
            assert_eq!(task.status, status, "task {} filed in wrong column", task.id);
            assert!(seen.insert(task.id.clone()), "task {} appears twice", task.id);
            assert_eq!(store.get(&task.id), Some(task));
        }
        total += column.len();
    }
    assert_eq!(total, store.len());
}

// --- Properties ---

proptest! {
    #[test]
    fn store_stays_well_formed(
        tasks in arb_tasks(12),
        ops in prop::collection::vec(arb_op(), 0..40),
    ) {
        let mut next_id = tasks.len() as u64;
        let mut store = TaskStore::from_tasks(tasks);
        assert_well_formed(&store);
        for op in &ops {
            apply(&mut store, &mut next_id, op);
            assert_well_formed(&store);
        }
    }

    #[test]
    fn remote_events_are_idempotent(
        tasks in arb_tasks(8),
        op in arb_op(),
        i in any::<usize>(),
        status in arb_status(),
    ) {
        let mut store = TaskStore::from_tasks(tasks);
        let mut next_id = store.len() as u64;
        apply(&mut store, &mut next_id, &op);

        let event = match pick(&store, i) {
            Some(mut task) => {
                let at = later(&task);
                task.set_status(status, at);
                task.updated_at = Some(at);
                RemoteEvent::Moved(task)
            }
            None => RemoteEvent::Created(make_task(next_id + 1, Processing::Normal, status)),
        };
        store.apply_remote_event(&event);
        let once = store.snapshot();

        let again = store.apply_remote_event(&event);
        prop_assert_eq!(again, RemoteOutcome::Skipped(SkipReason::Duplicate));
        prop_assert_eq!(store.snapshot(), once);
    }

    #[test]
    fn removed_tasks_stay_removed(tasks in arb_tasks(8), i in any::<usize>()) {
        prop_assume!(!tasks.is_empty());
        let target = tasks[i % tasks.len()].clone();
        let mut store = TaskStore::from_tasks(tasks);

        store.apply_remote_event(&RemoteEvent::Deleted(target.id.clone()));
        prop_assert!(!store.contains(&target.id));

        let mut late = target.clone();
        late.updated_at = Some(later(&target));
        for event in [
            RemoteEvent::Created(target.clone()),
            RemoteEvent::Updated(late.clone()),
            RemoteEvent::Moved(late),
        ] {
            prop_assert_eq!(
                store.apply_remote_event(&event),
                RemoteOutcome::Skipped(SkipReason::Tombstoned)
            );
        }
        prop_assert!(!store.contains(&target.id));

        // A second delete is a no-op.
        prop_assert_eq!(
            store.apply_remote_event(&RemoteEvent::Deleted(target.id)),
            RemoteOutcome::Skipped(SkipReason::Absent)
        );
    }

    #[test]
    fn arrival_order_does_not_matter(
        (tasks, shuffled) in arb_tasks(16).prop_flat_map(|tasks| {
            let shuffled = Just(tasks.clone()).prop_shuffle();
            (Just(tasks), shuffled)
        }),
    ) {
        let a = TaskStore::from_tasks(tasks);
        let b = TaskStore::from_tasks(shuffled.clone());
        prop_assert_eq!(column_ids(&a), column_ids(&b));

        let mut c = TaskStore::new();
        for task in shuffled {
            c.apply_remote_event(&RemoteEvent::Created(task));
        }
        prop_assert_eq!(column_ids(&a), column_ids(&c));
    }

    #[test]
    fn undo_all_restores_columns(
        tasks in arb_tasks(10),
        ops in prop::collection::vec(arb_local_op(), 0..25),
    ) {
        let session = Session::local("tester");
        let mut store = TaskStore::from_tasks(tasks);
        let initial = column_ids(&store);
        let initial_tasks = store.snapshot();
        let mut history = HistoryStack::new(50);
        let mut next_id = store.len() as u64;

        for op in &ops {
            if let Some(action) = apply(&mut store, &mut next_id, op) {
                history.record(action);
            }
        }
        let after_ops = column_ids(&store);

        while history.can_undo() {
            history.undo(Some(&session), &mut store).unwrap();
        }
        prop_assert_eq!(column_ids(&store), initial);
        assert_well_formed(&store);

        // Names and priorities come back too.
        for task in &initial_tasks {
            let restored = store.get(&task.id).unwrap();
            prop_assert_eq!(&restored.client_name, &task.client_name);
            prop_assert_eq!(restored.processing, task.processing);
        }

        while history.can_redo() {
            history.redo(Some(&session), &mut store).unwrap();
        }
        prop_assert_eq!(column_ids(&store), after_ops);
    }
}
