//! Property-based tests for the `Taskboard` wire formats.
//!
//! Uses proptest to verify:
//! 1. Any task snapshot survives encode → decode with order intact.
//! 2. Any six-character alphanumeric code parses in every accepted form.
//! 3. Arbitrary text never panics the lenient decoders.
//! 4. Misc labels render and parse back to the same task type.
//! 5. Categories unknown to the client still load and are written back as-is.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use taskboard_proto::codec;
use taskboard_proto::guest::GuestCode;
use taskboard_proto::task::*;
use uuid::Uuid;

// --- Strategies ---

fn arb_task_id() -> impl Strategy<Value = TaskId> {
    prop_oneof![
        any::<u64>().prop_map(TaskId::Remote),
        any::<u128>().prop_map(|n| TaskId::Local(Uuid::from_u128(n))),
    ]
}

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::ALL.to_vec())
}

fn arb_processing() -> impl Strategy<Value = Processing> {
    prop_oneof![Just(Processing::Normal), Just(Processing::Expedited)]
}

fn arb_misc_label() -> impl Strategy<Value = String> {
    "[A-Za-z0-9][A-Za-z0-9 ]{0,20}[A-Za-z0-9]"
}

fn arb_task_type() -> impl Strategy<Value = TaskType> {
    prop_oneof![
        Just(TaskType::Bdl),
        Just(TaskType::Sdl),
        Just(TaskType::NBdl),
        Just(TaskType::NPo),
        Just(TaskType::Misc(None)),
        arb_misc_label().prop_map(|l| TaskType::misc(&l)),
    ]
}

fn arb_time() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_000_000_000_000).prop_map(|ms| DateTime::from_timestamp_millis(ms).unwrap())
}

fn arb_task() -> impl Strategy<Value = Task> {
    (
        arb_task_id(),
        "[A-Za-z][A-Za-z .&'-]{0,40}",
        arb_task_type(),
        prop::option::of("[0-9]{1,4} [A-Za-z ]{1,30}"),
        arb_processing(),
        arb_status(),
        prop::option::of("[^\x00]{0,80}"),
        arb_time(),
    )
        .prop_map(
            |(id, client_name, task_type, address, processing, status, description, created_at)| {
                Task::from_new(
                    id,
                    NewTask {
                        client_name,
                        task_type,
                        address,
                        processing,
                        status,
                        description,
                    },
                    created_at,
                )
            },
        )
}

proptest! {
    /// A snapshot of any tasks decodes to the same tasks in the same order.
    #[test]
    fn snapshot_round_trip(tasks in prop::collection::vec(arb_task(), 0..20)) {
        let text = codec::encode_snapshot(&tasks).expect("encode should succeed");
        let decoded = codec::decode_snapshot(&text).expect("decode should succeed");
        prop_assert_eq!(tasks, decoded);
    }

    /// Bare, prefixed, and lowercase forms of a code all parse to the same value.
    #[test]
    fn guest_code_accepts_every_form(body in "[A-Z0-9]{6}") {
        let bare = GuestCode::parse(&body).expect("bare code");
        let prefixed = GuestCode::parse(&format!("RE-{body}")).expect("prefixed code");
        let lower = GuestCode::parse(&format!("re-{}", body.to_lowercase())).expect("lowercase code");
        prop_assert_eq!(bare.suffix(), body.as_str());
        prop_assert_eq!(&bare, &prefixed);
        prop_assert_eq!(&bare, &lower);
    }

    /// Guest code parsing never panics and only yields six-character bodies.
    #[test]
    fn guest_code_parse_no_panic(input in "\\PC{0,32}") {
        if let Ok(code) = GuestCode::parse(&input) {
            prop_assert_eq!(code.suffix().len(), 6);
        }
    }

    /// Random text never panics the push decoder.
    #[test]
    fn push_decode_no_panic(input in "\\PC{0,256}") {
        let _ = codec::decode_push(&input);
    }

    /// Random text never panics the snapshot decoder.
    #[test]
    fn snapshot_decode_no_panic(text in "\\PC{0,512}") {
        let _ = codec::decode_snapshot(&text);
    }

    /// Wire decoding of any status string always yields a column.
    #[test]
    fn lenient_status_total(input in "\\PC{0,24}") {
        let status = TaskStatus::from_wire(&input);
        prop_assert!(TaskStatus::ALL.contains(&status));
    }

    /// Misc labels survive display → parse.
    #[test]
    fn misc_label_display_parse(label in arb_misc_label()) {
        let task_type = TaskType::misc(&label);
        let parsed: TaskType = task_type.to_string().parse().expect("parse should succeed");
        prop_assert_eq!(task_type, parsed);
    }

    /// An unknown category decodes without failing the snapshot and
    /// encodes back to the same string.
    #[test]
    fn unknown_category_survives_snapshot(
        raw in "[A-Za-z][A-Za-z ]{0,15}[A-Za-z]"
            .prop_filter("known category", |s| TaskType::from_selection(s, None).is_err()),
        mut task in arb_task(),
    ) {
        task.task_type = TaskType::Other(raw.clone());
        let text = codec::encode_snapshot(std::slice::from_ref(&task)).unwrap();
        let decoded = codec::decode_snapshot(&text).unwrap();
        prop_assert_eq!(&decoded[0].task_type, &TaskType::Other(raw.clone()));
        prop_assert_eq!(decoded[0].task_type.to_string(), raw);
    }
}

#[test]
fn task_list_with_unknown_category_loads() {
    let body = r#"[
        {"id": 1, "client_name": "Acme", "task_type": "BDL", "status": "todo", "created_at": "2024-05-01T09:00:00"},
        {"id": 2, "client_name": "Birch", "task_type": "Title Search", "status": "done", "created_at": "2024-05-01T09:05:00"}
    ]"#;
    let tasks: Vec<Task> = serde_json::from_str(body).unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].task_type, TaskType::Bdl);
    assert_eq!(tasks[1].task_type, TaskType::Other("Title Search".to_string()));
    assert_eq!(tasks[1].status, TaskStatus::Done);

    let lower: Task = serde_json::from_str(
        r#"{"id": 3, "client_name": "Cole", "task_type": "misc - survey", "created_at": "2024-05-01T09:10:00"}"#,
    )
    .unwrap();
    assert_eq!(lower.task_type, TaskType::Misc(Some("survey".to_string())));
}
