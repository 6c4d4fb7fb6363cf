//! Pure decision functions for applying remote task records.
//!
//! A push event may echo a change this client already made, arrive after
//! a newer local copy, or refer to a task that was deleted in the meantime.
//! These functions decide what to do without touching the store, so the
//! rules can be tested in isolation.

use taskboard_proto::task::Task;

/// What to do with an incoming remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The id is unknown: add the task.
    Insert,
    /// The id is known and the record is newer: replace it.
    Replace,
    /// Leave the store unchanged.
    Skip(SkipReason),
}

/// Why a remote event left the store unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The local copy already equals the incoming record.
    Duplicate,
    /// The incoming record is older than the local copy.
    Stale,
    /// The task was deleted; late events must not resurrect it.
    Tombstoned,
    /// A removal for an id that is not present.
    Absent,
}

/// Result of applying a remote event to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// The store changed.
    Changed,
    /// The event was a no-op.
    Skipped(SkipReason),
}

impl RemoteOutcome {
    /// Returns `true` if the store changed.
    #[must_use]
    pub const fn is_changed(self) -> bool {
        matches!(self, Self::Changed)
    }
}

/// Returns `true` if `incoming` carries an older version than `local`.
///
/// Versions are compared by `updated_at`; when either side lacks one the
/// record is not considered stale and field equality decides instead.
#[must_use]
pub fn is_stale(local: &Task, incoming: &Task) -> bool {
    match (local.updated_at, incoming.updated_at) {
        (Some(local_version), Some(incoming_version)) => incoming_version < local_version,
        _ => false,
    }
}

fn same_version(local: &Task, incoming: &Task) -> bool {
    local.updated_at.is_some() && local.updated_at == incoming.updated_at
}

/// Decides how to apply a created/updated/moved record.
///
/// Rules (in priority order):
/// 1. Unknown id that was deleted earlier: skip.
/// 2. Unknown id: insert.
/// 3. Identical record, or the same version as the local one: skip as
///    duplicate. The service bumps `updated_at` on every write, so a
///    matching version is already reflected locally.
/// 4. Older version: skip as stale.
/// 5. Otherwise: replace.
#[must_use]
pub fn decide_upsert(local: Option<&Task>, incoming: &Task, tombstoned: bool) -> Decision {
    match local {
        None if tombstoned => Decision::Skip(SkipReason::Tombstoned),
        None => Decision::Insert,
        Some(existing) if existing == incoming || same_version(existing, incoming) => {
            Decision::Skip(SkipReason::Duplicate)
        }
        Some(existing) if is_stale(existing, incoming) => Decision::Skip(SkipReason::Stale),
        Some(_) => Decision::Replace,
    }
}
