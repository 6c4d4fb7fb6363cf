//! Column ordering: expedited before normal, then FIFO by creation time.
//!
//! These are pure functions over slices; the store keeps each column sorted
//! by calling [`position`] on insert rather than re-sorting the whole column.

use std::cmp::Ordering;

use taskboard_proto::task::Task;

/// Compares two tasks by column order.
///
/// Returns `Equal` for tasks with the same processing class and creation
/// time; callers rely on a stable algorithm to keep their relative order.
#[must_use]
pub fn compare(a: &Task, b: &Task) -> Ordering {
    a.processing
        .rank()
        .cmp(&b.processing.rank())
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// Returns the index at which `task` belongs in the sorted `column`.
///
/// The index is after every task that compares less than or equal to it,
/// so a newcomer with the same keys as an existing task lands behind it.
#[must_use]
pub fn position(task: &Task, column: &[Task]) -> usize {
    column.partition_point(|existing| compare(existing, task) != Ordering::Greater)
}

/// Sorts a column in place, preserving the relative order of equal tasks.
pub fn sort_column(column: &mut [Task]) {
    column.sort_by(compare);
}

/// Returns `true` if `column` is in column order.
#[must_use]
pub fn is_sorted(column: &[Task]) -> bool {
    column
        .windows(2)
        .all(|pair| compare(&pair[0], &pair[1]) != Ordering::Greater)
}
