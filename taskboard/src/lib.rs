//! Taskboard: kanban task board client core.
//!
//! The [`board::Board`] controller owns the task store, undo history and
//! drag state, and keeps them in step with either a local key-value store or
//! a remote task service plus its live push stream.

pub mod board;
pub mod config;
pub mod guest;
pub mod notify;
pub mod persist;
pub mod session;
pub mod sync;
