//! Shared data model and wire format definitions for `Taskboard`.

pub mod api;
pub mod codec;
pub mod event;
pub mod guest;
pub mod task;
