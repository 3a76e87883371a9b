//! Core task model for the conformance engine.
//!
//! This module contains the task traits, node state and the task graph
//! that jobs execute.

pub mod graph;
pub mod task;

pub use graph::{Readiness, TaskGraph};
pub use task::{MetaTask, Task, TaskGuard, TaskId, TaskNode, TaskStatus, Work};
