//! Error types for task store operations.
//!
//! Store errors cover the two ways a task mutation can go wrong: the task is
//! unknown, or the requested status change would violate the one-directional
//! lifecycle. Everything else in the pipeline builds richer error taxonomies
//! on top of these.

use thiserror::Error;

use crate::models::{TaskId, TaskStatus};

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the task store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// No task with the given identifier exists in the store.
    #[error("task not found: {id}")]
    TaskNotFound {
        /// Identifier that was looked up
        id: TaskId,
    },

    /// The requested status change is not allowed by the task lifecycle.
    ///
    /// Transitions are one-directional: `pending -> processing ->
    /// {completed | failed}`. Terminal states never transition out.
    #[error("invalid task transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the task currently holds
        from: TaskStatus,
        /// Status the caller tried to move it to
        to: TaskStatus,
    },
}
