//! Core domain types for the relay forwarding service.
//!
//! Provides the task model with its lifecycle state machine, the concurrent
//! in-memory task store, clock abstractions for deterministic testing, and
//! the core error taxonomy. The delivery engine and HTTP surface build on
//! these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod store;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{Task, TaskCounts, TaskId, TaskStatus, TaskView, UpstreamResponse};
pub use store::TaskStore;
pub use time::{Clock, RealClock, TestClock};
