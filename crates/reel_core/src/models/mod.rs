//! Data models for reel.
//!
//! This module contains the core data structures shared by the queues,
//! workers and coordinator:
//! - Enums for stages, queues, task status and stage progress
//! - Task records and partial updates
//! - Job payloads (intake and stage requests)

mod enums;
mod payloads;
mod task;

pub use enums::{QueueKind, Stage, StageProgress, TaskStatus};
pub use payloads::{IntakePayload, StageRequest};
pub use task::{InputError, TaskId, TaskInput, TaskRecord, TaskUpdate, MAX_SEQUENCES};
