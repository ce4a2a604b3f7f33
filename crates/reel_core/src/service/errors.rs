//! Error types for the task-facing service.

use thiserror::Error;

use crate::models::{InputError, TaskId, TaskStatus};
use crate::queue::QueueError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid task input: {0}")]
    Validation(#[from] InputError),

    #[error("Task '{0}' not found")]
    NotFound(TaskId),

    #[error("Task '{task_id}' is already {status}")]
    AlreadyTerminal { task_id: TaskId, status: TaskStatus },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Failed to encode intake job: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
