//! Error types for the task record store.

use std::io;

use thiserror::Error;

use crate::models::TaskId;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Task '{0}' not found")]
    NotFound(TaskId),

    #[error("Task '{0}' already exists")]
    AlreadyExists(TaskId),

    #[error("I/O error in {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize task records: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn io(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
