//! Error types for the pipeline coordinator.
//!
//! Errors carry context that chains through layers:
//! Task → Stage → Detail

use std::time::Duration;

use thiserror::Error;

use crate::models::{Stage, TaskId};
use crate::queue::JobId;
use crate::store::StoreError;

/// Why a coordinator run ended without completing the task.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The stage's job exhausted its attempts.
    #[error("Task '{task_id}' failed at stage '{stage}': {message}")]
    StageFailed {
        task_id: TaskId,
        stage: Stage,
        message: String,
    },

    /// No terminal event arrived within the configured stage timeout.
    #[error("Task '{task_id}' timed out at stage '{stage}' after {}s", .timeout.as_secs())]
    StageTimeout {
        task_id: TaskId,
        stage: Stage,
        timeout: Duration,
    },

    /// The stage's job was removed from its queue before terminating.
    #[error("Task '{task_id}' lost stage '{stage}' job {job_id}")]
    StageLost {
        task_id: TaskId,
        stage: Stage,
        job_id: JobId,
    },

    /// A task record write failed. Never retried by the coordinator.
    #[error("Task '{task_id}' could not be persisted: {source}")]
    Persistence {
        task_id: TaskId,
        #[source]
        source: StoreError,
    },

    /// The task was cancelled; `before` is the stage that was not started.
    #[error("Task '{task_id}' was cancelled")]
    Cancelled {
        task_id: TaskId,
        before: Option<Stage>,
    },

    /// The intake job payload could not be decoded.
    #[error("Intake job {job_id} has an invalid payload: {message}")]
    InvalidPayload { job_id: JobId, message: String },
}

impl PipelineError {
    pub fn stage_failed(task_id: TaskId, stage: Stage, message: impl Into<String>) -> Self {
        Self::StageFailed {
            task_id,
            stage,
            message: message.into(),
        }
    }

    pub fn persistence(task_id: TaskId, source: StoreError) -> Self {
        Self::Persistence { task_id, source }
    }

    pub fn cancelled(task_id: TaskId, before: Option<Stage>) -> Self {
        Self::Cancelled { task_id, before }
    }

    pub fn invalid_payload(job_id: JobId, message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            job_id,
            message: message.into(),
        }
    }

    /// Stage at which the run stopped, if it stopped at one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::StageFailed { stage, .. }
            | Self::StageTimeout { stage, .. }
            | Self::StageLost { stage, .. } => Some(*stage),
            Self::Cancelled { before, .. } => *before,
            Self::Persistence { .. } | Self::InvalidPayload { .. } => None,
        }
    }
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
