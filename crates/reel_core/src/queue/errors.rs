//! Error types for the job queues.

use thiserror::Error;

use super::job::{JobId, JobState};
use crate::models::QueueKind;

/// Errors raised by queue operations on a specific job.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    /// The job is not (or no longer) held by the queue.
    #[error("Job {id} not found in queue '{queue}'")]
    JobNotFound { queue: QueueKind, id: JobId },

    /// An outcome was reported for a job that is not active.
    #[error("Job {id} in queue '{queue}' is {state}, not active")]
    NotActive {
        queue: QueueKind,
        id: JobId,
        state: JobState,
    },

    /// The job is claimed by a worker and cannot be removed.
    #[error("Job {id} in queue '{queue}' is locked by an active worker")]
    Locked { queue: QueueKind, id: JobId },
}

impl QueueError {
    pub fn not_found(queue: QueueKind, id: JobId) -> Self {
        Self::JobNotFound { queue, id }
    }

    pub fn not_active(queue: QueueKind, id: JobId, state: JobState) -> Self {
        Self::NotActive { queue, id, state }
    }

    pub fn locked(queue: QueueKind, id: JobId) -> Self {
        Self::Locked { queue, id }
    }
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_names_queue_and_job() {
        let err = QueueError::not_active(QueueKind::Images, JobId(12), JobState::Waiting);
        let msg = err.to_string();
        assert!(msg.contains("image-generation"));
        assert!(msg.contains("12"));
        assert!(msg.contains("waiting"));
    }
}
