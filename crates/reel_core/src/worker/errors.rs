//! Error types for stage workers.

use thiserror::Error;

use crate::models::QueueKind;
use crate::queue::JobId;
use crate::stages::StageError;
use crate::store::StoreError;

/// Why one attempt of a stage job failed. The display text becomes the
/// job's failed reason and the task's stage error.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Job {job_id} on '{queue}' has an unreadable payload: {source}")]
    InvalidPayload {
        queue: QueueKind,
        job_id: JobId,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Stage(#[from] StageError),

    /// The stage output was produced but could not be recorded.
    #[error("Failed to record stage output: {0}")]
    Persistence(#[from] StoreError),
}
