//! Request and response shapes of the service.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{QueueKind, Stage, StageProgress, TaskId, TaskInput, TaskRecord, TaskStatus};
use crate::queue::{JobId, Obliterated};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    #[serde(flatten)]
    pub input: TaskInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl SubmitRequest {
    pub fn new(input: TaskInput) -> Self {
        Self {
            input,
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Returned once a task is admitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitReceipt {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

/// Progress view of one task, without stage outputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatusView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: BTreeMap<Stage, StageProgress>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<Stage, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TaskRecord> for TaskStatusView {
    fn from(record: &TaskRecord) -> Self {
        Self {
            task_id: record.id.clone(),
            status: record.status,
            progress: record.progress.clone(),
            errors: record.errors.clone(),
            error: record.error.clone(),
            failed_stage: record.failed_stage(),
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelReceipt {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Intake job removed because it had not been claimed yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed_job: Option<JobId>,
}

/// Place of a task's intake job among waiting intake jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueuePosition {
    /// 1-based.
    pub position: usize,
    pub waiting: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueObliterated {
    pub queue: QueueKind,
    #[serde(flatten)]
    pub removed: Obliterated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObliterateReport {
    pub queues: Vec<QueueObliterated>,
    pub jobs: usize,
    pub waiters: usize,
}

impl ObliterateReport {
    pub(crate) fn new(removed: Vec<(QueueKind, Obliterated)>) -> Self {
        let queues: Vec<QueueObliterated> = removed
            .into_iter()
            .map(|(queue, removed)| QueueObliterated { queue, removed })
            .collect();
        Self {
            jobs: queues.iter().map(|q| q.removed.jobs).sum(),
            waiters: queues.iter().map(|q| q.removed.waiters).sum(),
            queues,
        }
    }
}
