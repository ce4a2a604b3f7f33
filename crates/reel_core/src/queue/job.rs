//! Jobs held by a queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::QueueKind;

/// Job identifier, unique within one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub(crate) u64);

impl JobId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Ready to be claimed.
    Waiting,
    /// Failed an attempt; waiting out its backoff before re-entering `Waiting`.
    Delayed,
    /// Claimed by a worker.
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A unit of work in a queue.
///
/// The payload is opaque to the queue; workers decode it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: QueueKind,
    pub payload: Value,
    /// Attempts that have finished with an error.
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    /// When the current (or last) attempt was claimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_on: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn new(id: JobId, queue: QueueKind, payload: Value, max_attempts: u32) -> Self {
        Self {
            id,
            queue,
            payload,
            attempts_made: 0,
            max_attempts,
            state: JobState::Waiting,
            return_value: None,
            failed_reason: None,
            created_at: Utc::now(),
            processed_on: None,
            finished_on: None,
        }
    }

    /// 1-based number of the attempt currently running (or about to run).
    pub fn attempt(&self) -> u32 {
        self.attempts_made + 1
    }

    /// `task_id` field of the payload, when present.
    pub fn task_id(&self) -> Option<&str> {
        self.payload.get("task_id").and_then(Value::as_str)
    }

    /// Time between claim and finish of the last attempt.
    pub fn processing_time(&self) -> Option<chrono::Duration> {
        match (self.processed_on, self.finished_on) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Returned by submission; identifies the job for later lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobHandle {
    pub id: JobId,
    pub queue: QueueKind,
}
