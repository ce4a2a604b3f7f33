//! Queue statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::QueueKind;

/// Job counts of one queue (or a sum over several).
///
/// `completed` and `failed` count terminations since the queue was created
/// or last obliterated, including jobs already removed by retention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub delayed: usize,
}

impl JobCounts {
    /// Jobs still held and not terminal.
    pub fn in_flight(&self) -> usize {
        self.waiting + self.active + self.delayed
    }
}

impl std::ops::AddAssign for JobCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.waiting += rhs.waiting;
        self.active += rhs.active;
        self.completed += rhs.completed;
        self.failed += rhs.failed;
        self.delayed += rhs.delayed;
    }
}

/// Snapshot of one queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    pub queue: QueueKind,
    pub name: &'static str,
    #[serde(flatten)]
    pub counts: JobCounts,
    /// Mean claim-to-finish time of completed jobs, rounded to whole seconds.
    pub avg_processing_secs: u64,
    pub avg_processing_ms: u64,
}

/// Snapshot of every queue plus totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub total: JobCounts,
    pub queues: Vec<QueueStats>,
    pub timestamp: DateTime<Utc>,
}

impl PipelineStats {
    pub fn from_queues(queues: Vec<QueueStats>) -> Self {
        let mut total = JobCounts::default();
        for q in &queues {
            total += q.counts;
        }
        Self {
            total,
            queues,
            timestamp: Utc::now(),
        }
    }

    pub fn queue(&self, kind: QueueKind) -> Option<&QueueStats> {
        self.queues.iter().find(|q| q.queue == kind)
    }
}
