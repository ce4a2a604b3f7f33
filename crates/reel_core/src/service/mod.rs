//! Task-facing operations: admission, status, cancellation and queue
//! controls.
//!
//! `ReelService` is a thin layer over the [`PipelineContext`]; it never
//! touches stage progress, which belongs to the coordinator and the stage
//! workers.

mod errors;
mod types;

pub use errors::{ServiceError, ServiceResult};
pub use types::{
    CancelReceipt, ObliterateReport, QueueObliterated, QueuePosition, SubmitReceipt,
    SubmitRequest, TaskStatusView,
};

use std::sync::Arc;
use std::time::Duration;

use crate::models::{IntakePayload, TaskId, TaskRecord, TaskStatus, TaskUpdate};
use crate::orchestrator::PipelineContext;
use crate::queue::{Job, PipelineStats};

const CANCELLED_BY_USER: &str = "Cancelled by user";

#[derive(Debug, Clone)]
pub struct ReelService {
    ctx: Arc<PipelineContext>,
}

impl ReelService {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Validate and admit a task: the record is created as queued with every
    /// stage pending, then its intake job is enqueued.
    pub async fn submit(&self, request: SubmitRequest) -> ServiceResult<SubmitReceipt> {
        request.input.validate()?;

        let task_id = TaskId::new();
        let record = TaskRecord::new(task_id.clone(), request.input.clone(), request.user_id);
        let record = self.ctx.store.create(record).await?;

        let payload = IntakePayload::new(task_id.clone(), request.input).to_value()?;
        let handle = self.ctx.queues.intake().submit(payload);
        self.ctx
            .store
            .update(&task_id, TaskUpdate::new().queue_job_id(handle.id.value()))
            .await?;

        tracing::info!(task_id = %task_id, job_id = %handle.id, "Task admitted");
        Ok(SubmitReceipt {
            task_id,
            job_id: handle.id,
            status: record.status,
            created_at: record.created_at,
        })
    }

    pub async fn get(&self, task_id: &TaskId) -> ServiceResult<TaskRecord> {
        self.ctx
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(task_id.clone()))
    }

    pub async fn status(&self, task_id: &TaskId) -> ServiceResult<TaskStatusView> {
        Ok(TaskStatusView::from(&self.get(task_id).await?))
    }

    /// Mark a task cancelled and drop its intake job if it is still waiting.
    ///
    /// A stage already running is not interrupted; the coordinator stops
    /// at the next stage boundary. The terminal check is repeated inside the
    /// store's update, so a task that finishes meanwhile keeps its status.
    pub async fn cancel(&self, task_id: &TaskId) -> ServiceResult<CancelReceipt> {
        let record = self.get(task_id).await?;
        if record.status.is_terminal() {
            return Err(already_terminal(&record));
        }

        let record = self
            .ctx
            .store
            .update(
                task_id,
                TaskUpdate::new()
                    .status(TaskStatus::Cancelled)
                    .error(CANCELLED_BY_USER)
                    .unless_terminal(),
            )
            .await?;
        if record.status != TaskStatus::Cancelled {
            return Err(already_terminal(&record));
        }

        let removed_job = match self.waiting_intake_job(task_id) {
            Some(job) => match self.ctx.queues.intake().remove(job.id) {
                Ok(job) => Some(job.id),
                Err(e) => {
                    // Claimed in the meantime; the coordinator sees the status.
                    tracing::debug!(task_id = %task_id, "Intake job not removed: {}", e);
                    None
                }
            },
            None => None,
        };

        tracing::info!(task_id = %task_id, removed = removed_job.is_some(), "Task cancelled");
        Ok(CancelReceipt {
            task_id: record.id,
            status: record.status,
            removed_job,
        })
    }

    /// Position of the task's intake job, or `None` once it left the
    /// waiting list.
    pub async fn queue_position(&self, task_id: &TaskId) -> ServiceResult<Option<QueuePosition>> {
        self.get(task_id).await?;
        let intake = self.ctx.queues.intake();
        let position = self
            .waiting_intake_job(task_id)
            .and_then(|job| intake.position(job.id))
            .map(|position| QueuePosition {
                position,
                waiting: intake.counts().waiting,
            });
        Ok(position)
    }

    /// Tasks that have not reached a terminal status, oldest first.
    pub async fn active_tasks(&self) -> ServiceResult<Vec<TaskRecord>> {
        let mut tasks = Vec::new();
        for status in TaskStatus::active() {
            tasks.extend(self.ctx.store.query_by_status(status).await?);
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    pub fn stats(&self) -> PipelineStats {
        self.ctx.queues.stats()
    }

    /// Empty every queue and drop every pending completion waiter.
    ///
    /// Coordinators waiting on a dropped stage job record it as lost.
    pub fn obliterate(&self) -> ObliterateReport {
        let report = ObliterateReport::new(self.ctx.queues.obliterate());
        tracing::warn!(jobs = report.jobs, waiters = report.waiters, "Queues obliterated");
        report
    }

    /// Poll the record until the task reaches a terminal status.
    pub async fn wait_for_terminal(
        &self,
        task_id: &TaskId,
        poll_interval: Duration,
    ) -> ServiceResult<TaskRecord> {
        loop {
            let record = self.get(task_id).await?;
            if record.status.is_terminal() {
                return Ok(record);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    fn waiting_intake_job(&self, task_id: &TaskId) -> Option<Job> {
        self.ctx
            .queues
            .intake()
            .find_waiting(|job| job.task_id() == Some(task_id.as_str()))
    }
}

fn already_terminal(record: &TaskRecord) -> ServiceError {
    ServiceError::AlreadyTerminal {
        task_id: record.id.clone(),
        status: record.status,
    }
}
