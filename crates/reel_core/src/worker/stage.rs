//! Stage worker: one generation call per attempt, persisted every time.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::errors::WorkerError;
use super::runner::JobProcessor;
use crate::models::{Stage, StageRequest, TaskStatus, TaskUpdate};
use crate::queue::{Job, JobQueue};
use crate::stages::StageClient;
use crate::store::TaskStore;

/// Consumes one stage's queue.
///
/// Every attempt's outcome is written to the task record, so the record
/// shows the latest attempt even while the queue is still retrying. Only
/// the queue's terminal event decides pipeline progression.
///
/// A job that outlives its task (the coordinator gave up on a timeout, or
/// the task already finished) leaves the record alone. A cancelled task
/// still receives the output of the stage it was running.
pub struct StageWorker {
    stage: Stage,
    queue: Arc<JobQueue>,
    client: Arc<dyn StageClient>,
    store: Arc<dyn TaskStore>,
}

impl StageWorker {
    pub fn new(
        stage: Stage,
        queue: Arc<JobQueue>,
        client: Arc<dyn StageClient>,
        store: Arc<dyn TaskStore>,
    ) -> Self {
        Self {
            stage,
            queue,
            client,
            store,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }
}

#[async_trait]
impl JobProcessor for StageWorker {
    type Error = WorkerError;

    fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    async fn process(&self, job: &Job) -> Result<Value, WorkerError> {
        let stage = self.stage;
        let request = StageRequest::from_value(&job.payload).map_err(|source| {
            WorkerError::InvalidPayload {
                queue: job.queue,
                job_id: job.id,
                source,
            }
        })?;
        let task_id = request.task_id.clone();
        tracing::info!(
            %stage,
            task_id = %task_id,
            job_id = %job.id,
            attempt = job.attempt(),
            "Processing stage job"
        );

        match self.client.generate(stage, &request).await {
            Ok(output) => {
                self.store
                    .update(&task_id, settled(TaskUpdate::stage_completed(stage, output.clone())))
                    .await?;
                tracing::info!(%stage, task_id = %task_id, job_id = %job.id, "Stage output recorded");
                Ok(output)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(%stage, task_id = %task_id, job_id = %job.id, "Stage call failed: {}", message);
                // The generation error is what the queue should see, even if this write fails.
                if let Err(store_err) = self
                    .store
                    .update(&task_id, settled(TaskUpdate::stage_failed(stage, message)))
                    .await
                {
                    tracing::error!(%stage, task_id = %task_id, "Failed to record stage error: {}", store_err);
                }
                Err(WorkerError::Stage(e))
            }
        }
    }
}

/// Skip the write once the coordinator has decided the task's outcome.
fn settled(update: TaskUpdate) -> TaskUpdate {
    update
        .unless_status(TaskStatus::Failed)
        .unless_status(TaskStatus::Completed)
}
