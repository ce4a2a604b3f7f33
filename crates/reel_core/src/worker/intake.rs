//! Intake worker: runs the coordinator for each task-intake job.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::runner::JobProcessor;
use crate::models::IntakePayload;
use crate::orchestrator::{Coordinator, PipelineError};
use crate::queue::{Job, JobQueue};

pub struct IntakeWorker {
    queue: Arc<JobQueue>,
    coordinator: Arc<Coordinator>,
}

impl IntakeWorker {
    pub fn new(queue: Arc<JobQueue>, coordinator: Arc<Coordinator>) -> Self {
        Self { queue, coordinator }
    }
}

#[async_trait]
impl JobProcessor for IntakeWorker {
    type Error = PipelineError;

    fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    async fn process(&self, job: &Job) -> Result<Value, PipelineError> {
        let payload = IntakePayload::from_value(&job.payload)
            .map_err(|e| PipelineError::invalid_payload(job.id, e.to_string()))?;
        tracing::info!(task_id = %payload.task_id, job_id = %job.id, "Processing task intake job");

        let record = self.coordinator.run_task(payload).await?;
        Ok(json!({
            "success": true,
            "task_id": record.id,
            "status": record.status,
        }))
    }
}
