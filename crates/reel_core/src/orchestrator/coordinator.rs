//! Drives one task through its stages.
//!
//! The coordinator is the only component that decides progression. For
//! each stage it:
//! 1. records the previous stage's output and the task status,
//! 2. submits the stage job with every prior output attached,
//! 3. waits for that job's terminal event (correlated by job id).
//!
//! Every status write is guarded against a concurrent cancellation, and a
//! cancelled record stops the run at the next stage boundary.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::context::PipelineContext;
use super::errors::{PipelineError, PipelineResult};
use crate::logging::TaskLogger;
use crate::models::{IntakePayload, Stage, StageRequest, TaskId, TaskRecord, TaskStatus, TaskUpdate};
use crate::queue::{JobId, WaitError};

/// How a stage wait ended without output.
#[derive(Debug)]
enum StageFailure {
    Failed(String),
    TimedOut(Duration),
    Lost(JobId),
}

impl StageFailure {
    fn message(&self, stage: Stage) -> String {
        match self {
            StageFailure::Failed(message) => message.clone(),
            StageFailure::TimedOut(limit) => {
                format!("{stage} stage timed out after {}s", limit.as_secs())
            }
            StageFailure::Lost(job_id) => {
                format!("{stage} job {job_id} was removed before it finished")
            }
        }
    }

    fn into_error(self, task_id: TaskId, stage: Stage) -> PipelineError {
        match self {
            StageFailure::Failed(message) => PipelineError::stage_failed(task_id, stage, message),
            StageFailure::TimedOut(timeout) => PipelineError::StageTimeout {
                task_id,
                stage,
                timeout,
            },
            StageFailure::Lost(job_id) => PipelineError::StageLost {
                task_id,
                stage,
                job_id,
            },
        }
    }
}

pub struct Coordinator {
    ctx: Arc<PipelineContext>,
}

impl Coordinator {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    /// Run every stage of one admitted task and return the final record.
    ///
    /// Stage N+1 is submitted only after stage N's completion has been
    /// written, so the record never shows a later stage ahead of an
    /// earlier one.
    pub async fn run_task(&self, payload: IntakePayload) -> PipelineResult<TaskRecord> {
        let IntakePayload { task_id, task, .. } = payload;
        let logger = self.ctx.task_logger(&task_id);
        logger.note(&format!(
            "Starting task: {} sequence(s), genre '{}'",
            task.num_sequences, task.genre
        ));

        let mut request = StageRequest::new(task_id.clone(), task);
        let mut pending = TaskUpdate::new().status(TaskStatus::Processing);

        for stage in Stage::ALL {
            let record = self.write(&task_id, pending, &logger).await?;
            if record.status == TaskStatus::Cancelled {
                logger.warn(&format!("Cancelled before the {stage} stage"));
                return Err(PipelineError::cancelled(task_id, Some(stage)));
            }

            logger.stage_started(stage);
            let output = match self.run_stage(stage, &request, &logger).await {
                Ok(output) => output,
                Err(failure) => return Err(self.fail_task(task_id, stage, failure, &logger).await),
            };
            logger.done(&format!("{stage} stage completed"));

            pending = TaskUpdate::stage_completed(stage, output.clone());
            if let Some(status) = stage.completed_status() {
                pending = pending.status(status);
            }
            request = request.with_output(stage, output);
        }

        let record = self
            .write(&task_id, pending.status(TaskStatus::Completed), &logger)
            .await?;
        if record.status == TaskStatus::Cancelled {
            logger.warn("Cancelled after the last stage; result kept, status unchanged");
            return Err(PipelineError::cancelled(task_id, None));
        }
        logger.done("Task completed");
        Ok(record)
    }

    /// Submit one stage job and wait for its terminal event.
    async fn run_stage(
        &self,
        stage: Stage,
        request: &StageRequest,
        logger: &TaskLogger,
    ) -> Result<Value, StageFailure> {
        let queue = self.ctx.queues.for_stage(stage);
        let payload = request
            .to_value()
            .map_err(|e| StageFailure::Failed(format!("could not encode {stage} request: {e}")))?;

        let (handle, waiter) = queue.submit_watched(payload);
        logger.note(&format!("Submitted {stage} job {}", handle.id));

        let outcome = match self.ctx.stage_timeout() {
            Some(limit) => match tokio::time::timeout(limit, waiter.wait()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // An active job cannot be removed; its late event has no waiter.
                    if let Err(e) = queue.remove(handle.id) {
                        tracing::debug!(%stage, job_id = %handle.id, "Timed-out job left in queue: {}", e);
                    }
                    return Err(StageFailure::TimedOut(limit));
                }
            },
            None => waiter.wait().await,
        };

        outcome.map_err(|e| match e {
            WaitError::Failed { message, .. } => StageFailure::Failed(message),
            WaitError::Lost { job_id } => StageFailure::Lost(job_id),
        })
    }

    /// Record a stage failure on the task and build the matching error.
    async fn fail_task(
        &self,
        task_id: TaskId,
        stage: Stage,
        failure: StageFailure,
        logger: &TaskLogger,
    ) -> PipelineError {
        let message = failure.message(stage);
        logger.fail(&format!("{stage} stage failed: {message}"));

        let update = TaskUpdate::stage_failed(stage, &message)
            .status(TaskStatus::Failed)
            .error(&message);
        match self.write(&task_id, update, logger).await {
            Ok(record) if record.status == TaskStatus::Cancelled => {
                logger.warn("Task was cancelled meanwhile; status left as cancelled");
            }
            Ok(_) => {}
            Err(e) => return e,
        }

        logger.dump_tail();
        failure.into_error(task_id, stage)
    }

    /// Guarded write: a cancelled record is returned unchanged.
    async fn write(
        &self,
        task_id: &TaskId,
        update: TaskUpdate,
        logger: &TaskLogger,
    ) -> PipelineResult<TaskRecord> {
        let update = update.unless_status(TaskStatus::Cancelled);
        self.ctx.store.update(task_id, update).await.map_err(|e| {
            logger.fail(&format!("Task record write failed: {e}"));
            PipelineError::persistence(task_id.clone(), e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::models::{StageProgress, TaskInput};
    use crate::stages::testing::ScriptedStageClient;
    use crate::store::{MemoryTaskStore, StoreError, StoreResult, TaskStore};
    use crate::worker::{spawn_worker, StageWorker};
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    fn fast_settings() -> Settings {
        let mut settings = Settings::default();
        for queue in [
            &mut settings.queues.story,
            &mut settings.queues.images,
            &mut settings.queues.video,
        ] {
            queue.backoff_delay_ms = 5;
        }
        settings
    }

    struct Harness {
        ctx: Arc<PipelineContext>,
        client: Arc<ScriptedStageClient>,
        coordinator: Arc<Coordinator>,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new(settings: Settings) -> Self {
            Self::with_store(settings, Arc::new(MemoryTaskStore::new()))
        }

        fn with_store(settings: Settings, store: Arc<dyn TaskStore>) -> Self {
            Self::with_client(settings, store, ScriptedStageClient::new())
        }

        fn with_client(
            settings: Settings,
            store: Arc<dyn TaskStore>,
            client: Arc<ScriptedStageClient>,
        ) -> Self {
            let ctx = PipelineContext::new(settings, store);
            let cancel = CancellationToken::new();
            for stage in Stage::ALL {
                let worker = StageWorker::new(
                    stage,
                    Arc::clone(ctx.queues.for_stage(stage)),
                    client.clone(),
                    Arc::clone(&ctx.store),
                );
                spawn_worker(Arc::new(worker), cancel.clone());
            }
            Self {
                coordinator: Arc::new(Coordinator::new(Arc::clone(&ctx))),
                ctx,
                client,
                cancel,
            }
        }

        async fn admit(&self, id: &str) -> IntakePayload {
            let input = TaskInput::new("A heist aboard a generation ship", "sci-fi", 2);
            let record = TaskRecord::new(TaskId::from(id), input.clone(), None);
            self.ctx.store.create(record).await.unwrap();
            IntakePayload::new(TaskId::from(id), input)
        }

        async fn record(&self, id: &str) -> TaskRecord {
            self.ctx.store.get(&TaskId::from(id)).await.unwrap().unwrap()
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    #[tokio::test]
    async fn runs_stages_in_order_with_prior_outputs() {
        let h = Harness::new(fast_settings());
        let payload = h.admit("t1").await;

        let record = h.coordinator.run_task(payload).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        for stage in Stage::ALL {
            assert_eq!(record.progress_of(stage), StageProgress::Completed);
            assert!(record.output(stage).is_some());
        }

        let calls = h.client.calls();
        let order: Vec<Stage> = calls.iter().map(|c| c.stage).collect();
        assert_eq!(order, Stage::ALL.to_vec());
        assert!(calls[0].at <= calls[1].at && calls[1].at <= calls[2].at);

        assert!(calls[0].request.story.is_none());
        assert_eq!(calls[1].request.story.as_ref(), record.story.as_ref());
        assert!(calls[1].request.images.is_none());
        assert_eq!(calls[2].request.story.as_ref(), record.story.as_ref());
        assert_eq!(calls[2].request.images.as_ref(), record.images.as_ref());

        assert_eq!(h.ctx.queues.pending_waiters(), 0);
    }

    #[tokio::test]
    async fn exhausted_stage_fails_task_and_skips_later_stages() {
        let h = Harness::new(fast_settings());
        h.client.fail(Stage::Images, 3);
        let payload = h.admit("t1").await;

        let err = h.coordinator.run_task(payload).await.unwrap_err();
        assert!(matches!(err, PipelineError::StageFailed { stage: Stage::Images, .. }));

        let record = h.record("t1").await;
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("images generator unavailable"));
        assert_eq!(record.progress_of(Stage::Story), StageProgress::Completed);
        assert_eq!(record.progress_of(Stage::Images), StageProgress::Failed);
        assert_eq!(record.progress_of(Stage::Video), StageProgress::Pending);
        assert_eq!(record.failed_stage(), Some(Stage::Images));

        assert_eq!(h.client.calls_for(Stage::Images).len(), 3);
        assert!(h.client.calls_for(Stage::Video).is_empty());
        assert_eq!(h.ctx.queues.pending_waiters(), 0);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_transparently() {
        let h = Harness::new(fast_settings());
        h.client.fail(Stage::Story, 2);
        let payload = h.admit("t1").await;

        let record = h.coordinator.run_task(payload).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(h.client.calls_for(Stage::Story).len(), 3);
        assert_eq!(h.client.calls_for(Stage::Video).len(), 1);
    }

    #[tokio::test]
    async fn cancelled_task_does_not_start() {
        let h = Harness::new(fast_settings());
        let payload = h.admit("t1").await;
        h.ctx
            .store
            .update(&TaskId::from("t1"), TaskUpdate::new().status(TaskStatus::Cancelled))
            .await
            .unwrap();

        let err = h.coordinator.run_task(payload).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { before: Some(Stage::Story), .. }));
        assert!(h.client.calls().is_empty());
        assert_eq!(h.record("t1").await.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancellation_mid_stage_stops_at_next_boundary() {
        let h = Harness::new(fast_settings());
        h.client.hold(Stage::Story);
        let payload = h.admit("t1").await;

        let coordinator = Arc::clone(&h.coordinator);
        let run = tokio::spawn(async move { coordinator.run_task(payload).await });
        h.client.wait_for_calls(Stage::Story, 1).await;

        h.ctx
            .store
            .update(
                &TaskId::from("t1"),
                TaskUpdate::new()
                    .status(TaskStatus::Cancelled)
                    .error("Cancelled by user"),
            )
            .await
            .unwrap();
        h.client.release(Stage::Story);

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { before: Some(Stage::Images), .. }));

        let record = h.record("t1").await;
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert_eq!(record.error.as_deref(), Some("Cancelled by user"));
        // The in-flight stage still finished and recorded its output.
        assert!(record.story.is_some());
        assert!(h.client.calls_for(Stage::Images).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stage_timeout_fails_task() {
        let mut settings = fast_settings();
        settings.pipeline.stage_timeout_secs = Some(30);
        let h = Harness::new(settings);
        h.client.hold(Stage::Story);
        let payload = h.admit("t1").await;

        let err = h.coordinator.run_task(payload).await.unwrap_err();
        assert!(matches!(err, PipelineError::StageTimeout { stage: Stage::Story, .. }));

        let record = h.record("t1").await;
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.progress_of(Stage::Story), StageProgress::Failed);
        assert!(record.error.unwrap().contains("timed out"));
        assert_eq!(h.ctx.queues.pending_waiters(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_stage_finishing_after_timeout_keeps_task_failed() {
        let mut settings = fast_settings();
        settings.pipeline.stage_timeout_secs = Some(30);
        let h = Harness::with_client(
            settings,
            Arc::new(MemoryTaskStore::new()),
            ScriptedStageClient::with_delay(Duration::from_secs(60)),
        );
        let payload = h.admit("t1").await;

        let err = h.coordinator.run_task(payload).await.unwrap_err();
        assert!(matches!(err, PipelineError::StageTimeout { stage: Stage::Story, .. }));

        // Let the abandoned job run to completion.
        let story = h.ctx.queues.for_stage(Stage::Story);
        while story.counts().completed == 0 {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }

        let record = h.record("t1").await;
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.progress_of(Stage::Story), StageProgress::Failed);
        assert_eq!(record.failed_stage(), Some(Stage::Story));
        assert!(record.story.is_none());
        assert!(h.client.calls_for(Stage::Images).is_empty());
    }

    #[tokio::test]
    async fn obliterated_stage_job_is_reported_lost() {
        let h = Harness::new(fast_settings());
        h.client.hold(Stage::Story);
        let payload = h.admit("t1").await;

        let coordinator = Arc::clone(&h.coordinator);
        let run = tokio::spawn(async move { coordinator.run_task(payload).await });
        h.client.wait_for_calls(Stage::Story, 1).await;
        h.ctx.queues.for_stage(Stage::Story).obliterate();
        h.client.release(Stage::Story);

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::StageLost { stage: Stage::Story, .. }));
        assert_eq!(h.record("t1").await.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn concurrent_tasks_keep_their_own_outputs() {
        let h = Harness::new(fast_settings());
        let first = h.admit("t1").await;
        let mut second = h.admit("t2").await;
        second.task = TaskInput::new("A lighthouse keeper's last night", "drama", 3);

        let (a, b) = tokio::join!(h.coordinator.run_task(first), h.coordinator.run_task(second));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.story.as_ref().unwrap()["genre"], "sci-fi");
        assert_eq!(b.story.as_ref().unwrap()["genre"], "drama");
        for call in h.client.calls() {
            let expected_genre = if call.request.task_id.as_str() == "t1" { "sci-fi" } else { "drama" };
            assert_eq!(call.request.input.genre, expected_genre);
            if let Some(story) = &call.request.story {
                assert_eq!(story["genre"], expected_genre);
            }
        }
        assert_eq!(h.ctx.queues.pending_waiters(), 0);
    }

    #[tokio::test]
    async fn missing_record_is_a_persistence_error() {
        let h = Harness::new(fast_settings());
        let payload = IntakePayload::new(TaskId::from("ghost"), TaskInput::new("P", "G", 1));

        let err = h.coordinator.run_task(payload).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Persistence { source: StoreError::NotFound(_), .. }
        ));
        assert!(h.client.calls().is_empty());
    }

    /// Rejects any update that would move a task to `reject`.
    struct RejectingStore {
        inner: MemoryTaskStore,
        reject: TaskStatus,
    }

    #[async_trait]
    impl TaskStore for RejectingStore {
        async fn create(&self, record: TaskRecord) -> StoreResult<TaskRecord> {
            self.inner.create(record).await
        }

        async fn update(&self, id: &TaskId, update: TaskUpdate) -> StoreResult<TaskRecord> {
            if update.status == Some(self.reject) {
                return Err(StoreError::Unavailable("disk full".into()));
            }
            self.inner.update(id, update).await
        }

        async fn get(&self, id: &TaskId) -> StoreResult<Option<TaskRecord>> {
            self.inner.get(id).await
        }

        async fn query_by_status(&self, status: TaskStatus) -> StoreResult<Vec<TaskRecord>> {
            self.inner.query_by_status(status).await
        }

        async fn clear(&self) -> StoreResult<usize> {
            self.inner.clear().await
        }
    }

    #[tokio::test]
    async fn failed_record_write_stops_the_task() {
        let store = Arc::new(RejectingStore {
            inner: MemoryTaskStore::new(),
            reject: TaskStatus::StoryCompleted,
        });
        let h = Harness::with_store(fast_settings(), store);
        let payload = h.admit("t1").await;

        let err = h.coordinator.run_task(payload).await.unwrap_err();
        assert!(matches!(err, PipelineError::Persistence { .. }));
        assert_eq!(h.client.calls_for(Stage::Story).len(), 1);
        assert!(h.client.calls_for(Stage::Images).is_empty());
    }
}
