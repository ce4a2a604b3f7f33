//! Starts and stops the workers of one pipeline.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::context::PipelineContext;
use super::coordinator::Coordinator;
use crate::config::Settings;
use crate::models::{QueueKind, Stage};
use crate::service::ReelService;
use crate::stages::StageClients;
use crate::store::TaskStore;
use crate::worker::{spawn_worker, IntakeWorker, StageWorker};

/// A running pipeline: one intake worker driving the coordinator and one
/// worker per stage queue.
///
/// Must be started inside a tokio runtime.
pub struct PipelineRuntime {
    ctx: Arc<PipelineContext>,
    service: ReelService,
    cancel: CancellationToken,
    workers: Vec<(QueueKind, JoinHandle<()>)>,
}

impl PipelineRuntime {
    pub fn start(settings: Settings, store: Arc<dyn TaskStore>, clients: StageClients) -> Self {
        Self::from_context(PipelineContext::new(settings, store), clients)
    }

    pub fn from_context(ctx: Arc<PipelineContext>, clients: StageClients) -> Self {
        let cancel = CancellationToken::new();
        let mut workers = Vec::with_capacity(QueueKind::ALL.len());

        for stage in Stage::ALL {
            let worker = StageWorker::new(
                stage,
                Arc::clone(ctx.queues.for_stage(stage)),
                Arc::clone(clients.get(stage)),
                Arc::clone(&ctx.store),
            );
            workers.push((stage.queue(), spawn_worker(Arc::new(worker), cancel.clone())));
        }

        let coordinator = Arc::new(Coordinator::new(Arc::clone(&ctx)));
        let intake = IntakeWorker::new(Arc::clone(ctx.queues.intake()), coordinator);
        workers.push((QueueKind::Intake, spawn_worker(Arc::new(intake), cancel.clone())));

        tracing::info!(workers = workers.len(), "Pipeline runtime started");
        Self {
            service: ReelService::new(Arc::clone(&ctx)),
            ctx,
            cancel,
            workers,
        }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub fn service(&self) -> &ReelService {
        &self.service
    }

    /// Stop every worker and wait for them to exit. Jobs still running are
    /// aborted and stay active in their queues.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for (queue, handle) in self.workers {
            if let Err(e) = handle.await {
                tracing::error!(%queue, "Worker ended abnormally: {}", e);
            }
        }
        tracing::info!("Pipeline runtime stopped");
    }
}
