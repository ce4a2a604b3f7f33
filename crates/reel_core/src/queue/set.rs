//! The four queues of a pipeline, addressed by kind.

use std::sync::Arc;
use std::time::Duration;

use super::options::QueueOptions;
use super::queue::{JobQueue, Obliterated};
use super::stats::PipelineStats;
use crate::config::QueuesSettings;
use crate::models::{QueueKind, Stage};

/// Intake queue plus one queue per stage.
#[derive(Debug, Clone)]
pub struct QueueSet {
    intake: Arc<JobQueue>,
    story: Arc<JobQueue>,
    images: Arc<JobQueue>,
    video: Arc<JobQueue>,
}

impl QueueSet {
    pub fn new(
        intake: QueueOptions,
        story: QueueOptions,
        images: QueueOptions,
        video: QueueOptions,
    ) -> Self {
        Self {
            intake: JobQueue::new(QueueKind::Intake, intake),
            story: JobQueue::new(QueueKind::Story, story),
            images: JobQueue::new(QueueKind::Images, images),
            video: JobQueue::new(QueueKind::Video, video),
        }
    }

    /// Build every queue from the `[queues]` settings. The intake queue
    /// additionally gets the admission rate limiter.
    pub fn from_settings(settings: &QueuesSettings) -> Self {
        let intake = QueueOptions::from_settings(&settings.intake).with_limiter(
            settings.max_tasks_per_window.max(1),
            Duration::from_millis(settings.limiter_window_ms.max(1)),
        );
        Self::new(
            intake,
            QueueOptions::from_settings(&settings.story),
            QueueOptions::from_settings(&settings.images),
            QueueOptions::from_settings(&settings.video),
        )
    }

    pub fn get(&self, kind: QueueKind) -> &Arc<JobQueue> {
        match kind {
            QueueKind::Intake => &self.intake,
            QueueKind::Story => &self.story,
            QueueKind::Images => &self.images,
            QueueKind::Video => &self.video,
        }
    }

    pub fn intake(&self) -> &Arc<JobQueue> {
        &self.intake
    }

    pub fn for_stage(&self, stage: Stage) -> &Arc<JobQueue> {
        self.get(stage.queue())
    }

    /// All queues, intake first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<JobQueue>> {
        QueueKind::ALL.into_iter().map(move |kind| self.get(kind))
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats::from_queues(self.iter().map(|q| q.stats()).collect())
    }

    /// Unresolved completion waiters across all stage queues.
    pub fn pending_waiters(&self) -> usize {
        self.iter().map(|q| q.pending_waiters()).sum()
    }

    /// Obliterate every queue, intake first.
    pub fn obliterate(&self) -> Vec<(QueueKind, Obliterated)> {
        self.iter().map(|q| (q.kind(), q.obliterate())).collect()
    }
}

impl Default for QueueSet {
    fn default() -> Self {
        Self::from_settings(&QueuesSettings::default())
    }
}
