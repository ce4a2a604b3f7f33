//! Shared handles for one pipeline instance.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::logging::TaskLogger;
use crate::models::TaskId;
use crate::queue::QueueSet;
use crate::store::TaskStore;

/// Store, queues and settings, created once per process and passed by
/// `Arc` to the coordinator, the workers and the service.
pub struct PipelineContext {
    pub store: Arc<dyn TaskStore>,
    pub queues: QueueSet,
    pub settings: Arc<Settings>,
}

impl PipelineContext {
    /// Build the queues from `settings`.
    pub fn new(settings: Settings, store: Arc<dyn TaskStore>) -> Arc<Self> {
        let queues = QueueSet::from_settings(&settings.queues);
        Self::with_queues(settings, store, queues)
    }

    pub fn with_queues(settings: Settings, store: Arc<dyn TaskStore>, queues: QueueSet) -> Arc<Self> {
        Arc::new(Self {
            store,
            queues,
            settings: Arc::new(settings),
        })
    }

    /// How long the coordinator waits for one stage; `None` waits forever.
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.settings
            .pipeline
            .stage_timeout_secs
            .map(Duration::from_secs)
    }

    /// Logger for one task run. Falls back to tracing-only output when the
    /// task log file cannot be created.
    pub fn task_logger(&self, task_id: &TaskId) -> TaskLogger {
        let logging = &self.settings.logging;
        let tail = logging.error_tail as usize;
        if !logging.task_logs {
            return TaskLogger::detached(task_id, tail);
        }
        let dir = PathBuf::from(&logging.log_dir).join("tasks");
        match TaskLogger::to_file(task_id, &dir, tail) {
            Ok(logger) => logger,
            Err(e) => {
                tracing::warn!(task_id = %task_id, dir = %dir.display(), "Task log unavailable: {}", e);
                TaskLogger::detached(task_id, tail)
            }
        }
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("queues", &self.queues)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
