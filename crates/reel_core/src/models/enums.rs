//! Core enums used throughout the pipeline.

use serde::{Deserialize, Serialize};

/// A generation stage. Stages always run in the order of [`Stage::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Narrative generation.
    Story,
    /// Image generation from the story's sequences.
    Images,
    /// Video assembly from story and images.
    Video,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 3] = [Stage::Story, Stage::Images, Stage::Video];

    /// Field name used for this stage in records and payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Story => "story",
            Stage::Images => "images",
            Stage::Video => "video",
        }
    }

    /// The stage that runs after this one, if any.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Story => Some(Stage::Images),
            Stage::Images => Some(Stage::Video),
            Stage::Video => None,
        }
    }

    /// The stages that must complete before this one may start.
    pub fn predecessors(&self) -> &'static [Stage] {
        match self {
            Stage::Story => &[],
            Stage::Images => &[Stage::Story],
            Stage::Video => &[Stage::Story, Stage::Images],
        }
    }

    /// Queue that carries this stage's jobs.
    pub fn queue(&self) -> QueueKind {
        match self {
            Stage::Story => QueueKind::Story,
            Stage::Images => QueueKind::Images,
            Stage::Video => QueueKind::Video,
        }
    }

    /// Task status to record once this stage completes.
    ///
    /// The last stage has no intermediate status; the coordinator marks the
    /// whole task completed instead.
    pub fn completed_status(&self) -> Option<TaskStatus> {
        match self {
            Stage::Story => Some(TaskStatus::StoryCompleted),
            Stage::Images => Some(TaskStatus::ImagesCompleted),
            Stage::Video => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one of the four job queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// Task intake; one job per submitted task, consumed by the coordinator.
    Intake,
    Story,
    Images,
    Video,
}

impl QueueKind {
    /// All queues, intake first.
    pub const ALL: [QueueKind; 4] = [
        QueueKind::Intake,
        QueueKind::Story,
        QueueKind::Images,
        QueueKind::Video,
    ];

    /// Queue name used in logs and statistics.
    pub fn name(&self) -> &'static str {
        match self {
            QueueKind::Intake => "task-intake",
            QueueKind::Story => "story-generation",
            QueueKind::Images => "image-generation",
            QueueKind::Video => "video-generation",
        }
    }

    /// The stage served by this queue (`None` for intake).
    pub fn stage(&self) -> Option<Stage> {
        match self {
            QueueKind::Intake => None,
            QueueKind::Story => Some(Stage::Story),
            QueueKind::Images => Some(Stage::Images),
            QueueKind::Video => Some(Stage::Video),
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Overall status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted, waiting in the intake queue.
    #[default]
    Queued,
    /// Coordinator picked the task up.
    Processing,
    StoryCompleted,
    ImagesCompleted,
    /// All stages completed.
    Completed,
    /// A stage failed; see `errors`.
    Failed,
    /// Cancelled by the owner.
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transitions are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Snake-case name, as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::StoryCompleted => "story_completed",
            TaskStatus::ImagesCompleted => "images_completed",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses of tasks that still have pipeline work ahead of them.
    pub fn active() -> [TaskStatus; 4] {
        [
            TaskStatus::Queued,
            TaskStatus::Processing,
            TaskStatus::StoryCompleted,
            TaskStatus::ImagesCompleted,
        ]
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage progress marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageProgress {
    #[default]
    Pending,
    Completed,
    Failed,
}
