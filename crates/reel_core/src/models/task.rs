//! Task records and the partial updates applied to them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::enums::{Stage, StageProgress, TaskStatus};

/// Upper bound on `num_sequences` accepted at admission.
pub const MAX_SEQUENCES: u32 = 50;

/// Opaque unique task identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Malformed task input, rejected before anything is persisted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("num_sequences must be between 1 and {max}, got {value}")]
    SequenceCount { value: u32, max: u32 },

    #[error("{field} is out of range: {message}")]
    OutOfRange {
        field: &'static str,
        message: String,
    },
}

/// Creative parameters supplied by the client.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskInput {
    pub prompt: String,
    pub genre: String,
    pub num_sequences: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f64>,
}

impl TaskInput {
    /// Create input with the required fields; sampling parameters unset.
    pub fn new(prompt: impl Into<String>, genre: impl Into<String>, num_sequences: u32) -> Self {
        Self {
            prompt: prompt.into(),
            genre: genre.into(),
            num_sequences,
            ..Default::default()
        }
    }

    /// Check the input before a record or intake job is created.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.prompt.trim().is_empty() {
            return Err(InputError::Empty("prompt"));
        }
        if self.genre.trim().is_empty() {
            return Err(InputError::Empty("genre"));
        }
        if self.num_sequences == 0 || self.num_sequences > MAX_SEQUENCES {
            return Err(InputError::SequenceCount {
                value: self.num_sequences,
                max: MAX_SEQUENCES,
            });
        }
        if self.steps == Some(0) {
            return Err(InputError::OutOfRange {
                field: "steps",
                message: "must be at least 1".to_string(),
            });
        }
        if let Some(cfg) = self.cfg_scale {
            if !cfg.is_finite() || cfg <= 0.0 {
                return Err(InputError::OutOfRange {
                    field: "cfg_scale",
                    message: format!("must be a positive number, got {cfg}"),
                });
            }
        }
        Ok(())
    }
}

/// Durable state of one task.
///
/// Stage workers and the coordinator are the only writers; each touches
/// only its own stage's progress, error and output fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    #[serde(flatten)]
    pub input: TaskInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: TaskStatus,
    pub progress: BTreeMap<Stage, StageProgress>,
    /// Last error message per stage.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<Stage, String>,
    /// Task-level error (failure or cancellation reason).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<Value>,
    /// Id of the intake job that carries this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_job_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A freshly admitted task: queued, every stage pending.
    pub fn new(id: TaskId, input: TaskInput, user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            input,
            user_id,
            status: TaskStatus::Queued,
            progress: Stage::ALL
                .iter()
                .map(|s| (*s, StageProgress::Pending))
                .collect(),
            errors: BTreeMap::new(),
            error: None,
            story: None,
            images: None,
            video: None,
            queue_job_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Progress of a stage (pending when absent).
    pub fn progress_of(&self, stage: Stage) -> StageProgress {
        self.progress.get(&stage).copied().unwrap_or_default()
    }

    /// Stored output of a stage.
    pub fn output(&self, stage: Stage) -> Option<&Value> {
        match stage {
            Stage::Story => self.story.as_ref(),
            Stage::Images => self.images.as_ref(),
            Stage::Video => self.video.as_ref(),
        }
    }

    fn output_mut(&mut self, stage: Stage) -> &mut Option<Value> {
        match stage {
            Stage::Story => &mut self.story,
            Stage::Images => &mut self.images,
            Stage::Video => &mut self.video,
        }
    }

    /// First stage whose progress is `failed`.
    pub fn failed_stage(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|s| self.progress_of(*s) == StageProgress::Failed)
    }

    /// Merge a partial update (last write wins per field) and stamp `updated_at`.
    ///
    /// Returns `false`, leaving the record untouched, when the update is
    /// guarded against the record's current status.
    pub fn apply(&mut self, update: TaskUpdate, now: DateTime<Utc>) -> bool {
        if update.unless_status.contains(&self.status) {
            return false;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        self.progress.extend(update.progress);
        self.errors.extend(update.errors);
        for (stage, output) in update.outputs {
            *self.output_mut(stage) = Some(output);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        if let Some(job_id) = update.queue_job_id {
            self.queue_job_id = Some(job_id);
        }
        self.updated_at = now;
        true
    }
}

/// Partial set of fields to merge into a [`TaskRecord`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: BTreeMap<Stage, StageProgress>,
    pub errors: BTreeMap<Stage, String>,
    pub outputs: BTreeMap<Stage, Value>,
    pub error: Option<String>,
    pub queue_job_id: Option<u64>,
    /// Skip the whole update if the record currently has any of these.
    pub unless_status: Vec<TaskStatus>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, stage: Stage, progress: StageProgress) -> Self {
        self.progress.insert(stage, progress);
        self
    }

    pub fn stage_error(mut self, stage: Stage, message: impl Into<String>) -> Self {
        self.errors.insert(stage, message.into());
        self
    }

    pub fn output(mut self, stage: Stage, output: Value) -> Self {
        self.outputs.insert(stage, output);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn queue_job_id(mut self, job_id: u64) -> Self {
        self.queue_job_id = Some(job_id);
        self
    }

    /// Apply only if the record's status is not `status` at write time.
    pub fn unless_status(mut self, status: TaskStatus) -> Self {
        if !self.unless_status.contains(&status) {
            self.unless_status.push(status);
        }
        self
    }

    /// Apply only while the task is still running.
    pub fn unless_terminal(self) -> Self {
        self.unless_status(TaskStatus::Completed)
            .unless_status(TaskStatus::Failed)
            .unless_status(TaskStatus::Cancelled)
    }

    /// Output stored and progress marked completed.
    pub fn stage_completed(stage: Stage, output: Value) -> Self {
        Self::new()
            .output(stage, output)
            .progress(stage, StageProgress::Completed)
    }

    /// Progress marked failed with the stage's error message.
    pub fn stage_failed(stage: Stage, message: impl Into<String>) -> Self {
        Self::new()
            .progress(stage, StageProgress::Failed)
            .stage_error(stage, message)
    }

    /// Whether the update carries no field at all.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.progress.is_empty()
            && self.errors.is_empty()
            && self.outputs.is_empty()
            && self.error.is_none()
            && self.queue_job_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_rejects_bad_input() {
        assert!(TaskInput::new("P", "G", 2).validate().is_ok());
        assert_eq!(
            TaskInput::new("  ", "G", 2).validate(),
            Err(InputError::Empty("prompt"))
        );
        assert!(matches!(
            TaskInput::new("P", "G", 0).validate(),
            Err(InputError::SequenceCount { value: 0, .. })
        ));

        let mut input = TaskInput::new("P", "G", 1);
        input.cfg_scale = Some(-1.0);
        assert!(matches!(
            input.validate(),
            Err(InputError::OutOfRange { field: "cfg_scale", .. })
        ));
    }

    #[test]
    fn new_record_is_queued_and_pending() {
        let record = TaskRecord::new(TaskId::from("t1"), TaskInput::new("P", "G", 2), None);
        assert_eq!(record.status, TaskStatus::Queued);
        for stage in Stage::ALL {
            assert_eq!(record.progress_of(stage), StageProgress::Pending);
        }
        assert_eq!(record.failed_stage(), None);
    }

    #[test]
    fn apply_merges_only_given_fields() {
        let mut record = TaskRecord::new(TaskId::from("t1"), TaskInput::new("P", "G", 2), None);
        let later = record.updated_at + chrono::Duration::seconds(5);

        record.apply(
            TaskUpdate::stage_completed(Stage::Story, json!({"character": "Ada"})),
            later,
        );

        assert_eq!(record.status, TaskStatus::Queued);
        assert_eq!(record.progress_of(Stage::Story), StageProgress::Completed);
        assert_eq!(record.progress_of(Stage::Images), StageProgress::Pending);
        assert_eq!(record.story, Some(json!({"character": "Ada"})));
        assert_eq!(record.updated_at, later);

        assert!(record.apply(TaskUpdate::stage_failed(Stage::Images, "boom"), later));
        assert_eq!(record.failed_stage(), Some(Stage::Images));
        assert_eq!(record.errors.get(&Stage::Images).map(String::as_str), Some("boom"));
    }

    #[test]
    fn guarded_update_skips_matching_status() {
        let mut record = TaskRecord::new(TaskId::from("t2"), TaskInput::new("P", "G", 2), None);
        record.status = TaskStatus::Cancelled;
        let before = record.clone();

        let applied = record.apply(
            TaskUpdate::new()
                .status(TaskStatus::StoryCompleted)
                .unless_status(TaskStatus::Cancelled),
            Utc::now(),
        );
        assert!(!applied);
        assert_eq!(record, before);
    }

    #[test]
    fn terminal_guard_skips_every_finished_status() {
        for status in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            let mut record = TaskRecord::new(TaskId::from("t1"), TaskInput::new("P", "G", 1), None);
            record.status = status;
            let applied = record.apply(
                TaskUpdate::new().status(TaskStatus::Cancelled).unless_terminal(),
                Utc::now(),
            );
            assert!(!applied);
            assert_eq!(record.status, status);
        }

        let mut running = TaskRecord::new(TaskId::from("t2"), TaskInput::new("P", "G", 1), None);
        running.status = TaskStatus::ImagesCompleted;
        assert!(running.apply(
            TaskUpdate::new().status(TaskStatus::Cancelled).unless_terminal(),
            Utc::now(),
        ));
        assert_eq!(running.status, TaskStatus::Cancelled);
    }

    #[test]
    fn record_serializes_flat_input_and_stage_keys() {
        let record = TaskRecord::new(TaskId::from("t9"), TaskInput::new("P", "G", 2), None);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["prompt"], "P");
        assert_eq!(value["progress"]["story"], "pending");
        assert_eq!(value["status"], "queued");

        let back: TaskRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
