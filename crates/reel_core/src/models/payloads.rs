//! Job payloads carried by the queues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::Stage;
use super::task::{TaskId, TaskInput};

/// Payload of a task-intake job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakePayload {
    pub task_id: TaskId,
    pub task: TaskInput,
    pub submitted_at: DateTime<Utc>,
}

impl IntakePayload {
    pub fn new(task_id: TaskId, task: TaskInput) -> Self {
        Self {
            task_id,
            task,
            submitted_at: Utc::now(),
        }
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: &Value) -> serde_json::Result<Self> {
        Self::deserialize(value)
    }
}

/// Payload of a stage job: the submitted task input plus every prior stage's
/// output as a named field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRequest {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub input: TaskInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Value>,
}

impl StageRequest {
    pub fn new(task_id: TaskId, input: TaskInput) -> Self {
        Self {
            task_id,
            input,
            story: None,
            images: None,
        }
    }

    /// Attach a completed stage's output for the stages that follow it.
    ///
    /// The video output is final and is never forwarded, so it is ignored.
    pub fn with_output(mut self, stage: Stage, output: Value) -> Self {
        match stage {
            Stage::Story => self.story = Some(output),
            Stage::Images => self.images = Some(output),
            Stage::Video => {}
        }
        self
    }

    /// Output of a prior stage carried in this request.
    pub fn output(&self, stage: Stage) -> Option<&Value> {
        match stage {
            Stage::Story => self.story.as_ref(),
            Stage::Images => self.images.as_ref(),
            Stage::Video => None,
        }
    }

    /// Whether every predecessor of `stage` has its output attached.
    pub fn has_inputs_for(&self, stage: Stage) -> bool {
        stage
            .predecessors()
            .iter()
            .all(|prior| self.output(*prior).is_some())
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: &Value) -> serde_json::Result<Self> {
        Self::deserialize(value)
    }
}
