//! Request bodies sent to the generation APIs.
//!
//! Each body is derived from a [`StageRequest`]: the task input plus the
//! outputs of the stages already completed.

use serde_json::{json, Map, Value};

use super::errors::{StageError, StageResult};
use crate::models::{Stage, StageRequest};

/// Body for the given stage.
pub fn request_body(stage: Stage, request: &StageRequest) -> StageResult<Value> {
    match stage {
        Stage::Story => Ok(story_body(request)),
        Stage::Images => image_body(request),
        Stage::Video => video_body(request),
    }
}

/// `{prompt, genre, num_sequences}`
pub fn story_body(request: &StageRequest) -> Value {
    json!({
        "prompt": request.input.prompt,
        "genre": request.input.genre,
        "num_sequences": request.input.num_sequences,
    })
}

/// Story characters, score and scenes plus the sampling parameters.
pub fn image_body(request: &StageRequest) -> StageResult<Value> {
    let story = request
        .story
        .as_ref()
        .ok_or_else(|| StageError::missing_input(Stage::Images, "story output"))?;
    let sequence = story
        .get("sequence")
        .cloned()
        .ok_or_else(|| StageError::missing_input(Stage::Images, "story sequence"))?;

    let mut body = Map::new();
    body.insert("folder_id".into(), json!(request.task_id));
    body.insert("character".into(), field(story, "character"));
    body.insert("music_score".into(), field(story, "music_score"));
    body.insert("sequence".into(), sequence);
    insert_sampling(&mut body, request);
    Ok(Value::Object(body))
}

/// The image body plus `image_url` from the image output. Scenes come from
/// the image output when it carries them, so each has its image attached.
pub fn video_body(request: &StageRequest) -> StageResult<Value> {
    let images = request
        .images
        .as_ref()
        .ok_or_else(|| StageError::missing_input(Stage::Video, "images output"))?;
    let mut body = match image_body(request) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(StageError::MissingInput { field, .. }) => {
            return Err(StageError::missing_input(Stage::Video, field))
        }
        Err(other) => return Err(other),
    };

    if let Some(scenes) = images.get("sequence").filter(|s| s.is_array()) {
        body.insert("sequence".into(), scenes.clone());
    }
    body.insert("image_url".into(), field(images, "image_url"));
    Ok(Value::Object(body))
}

fn field(value: &Value, key: &str) -> Value {
    value.get(key).cloned().unwrap_or(Value::Null)
}

fn insert_sampling(body: &mut Map<String, Value>, request: &StageRequest) {
    let input = &request.input;
    body.insert("seed".into(), json!(input.seed));
    body.insert("sampler".into(), json!(input.sampler));
    body.insert("steps".into(), json!(input.steps));
    body.insert("cfg_scale".into(), json!(input.cfg_scale));
}
