//! Deterministic in-process generators standing in for the external APIs.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::body::request_body;
use super::errors::{StageError, StageResult};
use super::StageClient;
use crate::models::{Stage, StageRequest};

/// Seconds of video per scene.
const SCENE_SECONDS: u64 = 5;

/// Produces canned outputs shaped like the real APIs' responses.
#[derive(Debug, Clone, Default)]
pub struct MockStageClient {
    delay: Duration,
}

impl MockStageClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated latency per call.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }

    fn story(body: &Value) -> Value {
        let count = body["num_sequences"].as_u64().unwrap_or(0);
        let sequence: Vec<Value> = (0..count)
            .map(|i| {
                json!({
                    "id": format!("seq-{i}"),
                    "description": format!("Scene {}", i + 1),
                    "duration": SCENE_SECONDS,
                    "images": [],
                })
            })
            .collect();
        json!({
            "prompt": body["prompt"],
            "genre": body["genre"],
            "character": {
                "name": "Mock Character",
                "description": "A mysterious figure in the shadows",
            },
            "music_score": {
                "mood": "suspenseful",
                "tempo": "moderate",
            },
            "sequence": sequence,
        })
    }

    fn images(body: &Value) -> StageResult<Value> {
        let folder = body["folder_id"].as_str().unwrap_or_default();
        let scenes = body["sequence"]
            .as_array()
            .ok_or_else(|| StageError::invalid_response(Stage::Images, "story sequence is not a list"))?;
        let sequence: Vec<Value> = scenes
            .iter()
            .map(|scene| {
                let mut scene = scene.clone();
                let id = scene["id"].as_str().unwrap_or_default().to_string();
                if let Some(map) = scene.as_object_mut() {
                    map.insert(
                        "image_url".into(),
                        json!(format!("https://mock-images.com/{folder}/{id}.png")),
                    );
                }
                scene
            })
            .collect();
        Ok(json!({ "folder_id": folder, "sequence": sequence }))
    }

    fn video(body: &Value) -> Value {
        let folder = body["folder_id"].as_str().unwrap_or_default();
        let scenes = body["sequence"].as_array().map_or(0, Vec::len) as u64;
        json!({
            "video_url": format!("https://mock-videos.com/{folder}/final.mp4"),
            "duration": scenes * SCENE_SECONDS,
        })
    }
}

#[async_trait]
impl StageClient for MockStageClient {
    async fn generate(&self, stage: Stage, request: &StageRequest) -> StageResult<Value> {
        let body = request_body(stage, request)?;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match stage {
            Stage::Story => Ok(Self::story(&body)),
            Stage::Images => Self::images(&body),
            Stage::Video => Ok(Self::video(&body)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskId, TaskInput};

    #[tokio::test]
    async fn outputs_chain_through_all_stages() {
        let client = MockStageClient::new();
        let mut request = StageRequest::new(TaskId::from("m1"), TaskInput::new("P", "G", 2));

        let story = client.generate(Stage::Story, &request).await.unwrap();
        assert_eq!(story["sequence"].as_array().unwrap().len(), 2);
        assert_eq!(story["sequence"][1]["description"], "Scene 2");
        request = request.with_output(Stage::Story, story);

        let images = client.generate(Stage::Images, &request).await.unwrap();
        assert_eq!(
            images["sequence"][0]["image_url"],
            "https://mock-images.com/m1/seq-0.png"
        );
        request = request.with_output(Stage::Images, images);

        let video = client.generate(Stage::Video, &request).await.unwrap();
        assert_eq!(video["video_url"], "https://mock-videos.com/m1/final.mp4");
        assert_eq!(video["duration"], 10);
    }
}
