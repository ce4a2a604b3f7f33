//! Stage generation clients.
//!
//! A [`StageClient`] performs the one external call a stage worker makes per
//! attempt. Two implementations exist:
//! - `HttpStageClient`: POSTs JSON to the configured generation APIs
//! - `MockStageClient`: deterministic in-process outputs with optional latency

mod body;
mod errors;
mod http;
mod mock;
#[cfg(test)]
pub(crate) mod testing;

pub use body::{image_body, request_body, story_body, video_body};
pub use errors::{StageError, StageResult};
pub use http::HttpStageClient;
pub use mock::MockStageClient;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::StageSettings;
use crate::models::{Stage, StageRequest};

#[async_trait]
pub trait StageClient: Send + Sync {
    /// Run one generation call for `stage` and return its output.
    async fn generate(&self, stage: Stage, request: &StageRequest) -> StageResult<Value>;
}

/// The client used by each stage's worker.
#[derive(Clone)]
pub struct StageClients {
    pub story: Arc<dyn StageClient>,
    pub images: Arc<dyn StageClient>,
    pub video: Arc<dyn StageClient>,
}

impl StageClients {
    /// One client serving every stage.
    pub fn uniform(client: Arc<dyn StageClient>) -> Self {
        Self {
            story: Arc::clone(&client),
            images: Arc::clone(&client),
            video: client,
        }
    }

    /// Mock or HTTP clients per the `[stages]` settings.
    pub fn from_settings(settings: &StageSettings) -> Self {
        if settings.mock {
            tracing::info!(delay_ms = settings.mock_delay_ms, "Using mock stage clients");
            Self::uniform(Arc::new(MockStageClient::with_delay(Duration::from_millis(
                settings.mock_delay_ms,
            ))))
        } else {
            tracing::info!(
                story = %settings.story_url,
                images = %settings.image_url,
                video = %settings.video_url,
                "Using HTTP stage clients"
            );
            Self::uniform(Arc::new(HttpStageClient::from_settings(settings)))
        }
    }

    pub fn get(&self, stage: Stage) -> &Arc<dyn StageClient> {
        match stage {
            Stage::Story => &self.story,
            Stage::Images => &self.images,
            Stage::Video => &self.video,
        }
    }
}

impl std::fmt::Debug for StageClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageClients").finish_non_exhaustive()
    }
}
