//! Stage client calling the external generation APIs over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::body::request_body;
use super::errors::{StageError, StageResult};
use super::StageClient;
use crate::config::StageSettings;
use crate::models::{Stage, StageRequest};

/// POSTs each stage's body as JSON and returns the JSON response.
#[derive(Debug, Clone)]
pub struct HttpStageClient {
    client: reqwest::Client,
    story_url: String,
    image_url: String,
    video_url: String,
}

impl HttpStageClient {
    pub fn new(
        story_url: impl Into<String>,
        image_url: impl Into<String>,
        video_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            story_url: story_url.into(),
            image_url: image_url.into(),
            video_url: video_url.into(),
        }
    }

    pub fn from_settings(settings: &StageSettings) -> Self {
        Self::new(
            settings.story_url.clone(),
            settings.image_url.clone(),
            settings.video_url.clone(),
            Duration::from_secs(settings.request_timeout_secs.max(1)),
        )
    }

    /// Endpoint for a stage. The video endpoint takes the task id as a path segment.
    fn url(&self, stage: Stage, request: &StageRequest) -> String {
        match stage {
            Stage::Story => self.story_url.clone(),
            Stage::Images => self.image_url.clone(),
            Stage::Video => format!(
                "{}/{}",
                self.video_url.trim_end_matches('/'),
                request.task_id
            ),
        }
    }
}

#[async_trait]
impl StageClient for HttpStageClient {
    async fn generate(&self, stage: Stage, request: &StageRequest) -> StageResult<Value> {
        let body = request_body(stage, request)?;
        let url = self.url(stage, request);
        tracing::debug!(%stage, task_id = %request.task_id, %url, "Calling generation API");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| StageError::Request { stage, source })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| StageError::invalid_response(stage, e.to_string()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| StageError::Request { stage, source })?;
        let message = serde_json::from_slice::<Value>(&bytes)
            .ok()
            .and_then(|value| {
                ["message", "error", "detail"]
                    .iter()
                    .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
            })
            .unwrap_or_else(|| String::from_utf8_lossy(&bytes).trim().to_string());

        Err(StageError::Status {
            stage,
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskId, TaskInput};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the request line.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            // Read the whole request (headers plus content-length bytes).
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&received).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if received.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&received)
                .lines()
                .next()
                .unwrap_or_default()
                .to_string()
        });
        (format!("http://{addr}"), handle)
    }

    fn request() -> StageRequest {
        StageRequest::new(TaskId::from("m7"), TaskInput::new("P", "G", 1))
            .with_output(Stage::Story, json!({"sequence": []}))
            .with_output(Stage::Images, json!({"sequence": []}))
    }

    #[tokio::test]
    async fn video_posts_to_task_path() {
        let (base, server) = serve_once("200 OK", r#"{"video_url":"v"}"#).await;
        let client = HttpStageClient::new("unused", "unused", format!("{base}/video/"), Duration::from_secs(5));

        let output = client.generate(Stage::Video, &request()).await.unwrap();
        assert_eq!(output, json!({"video_url": "v"}));
        assert_eq!(server.await.unwrap(), "POST /video/m7 HTTP/1.1");
    }

    #[tokio::test]
    async fn error_status_carries_message() {
        let (base, _server) = serve_once("503 Service Unavailable", r#"{"message":"gpu busy"}"#).await;
        let client = HttpStageClient::new(format!("{base}/story"), "unused", "unused", Duration::from_secs(5));

        let err = client.generate(Stage::Story, &request()).await.unwrap_err();
        assert!(matches!(err, StageError::Status { status: 503, ref message, .. } if message == "gpu busy"));
    }

    #[tokio::test]
    async fn missing_input_fails_before_any_request() {
        let client = HttpStageClient::new("http://127.0.0.1:9", "http://127.0.0.1:9", "http://127.0.0.1:9", Duration::from_secs(1));
        let bare = StageRequest::new(TaskId::from("m8"), TaskInput::new("P", "G", 1));
        let err = client.generate(Stage::Images, &bare).await.unwrap_err();
        assert!(matches!(err, StageError::MissingInput { .. }));
    }
}
