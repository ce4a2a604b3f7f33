//! Error types for stage generation calls.

use thiserror::Error;

use crate::models::Stage;

/// A failed generation call. The message is what ends up in the task
/// record's `errors.<stage>`.
#[derive(Error, Debug)]
pub enum StageError {
    /// The request lacks a prior stage's output (or a field of it).
    #[error("{stage} request is missing {field}")]
    MissingInput { stage: Stage, field: &'static str },

    /// The call did not produce a response.
    #[error("{stage} request failed: {source}")]
    Request {
        stage: Stage,
        #[source]
        source: reqwest::Error,
    },

    /// The API answered with a non-success status.
    #[error("{stage} API returned {status}: {message}")]
    Status {
        stage: Stage,
        status: u16,
        message: String,
    },

    /// The response body was not the expected JSON.
    #[error("{stage} API returned an invalid response: {message}")]
    InvalidResponse { stage: Stage, message: String },

    /// Generator-reported failure.
    #[error("{0}")]
    Failed(String),
}

impl StageError {
    pub fn missing_input(stage: Stage, field: &'static str) -> Self {
        Self::MissingInput { stage, field }
    }

    pub fn invalid_response(stage: Stage, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            stage,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Result type for stage calls.
pub type StageResult<T> = Result<T, StageError>;
