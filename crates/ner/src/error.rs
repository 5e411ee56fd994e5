//! Error types for the NER crate.

use std::time::Duration;
use thiserror::Error;

/// Configuration and input errors. These are raised before any model call.
#[derive(Error, Debug)]
pub enum NerError {
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("input text is empty")]
    EmptyText,

    #[error("no entity types configured")]
    NoEntityTypes,

    #[error("unknown conversation template: {0}")]
    UnknownTemplate(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failures at the model-serving boundary.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("request to {backend} failed: {source}")]
    Transport {
        backend: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{backend} returned status {status}: {body}")]
    Status {
        backend: &'static str,
        status: u16,
        body: String,
    },

    #[error("{backend} returned an unexpected body: {detail}")]
    Decode {
        backend: &'static str,
        detail: String,
    },

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
}

impl GenerationError {
    /// Transport errors, timeouts and 5xx/429 responses are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Transport { .. } | GenerationError::Timeout(_) => true,
            GenerationError::Status { status, .. } => *status == 429 || *status >= 500,
            GenerationError::Decode { .. } => false,
        }
    }
}

/// Rejection of model output that is not a list of string literals.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed list literal at byte {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}
