//! The model-serving boundary.
//!
//! The extractor only needs "prompt in, continuation out". [`TextGenerator`]
//! captures that contract; [`TgiClient`] and [`OllamaClient`] speak to the two
//! serving stacks UniNER checkpoints are commonly deployed on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::GenerationError;

pub const DEFAULT_MAX_NEW_TOKENS: usize = 256;

/// One generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_new_tokens: usize,
    /// Echo the prompt before the continuation.
    pub return_full_text: bool,
    /// Cut the prompt to fit the model's context window.
    pub truncate: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            return_full_text: false,
            truncate: true,
        }
    }

    pub fn with_max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Check that the backend is reachable.
    async fn health(&self) -> Result<(), GenerationError> {
        Ok(())
    }
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        (**self).generate(request).await
    }

    async fn health(&self) -> Result<(), GenerationError> {
        (**self).health().await
    }
}

fn build_http_client(timeout: Duration) -> reqwest::Client {
    match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Failed to build HTTP client, falling back to defaults without a timeout");
            reqwest::Client::new()
        }
    }
}

async fn check_status(
    backend: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GenerationError::Status {
        backend,
        status: status.as_u16(),
        body,
    })
}

// ---------------------------------------------------------------------------
// text-generation-inference
// ---------------------------------------------------------------------------

/// Client for a Hugging Face text-generation-inference server.
#[derive(Clone)]
pub struct TgiClient {
    base_url: String,
    max_input_tokens: usize,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct TgiRequest<'a> {
    inputs: &'a str,
    parameters: TgiParameters,
}

#[derive(Serialize)]
struct TgiParameters {
    max_new_tokens: usize,
    return_full_text: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    truncate: Option<usize>,
}

#[derive(Deserialize)]
struct TgiGenerated {
    generated_text: String,
}

/// `/generate` answers with an object; the hosted inference API with a list.
#[derive(Deserialize)]
#[serde(untagged)]
enum TgiResponse {
    Single(TgiGenerated),
    Batch(Vec<TgiGenerated>),
}

impl TgiClient {
    pub fn new(base_url: impl Into<String>, max_input_tokens: usize, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_input_tokens,
            client: build_http_client(timeout),
        }
    }

    pub fn default() -> Self {
        Self::new("http://localhost:8080", 2048, Duration::from_secs(60))
    }
}

#[async_trait]
impl TextGenerator for TgiClient {
    fn name(&self) -> &'static str {
        "tgi"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!("{}/generate", self.base_url);
        let body = TgiRequest {
            inputs: &request.prompt,
            parameters: TgiParameters {
                max_new_tokens: request.max_new_tokens,
                return_full_text: request.return_full_text,
                truncate: request.truncate.then_some(self.max_input_tokens),
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| GenerationError::Transport { backend: "tgi", source })?;

        let response = check_status("tgi", response).await?;
        let parsed: TgiResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Decode {
                backend: "tgi",
                detail: e.to_string(),
            })?;

        match parsed {
            TgiResponse::Single(g) => Ok(g.generated_text),
            TgiResponse::Batch(batch) => batch
                .into_iter()
                .next()
                .map(|g| g.generated_text)
                .ok_or(GenerationError::Decode {
                    backend: "tgi",
                    detail: "empty generation list".into(),
                }),
        }
    }

    async fn health(&self) -> Result<(), GenerationError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|source| GenerationError::Transport { backend: "tgi", source })?;
        check_status("tgi", response).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    context_window: usize,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    /// The prompt is already templated.
    raw: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<usize>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        context_window: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            context_window,
            client: build_http_client(timeout),
        }
    }

    pub fn default() -> Self {
        Self::new(
            "http://localhost:11434",
            "uniner-7b-type",
            2048,
            Duration::from_secs(60),
        )
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaRequest {
            model: &self.model,
            prompt: &request.prompt,
            stream: false,
            raw: true,
            options: OllamaOptions {
                num_predict: request.max_new_tokens,
                num_ctx: request.truncate.then_some(self.context_window),
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| GenerationError::Transport { backend: "ollama", source })?;

        let response = check_status("ollama", response).await?;
        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Decode {
                backend: "ollama",
                detail: e.to_string(),
            })?;

        // Ollama never echoes the prompt.
        if request.return_full_text {
            Ok(format!("{}{}", request.prompt, parsed.response))
        } else {
            Ok(parsed.response)
        }
    }

    async fn health(&self) -> Result<(), GenerationError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|source| GenerationError::Transport { backend: "ollama", source })?;
        check_status("ollama", response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request = GenerationRequest::new("prompt");
        assert_eq!(request.max_new_tokens, 256);
        assert!(!request.return_full_text);
        assert!(request.truncate);
    }

    #[test]
    fn test_clients_build_with_timeout() {
        let tgi = TgiClient::new("http://gpu:8080/", 2048, Duration::from_secs(5));
        assert_eq!(tgi.base_url, "http://gpu:8080");
        let ollama = OllamaClient::new("http://gpu:11434/", "uniner", 4096, Duration::from_millis(1));
        assert_eq!(ollama.base_url, "http://gpu:11434");
    }

    #[test]
    fn test_tgi_wire_format() {
        let body = TgiRequest {
            inputs: "hi",
            parameters: TgiParameters {
                max_new_tokens: 256,
                return_full_text: false,
                truncate: Some(2048),
            },
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "inputs": "hi",
                "parameters": {"max_new_tokens": 256, "return_full_text": false, "truncate": 2048}
            })
        );
    }

    #[test]
    fn test_tgi_response_shapes() {
        let single: TgiResponse = serde_json::from_str(r#"{"generated_text": "[]"}"#).unwrap();
        assert!(matches!(single, TgiResponse::Single(g) if g.generated_text == "[]"));

        let batch: TgiResponse =
            serde_json::from_str(r#"[{"generated_text": "[\"Paris\"]"}]"#).unwrap();
        assert!(matches!(batch, TgiResponse::Batch(b) if b.len() == 1));
    }

    #[test]
    fn test_ollama_wire_format() {
        let body = OllamaRequest {
            model: "uniner",
            prompt: "p",
            stream: false,
            raw: true,
            options: OllamaOptions {
                num_predict: 64,
                num_ctx: None,
            },
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "model": "uniner",
                "prompt": "p",
                "stream": false,
                "raw": true,
                "options": {"num_predict": 64}
            })
        );
    }
}
