use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::StreamExt;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::error::InferenceError;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::InferenceConfig;
use crate::domain::ports::{InferenceClient, InferenceRequest, InferenceResponse, ModelResidency};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Client for an Ollama-compatible `/api/generate` endpoint.
///
/// One reqwest client is shared across calls for connection reuse.
/// Transient failures (connect errors, timeouts, 5xx, 429) are retried
/// with exponential backoff up to `max_retries` attempts in total.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: ReqwestClient,
    base_url: String,
    timeout_secs: u64,
    max_retries: u32,
    keep_alive: String,
    retry_interval: Duration,
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    model: String,
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Accumulated text of one generate call.
#[derive(Debug, Default)]
struct Generation {
    model: String,
    text: String,
    chunks: usize,
    done: bool,
}

impl Generation {
    fn absorb(&mut self, line: &[u8]) -> Result<(), InferenceError> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let chunk: GenerateChunk = serde_json::from_str(line)
            .map_err(|e| InferenceError::Malformed(format!("{e}: {}", preview(line))))?;
        if let Some(error) = chunk.error {
            return Err(InferenceError::Service(error));
        }
        if !chunk.model.is_empty() {
            self.model = chunk.model;
        }
        self.text.push_str(&chunk.response);
        self.done |= chunk.done;
        self.chunks += 1;
        Ok(())
    }
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

impl OllamaClient {
    pub fn new(config: &InferenceConfig) -> DomainResult<Self> {
        let http = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| DomainError::Inference(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries.max(1),
            keep_alive: config.keep_alive.clone(),
            retry_interval: Duration::from_millis(500),
        })
    }

    /// Override the first backoff interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send_once(&self, body: &GenerateBody<'_>) -> Result<Generation, InferenceError> {
        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| InferenceError::from_reqwest(e, &self.base_url, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status,
                body: preview(&body),
            });
        }

        // Streaming replies are NDJSON; a non-streaming reply is one object.
        let mut generation = Generation::default();
        let mut pending: Vec<u8> = Vec::new();
        let mut bytes = response.bytes_stream();
        while let Some(chunk) = bytes.next().await {
            let chunk =
                chunk.map_err(|e| InferenceError::from_reqwest(e, &self.base_url, self.timeout_secs))?;
            pending.extend_from_slice(&chunk);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                generation.absorb(&line)?;
            }
        }
        generation.absorb(&pending)?;

        if generation.chunks == 0 {
            return Err(InferenceError::Malformed("empty response body".to_string()));
        }
        if !generation.done {
            debug!(model = %generation.model, "response ended without a done marker");
        }
        Ok(generation)
    }

    async fn post_generate(&self, body: &GenerateBody<'_>) -> Result<Generation, InferenceError> {
        let max_attempts = self.max_retries;
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry_interval)
            .with_max_interval(MAX_RETRY_INTERVAL)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0u32;
        backoff::future::retry(policy, || {
            attempt += 1;
            let current = attempt;
            async move {
                match self.send_once(body).await {
                    Ok(generation) => Ok(generation),
                    Err(e) if e.is_transient() && current < max_attempts => {
                        warn!(
                            model = body.model,
                            attempt = current,
                            max_attempts,
                            error = %e,
                            "inference request failed, retrying"
                        );
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    #[instrument(skip(self, request), fields(model = %request.model, images = request.images.len()))]
    async fn generate(&self, request: InferenceRequest) -> DomainResult<InferenceResponse> {
        let body = GenerateBody {
            model: &request.model,
            prompt: &request.prompt,
            images: request.images.iter().map(|img| STANDARD.encode(img)).collect(),
            stream: request.stream,
            keep_alive: None,
        };

        let generation = self.post_generate(&body).await?;
        debug!(chars = generation.text.len(), "generation complete");

        Ok(InferenceResponse {
            model: if generation.model.is_empty() {
                request.model
            } else {
                generation.model
            },
            text: generation.text,
        })
    }
}

#[async_trait]
impl ModelResidency for OllamaClient {
    /// Load the model and keep it resident for the configured keep-alive.
    async fn warm(&self, model: &str) -> DomainResult<()> {
        let body = GenerateBody {
            model,
            prompt: "",
            images: Vec::new(),
            stream: false,
            keep_alive: Some(Value::String(self.keep_alive.clone())),
        };
        self.post_generate(&body).await?;
        info!(model, keep_alive = %self.keep_alive, "model warmed");
        Ok(())
    }

    async fn unload(&self, model: &str) -> DomainResult<()> {
        let body = GenerateBody {
            model,
            prompt: "",
            images: Vec::new(),
            stream: false,
            keep_alive: Some(Value::from(0)),
        };
        self.post_generate(&body).await?;
        info!(model, "model unloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_concatenates_chunks() {
        let mut generation = Generation::default();
        generation
            .absorb(br#"{"model":"m","response":"Hel","done":false}"#)
            .unwrap();
        generation
            .absorb(br#"{"model":"m","response":"lo","done":true}"#)
            .unwrap();
        generation.absorb(b"   \n").unwrap();
        assert_eq!(generation.text, "Hello");
        assert_eq!(generation.chunks, 2);
        assert!(generation.done);
    }

    #[test]
    fn test_absorb_surfaces_service_error() {
        let mut generation = Generation::default();
        let err = generation
            .absorb(br#"{"error":"model 'x' not found"}"#)
            .unwrap_err();
        assert!(matches!(err, InferenceError::Service(msg) if msg.contains("not found")));
    }

    #[test]
    fn test_body_omits_empty_fields() {
        let body = GenerateBody {
            model: "m",
            prompt: "p",
            images: Vec::new(),
            stream: false,
            keep_alive: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("images").is_none());
        assert!(json.get("keep_alive").is_none());
        assert_eq!(json["stream"], false);
    }
}
