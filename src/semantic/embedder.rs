//! Embedding provider adapter.
//!
//! Turns text into fixed-dimension vectors through an OpenAI-compatible
//! embeddings endpoint. Input is truncated to the provider's budget before
//! the call, preferring a sentence boundary near the edge of the window.
//! Every failure mode surfaces as an [`EmbeddingError`]; callers treat a
//! failed item as failed-not-fatal.

use std::{thread::sleep, time::Duration};

use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("provider setup failed: {0}")]
    InitFailed(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("provider returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Anything that can turn text into a vector of a fixed dimensionality.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    fn dimensions(&self) -> usize;
    /// Identifier of the model behind this provider; a change invalidates
    /// the persisted index.
    fn model_id(&self) -> &str;
}

/// Truncate text to fit the provider's input budget.
///
/// Cuts at `max_chars` characters. If a sentence-terminating period falls
/// within the last 20% of the truncated window, the cut lands immediately
/// after that period instead of at the hard boundary.
pub fn truncate_for_embedding(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let truncated: String = text.chars().take(max_chars).collect();

    let mut last_period: Option<(usize, usize)> = None; // (char index, byte end)
    for (char_idx, (byte_idx, ch)) in truncated.char_indices().enumerate() {
        if ch == '.' {
            last_period = Some((char_idx, byte_idx + ch.len_utf8()));
        }
    }

    if let Some((char_idx, byte_end)) = last_period {
        // only use the period if it's not too far back
        if char_idx * 5 > max_chars * 4 {
            return truncated[..byte_end].to_string();
        }
    }

    truncated
}

/// Blocking embeddings client for OpenAI-compatible endpoints.
pub struct OpenAiEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    max_input_chars: usize,
    max_retries: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            EmbeddingError::InitFailed(format!("{} is not set", config.api_key_env))
        })?;

        if api_key.trim().is_empty() {
            return Err(EmbeddingError::InitFailed(format!(
                "{} is empty",
                config.api_key_env
            )));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| EmbeddingError::InitFailed("invalid API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let endpoint = format!("{}/embeddings", config.endpoint.trim_end_matches('/'));

        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            dimensions: config.dimensions,
            max_input_chars: config.max_input_chars,
            max_retries: config.max_retries.max(1),
        })
    }

    fn retry_backoff(attempt: usize) -> Duration {
        let jitter = rand::random::<u64>() % 500;
        Duration::from_millis(1000 * 2u64.pow(attempt.min(5) as u32 - 1) + jitter)
    }

    fn request_once(&self, input: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input,
            dimensions: self.dimensions,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    EmbeddingError::Timeout(err.to_string())
                } else {
                    EmbeddingError::Http {
                        status: 0,
                        body: err.to_string(),
                    }
                }
            })?;

        let status = resp.status();

        if status.is_success() {
            let parsed: EmbeddingResponse = resp
                .json()
                .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;

            let mut data = parsed.data;
            data.sort_by_key(|entry| entry.index);
            let embedding = data
                .into_iter()
                .next()
                .map(|entry| entry.embedding)
                .ok_or_else(|| EmbeddingError::Malformed("no embedding returned".to_string()))?;

            if embedding.len() != self.dimensions {
                return Err(EmbeddingError::Malformed(format!(
                    "expected {} dimensions, got {}",
                    self.dimensions,
                    embedding.len()
                )));
            }

            return Ok(embedding);
        }

        let body = resp
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(EmbeddingError::Auth(body)),
            StatusCode::TOO_MANY_REQUESTS => Err(EmbeddingError::Quota(body)),
            _ => Err(EmbeddingError::Http {
                status: status.as_u16(),
                body,
            }),
        }
    }

    fn should_retry(err: &EmbeddingError) -> bool {
        match err {
            EmbeddingError::Timeout(_) | EmbeddingError::Quota(_) => true,
            EmbeddingError::Http { status, .. } => *status == 0 || *status >= 500,
            _ => false,
        }
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let input = truncate_for_embedding(text, self.max_input_chars);
        if input.len() < text.len() {
            log::info!(
                "truncated embedding input from {} to {} characters",
                text.len(),
                input.len()
            );
        }

        let mut attempt = 0usize;
        loop {
            match self.request_once(&input) {
                Ok(embedding) => return Ok(embedding),
                Err(err) => {
                    if Self::should_retry(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        log::debug!("embedding request failed ({err}), retry {attempt}");
                        sleep(Self::retry_backoff(attempt));
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
