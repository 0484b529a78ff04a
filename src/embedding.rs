//! Cohere-backed text embedding client.
//!
//! This is the outbound collaborator behind the embeddings endpoint: a
//! thin blocking HTTP client for Cohere's v2 embed API with bounded retry.
//! It is not part of the indexing core; callers store the returned vectors
//! as chunk embeddings themselves.

use std::thread;
use std::time::Duration;

use log::{error, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::{QuiverError, Result};

const EMBED_URL: &str = "https://api.cohere.com/v2/embed";
const EMBED_MODEL: &str = "embed-v4.0";
const MAX_TEXT_LENGTH: usize = 10_000;

/// Retry schedule: 3 attempts, base 0.5 s, doubling, jitter +/-20%.
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const RETRY_BACKOFF: f64 = 2.0;
const RETRY_JITTER: f64 = 0.2;

/// Request body for the Cohere v2 embed API.
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: Vec<&'a str>,
    input_type: &'a str,
    embedding_types: Vec<&'a str>,
}

/// Response body from the Cohere v2 embed API.
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: EmbedVectors,
}

#[derive(Debug, Deserialize)]
struct EmbedVectors {
    float: Vec<Vec<f32>>,
}

/// Blocking Cohere embedding client with bounded retry.
pub struct EmbeddingClient {
    client: reqwest::blocking::Client,
    api_key: String,
}

impl std::fmt::Debug for EmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingClient")
            .field("model", &EMBED_MODEL)
            .finish_non_exhaustive()
    }
}

impl EmbeddingClient {
    /// Create a client from settings.
    ///
    /// Fails with `EmbeddingUnavailable` when no API key is configured, so
    /// the routing layer can answer 503 without a network round trip.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings
            .cohere_api_key
            .clone()
            .ok_or_else(|| QuiverError::embedding_unavailable("no Cohere API key configured"))?;
        Ok(Self {
            client: reqwest::blocking::Client::new(),
            api_key,
        })
    }

    /// Embed a single text.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text])?;
        vectors
            .pop()
            .ok_or_else(|| QuiverError::embedding_unavailable("empty embedding response"))
    }

    /// Embed a batch of texts in one request.
    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            if text.is_empty() || text.len() > MAX_TEXT_LENGTH {
                return Err(QuiverError::invalid_argument(format!(
                    "text length must be in 1..={MAX_TEXT_LENGTH}"
                )));
            }
        }

        let request = EmbedRequest {
            model: EMBED_MODEL,
            texts: texts.to_vec(),
            input_type: "search_document",
            embedding_types: vec!["float"],
        };

        let response = self.post_with_retry(&request)?;
        if response.embeddings.float.len() != texts.len() {
            return Err(QuiverError::embedding_unavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.embeddings.float.len()
            )));
        }
        Ok(response.embeddings.float)
    }

    /// POST with exponential backoff. Transport errors and 5xx responses
    /// are retried; 4xx responses fail immediately.
    fn post_with_retry(&self, request: &EmbedRequest<'_>) -> Result<EmbedResponse> {
        let mut rng = rand::rng();
        let mut last_error = String::new();

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                thread::sleep(retry_delay(attempt, rng.random_range(-RETRY_JITTER..=RETRY_JITTER)));
            }

            let result = self
                .client
                .post(EMBED_URL)
                .bearer_auth(&self.api_key)
                .json(request)
                .send();

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<EmbedResponse>().map_err(|e| {
                            QuiverError::embedding_unavailable(format!(
                                "invalid response from embedding service: {e}"
                            ))
                        });
                    }
                    let body = response.text().unwrap_or_default();
                    if status.is_client_error() {
                        // Not retryable.
                        error!("embedding request rejected ({status}): {body}");
                        return Err(QuiverError::embedding_unavailable(format!(
                            "upstream rejected request ({status})"
                        )));
                    }
                    last_error = format!("server error {status}");
                }
                Err(e) => {
                    last_error = format!("request error: {e}");
                }
            }
            warn!(
                "embedding attempt {}/{MAX_ATTEMPTS} failed: {last_error}",
                attempt + 1
            );
        }

        error!("all embedding attempts failed: {last_error}");
        Err(QuiverError::embedding_unavailable(format!(
            "upstream unavailable after {MAX_ATTEMPTS} attempts: {last_error}"
        )))
    }
}

/// Delay before the given (1-based) retry attempt, with jitter applied.
fn retry_delay(attempt: u32, jitter: f64) -> Duration {
    let base = RETRY_BASE_DELAY.as_secs_f64() * RETRY_BACKOFF.powi(attempt as i32 - 1);
    Duration::from_secs_f64(base * (1.0 + jitter))
}
