use std::time::Duration;

use acp_core::error::{AppError, EMBEDDING_UNAVAILABLE};
use serde::{Deserialize, Serialize};

use super::EmbeddingBackend;
use crate::ollama::{map_ureq_error, OllamaClient};

// Chunking keeps inputs far below this; guard anyway so one oversized query cannot stall a batch.
const MAX_INPUT_CHARS: usize = 12_000;

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
    timeout: Duration,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, model: &str, timeout: Duration) -> Self {
        Self {
            client,
            model: model.to_string(),
            timeout,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl EmbeddingBackend for OllamaEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Result<Vec<f32>, AppError>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let input = texts.iter().map(|t| clip(t)).collect::<Vec<_>>();
        let url = format!("{}/api/embed", self.client.base_url());
        let req = EmbedRequest {
            model: &self.model,
            input,
        };
        let body = serde_json::to_value(req).map_err(|e| {
            AppError::new(EMBEDDING_UNAVAILABLE, "Failed to encode embeddings request")
                .with_details(e.to_string())
        })?;

        let resp = ureq::post(&url)
            .timeout(self.timeout)
            .send_json(body)
            .map_err(|e| {
                map_ureq_error(EMBEDDING_UNAVAILABLE, "Failed to call embeddings endpoint", e)
            })?;

        let parsed: EmbedResponse = resp.into_json().map_err(|e| {
            AppError::new(EMBEDDING_UNAVAILABLE, "Failed to decode embeddings response")
                .with_details(e.to_string())
                .with_retryable(true)
        })?;

        // Ollama reports no per-item errors; an empty vector marks the item as failed.
        Ok(parsed
            .embeddings
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                if v.is_empty() {
                    Err(AppError::new(EMBEDDING_UNAVAILABLE, "Embedding vector was empty")
                        .with_details(format!("item={i}"))
                        .with_retryable(true))
                } else {
                    Ok(v)
                }
            })
            .collect())
    }
}

fn clip(input: &str) -> &str {
    match input.char_indices().nth(MAX_INPUT_CHARS) {
        Some((byte, _)) => &input[..byte],
        None => input,
    }
}
