use std::time::Duration;

use acp_core::error::{AppError, GENERATION_UNAVAILABLE};
use serde::{Deserialize, Serialize};

use super::Llm;
use crate::ollama::{map_ureq_error, OllamaClient};

#[derive(Debug, Clone)]
pub struct OllamaLlm {
    client: OllamaClient,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl OllamaLlm {
    pub fn new(client: OllamaClient, model: &str, timeout: Duration) -> Self {
        Self {
            client,
            model: model.to_string(),
            temperature: 0.3,
            timeout,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl Llm for OllamaLlm {
    fn generate(&self, prompt: &str, max_output_tokens: u32) -> Result<String, AppError> {
        let url = format!("{}/api/generate", self.client.base_url());
        let req = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: max_output_tokens,
                temperature: self.temperature,
            },
        };
        let body = serde_json::to_value(req).map_err(|e| {
            AppError::new(GENERATION_UNAVAILABLE, "Failed to encode generate request")
                .with_details(e.to_string())
        })?;

        let resp = ureq::post(&url)
            .timeout(self.timeout)
            .send_json(body)
            .map_err(|e| map_ureq_error(GENERATION_UNAVAILABLE, "Failed to call generate endpoint", e))?;

        let v: GenerateResponse = resp.into_json().map_err(|e| {
            AppError::new(GENERATION_UNAVAILABLE, "Failed to decode generate response")
                .with_details(e.to_string())
                .with_retryable(true)
        })?;
        if v.response.trim().is_empty() {
            return Err(
                AppError::new(GENERATION_UNAVAILABLE, "Generate response was empty")
                    .with_retryable(true),
            );
        }
        Ok(v.response)
    }
}
