use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_size: usize,
    pub min_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            min_size: 400,
            overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-minilm".to_string(),
            dimension: 384,
            batch_size: 16,
            max_concurrent_batches: 4,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    /// Index file location. `None` keeps the index in memory only.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
    pub max_k: usize,
    pub over_fetch_factor: usize,
    pub dedup_overlap_threshold: f32,
    pub min_score: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 3,
            max_k: 50,
            over_fetch_factor: 3,
            dedup_overlap_threshold: 0.5,
            min_score: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub model: String,
    pub max_context_tokens: usize,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub timeout_ms: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            model: "llama3.2:latest".to_string(),
            max_context_tokens: 3000,
            max_output_tokens: 1024,
            temperature: 0.3,
            timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_total_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 4_000,
            max_total_wait_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
        }
    }
}

/// Full pipeline configuration. Every section falls back to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub synthesis: SynthesisConfig,
    pub retry: RetryConfig,
    pub ollama: OllamaConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, AppError> {
        let cfg: PipelineConfig = toml::from_str(raw).map_err(|e| {
            AppError::invalid_config("Failed to parse pipeline configuration")
                .with_details(e.to_string())
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a TOML file, apply `ACP_*` environment overrides, then validate.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::invalid_config("Failed to read pipeline configuration")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        let mut cfg: PipelineConfig = toml::from_str(&raw).map_err(|e| {
            AppError::invalid_config("Failed to parse pipeline configuration")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        cfg.apply_env_overrides(|k| std::env::var(k).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ACP_OLLAMA_URL") {
            self.ollama.base_url = v;
        }
        if let Some(v) = lookup("ACP_EMBED_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = lookup("ACP_GENERATION_MODEL") {
            self.synthesis.model = v;
        }
        if let Some(v) = lookup("ACP_INDEX_PATH") {
            self.index.path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("ACP_EMBED_DIMENSION") {
            self.embedding.dimension = v.trim().parse().map_err(|_| {
                AppError::invalid_config("ACP_EMBED_DIMENSION must be a positive integer")
                    .with_details(format!("value={v}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let c = &self.chunking;
        if c.max_size == 0 {
            return Err(field_error("chunking.max_size", "must be greater than 0"));
        }
        if c.overlap >= c.max_size {
            return Err(field_error(
                "chunking.overlap",
                "must be strictly less than chunking.max_size",
            ));
        }
        if c.min_size > c.max_size {
            return Err(field_error(
                "chunking.min_size",
                "must not exceed chunking.max_size",
            ));
        }

        let e = &self.embedding;
        if e.model.trim().is_empty() {
            return Err(field_error("embedding.model", "must not be empty"));
        }
        if e.dimension == 0 {
            return Err(field_error("embedding.dimension", "must be greater than 0"));
        }
        if e.batch_size == 0 {
            return Err(field_error("embedding.batch_size", "must be greater than 0"));
        }
        if e.max_concurrent_batches == 0 {
            return Err(field_error(
                "embedding.max_concurrent_batches",
                "must be greater than 0",
            ));
        }

        let r = &self.retrieval;
        if r.default_k == 0 || r.default_k > r.max_k {
            return Err(field_error(
                "retrieval.default_k",
                "must be in [1, retrieval.max_k]",
            ));
        }
        if r.over_fetch_factor == 0 {
            return Err(field_error(
                "retrieval.over_fetch_factor",
                "must be greater than 0",
            ));
        }
        if !(0.0..=1.0).contains(&r.dedup_overlap_threshold) {
            return Err(field_error(
                "retrieval.dedup_overlap_threshold",
                "must be within [0.0, 1.0]",
            ));
        }

        let s = &self.synthesis;
        if s.model.trim().is_empty() {
            return Err(field_error("synthesis.model", "must not be empty"));
        }
        if s.max_context_tokens == 0 {
            return Err(field_error(
                "synthesis.max_context_tokens",
                "must be greater than 0",
            ));
        }
        if s.max_output_tokens == 0 {
            return Err(field_error(
                "synthesis.max_output_tokens",
                "must be greater than 0",
            ));
        }
        if !(0.0..=2.0).contains(&s.temperature) {
            return Err(field_error("synthesis.temperature", "must be within [0.0, 2.0]"));
        }

        if self.retry.max_attempts == 0 {
            return Err(field_error("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(field_error(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }

        if self.ollama.base_url.trim().is_empty() {
            return Err(field_error("ollama.base_url", "must not be empty"));
        }
        Ok(())
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn field_error(field: &str, problem: &str) -> AppError {
    AppError::invalid_config(format!("Invalid configuration: {field} {problem}"))
        .with_details(format!("field={field}"))
}
