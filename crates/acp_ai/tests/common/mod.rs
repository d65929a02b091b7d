#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use acp_ai::embeddings::EmbeddingBackend;
use acp_ai::llm::Llm;
use acp_core::config::PipelineConfig;
use acp_core::domain::{ChunkMeta, IndexEntry, SourceType, Span};
use acp_core::error::{AppError, EMBEDDING_UNAVAILABLE, GENERATION_UNAVAILABLE};

pub const DIMS: usize = 4;

/// Counts of 'a', 'b', 'c' plus a constant bias so no text maps to the zero vector.
pub fn letter_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32, 0.0, 0.0, 1.0];
    for ch in text.chars() {
        match ch {
            'a' => v[0] += 1.0,
            'b' => v[1] += 1.0,
            'c' => v[2] += 1.0,
            _ => {}
        }
    }
    v
}

/// Deterministic embedder that records every call. Items containing `poison` fail per item;
/// the first `fail_calls` whole calls fail with a retryable error.
#[derive(Default)]
pub struct LetterEmbedder {
    pub calls: AtomicUsize,
    pub texts_embedded: AtomicUsize,
    pub fail_calls: AtomicUsize,
    pub poison: Option<String>,
    pub dims: Option<usize>,
}

impl LetterEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(n: usize) -> Self {
        let e = Self::default();
        e.fail_calls.store(n, Ordering::SeqCst);
        e
    }

    pub fn with_poison(word: &str) -> Self {
        Self {
            poison: Some(word.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }
}

impl EmbeddingBackend for LetterEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Result<Vec<f32>, AppError>>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_calls.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_calls.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::new(EMBEDDING_UNAVAILABLE, "mock outage").with_retryable(true));
        }
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| match self.poison.as_deref() {
                Some(p) if t.contains(p) => {
                    Err(AppError::new(EMBEDDING_UNAVAILABLE, "mock poison item"))
                }
                _ => {
                    let mut v = letter_vector(t);
                    if let Some(d) = self.dims {
                        v.resize(d, 0.0);
                    }
                    Ok(v)
                }
            })
            .collect())
    }
}

/// Generator that replays scripted outcomes, then repeats the last one.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<String, AppError>>>,
    last: Mutex<Option<Result<String, AppError>>>,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<String, AppError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn answering(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    pub fn unavailable() -> Self {
        Self::new(vec![Err(AppError::new(GENERATION_UNAVAILABLE, "mock outage")
            .with_retryable(true))])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

impl Llm for ScriptedLlm {
    fn generate(&self, prompt: &str, _max_output_tokens: u32) -> Result<String, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(n) = next {
            *last = Some(n);
        }
        last.clone()
            .unwrap_or_else(|| Err(AppError::new(GENERATION_UNAVAILABLE, "empty script")))
    }
}

/// Small chunks, fast retries, 4-dimensional embeddings.
pub fn test_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.chunking.max_size = 200;
    cfg.chunking.min_size = 100;
    cfg.chunking.overlap = 20;
    cfg.embedding.dimension = DIMS;
    cfg.embedding.batch_size = 2;
    cfg.embedding.max_concurrent_batches = 2;
    cfg.retry.max_attempts = 3;
    cfg.retry.base_delay_ms = 1;
    cfg.retry.max_delay_ms = 2;
    cfg.retry.max_total_wait_ms = 50;
    cfg
}

pub fn entry(chunk_id: &str, document_id: &str, vector: Vec<f32>, span: (usize, usize)) -> IndexEntry {
    IndexEntry {
        chunk_id: chunk_id.to_string(),
        vector,
        meta: ChunkMeta {
            document_id: document_id.to_string(),
            span: Span::new(span.0, span.1),
            sequence_index: 0,
            source_type: SourceType::Webpage,
            title: None,
            url: None,
        },
        text: format!("text of {chunk_id}"),
    }
}
