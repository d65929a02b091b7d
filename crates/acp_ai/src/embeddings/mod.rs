use std::thread;

use acp_core::cancel::{check_cancelled, CancelToken};
use acp_core::config::EmbeddingConfig;
use acp_core::error::{AppError, EMBEDDING_UNAVAILABLE};
use acp_core::retry::RetryPolicy;
use tracing::{debug, warn};

pub mod ollama_embed;

/// External embedding capability.
///
/// The outer `Result` reports a failure of the whole call (transport, server error). The inner
/// results are per item and must line up with `texts`; one bad item never invalidates the rest.
pub trait EmbeddingBackend: Send + Sync {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Result<Vec<f32>, AppError>>, AppError>;
}

/// Batching, retrying front for an [`EmbeddingBackend`] that enforces a fixed dimension.
pub struct Embedder<'a> {
    backend: &'a dyn EmbeddingBackend,
    dimension: usize,
    batch_size: usize,
    max_concurrent_batches: usize,
    retry: RetryPolicy,
}

impl<'a> Embedder<'a> {
    pub fn new(
        backend: &'a dyn EmbeddingBackend,
        cfg: &EmbeddingConfig,
        retry: RetryPolicy,
    ) -> Result<Self, AppError> {
        if cfg.dimension == 0 {
            return Err(AppError::invalid_config("Embedding dimension must be greater than 0"));
        }
        if cfg.batch_size == 0 {
            return Err(AppError::invalid_config("Embedding batch_size must be greater than 0"));
        }
        Ok(Self {
            backend,
            dimension: cfg.dimension,
            batch_size: cfg.batch_size,
            max_concurrent_batches: cfg.max_concurrent_batches.max(1),
            retry,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn embed(&self, text: &str, cancel: Option<&CancelToken>) -> Result<Vec<f32>, AppError> {
        check_cancelled(cancel, "embed")?;
        self.embed_one_with_retry(text, cancel)
    }

    /// Embed every text, preserving input order. Batches fan out over scoped threads, at most
    /// `max_concurrent_batches` at a time.
    pub fn embed_all(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batches: Vec<&[&str]> = texts.chunks(self.batch_size).collect();
        let mut out: Vec<Vec<f32>> = Vec::with_capacity(texts.len());

        for wave in batches.chunks(self.max_concurrent_batches) {
            let results: Vec<Result<Vec<Vec<f32>>, AppError>> = if wave.len() == 1 {
                vec![self.embed_batch_isolated(wave[0])]
            } else {
                thread::scope(|s| {
                    let handles: Vec<_> = wave
                        .iter()
                        .map(|batch| s.spawn(move || self.embed_batch_isolated(batch)))
                        .collect();
                    handles
                        .into_iter()
                        .map(|h| {
                            h.join().unwrap_or_else(|_| {
                                Err(AppError::new(EMBEDDING_UNAVAILABLE, "Embedding worker panicked"))
                            })
                        })
                        .collect()
                })
            };
            for r in results {
                out.extend(r?);
            }
        }
        Ok(out)
    }

    fn embed_batch_isolated(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>, AppError> {
        debug!(batch_len = batch.len(), "embedding batch");
        let items = self
            .retry
            .run("embed_batch", None, |_| {
                let items = self.backend.embed_batch(batch)?;
                if items.len() != batch.len() {
                    return Err(AppError::new(
                        EMBEDDING_UNAVAILABLE,
                        "Embedding response count does not match request",
                    )
                    .with_details(format!("expected={}; got={}", batch.len(), items.len()))
                    .with_retryable(true));
                }
                Ok(items)
            })
            .map_err(unavailable)?;

        let mut out = Vec::with_capacity(batch.len());
        for (i, item) in items.into_iter().enumerate() {
            let vector = match item.and_then(non_empty) {
                Ok(v) => v,
                Err(e) => {
                    warn!(item = i, error = %e, "embedding item failed; retrying individually");
                    self.embed_one_with_retry(batch[i], None)?
                }
            };
            self.check_dimension(&vector)?;
            out.push(vector);
        }
        Ok(out)
    }

    fn embed_one_with_retry(
        &self,
        text: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<f32>, AppError> {
        let vector = self
            .retry
            .run("embed_one", cancel, |_| {
                let mut items = self.backend.embed_batch(&[text])?;
                match items.pop() {
                    Some(item) if items.is_empty() => item.and_then(non_empty),
                    _ => Err(AppError::new(
                        EMBEDDING_UNAVAILABLE,
                        "Embedding response count does not match request",
                    )
                    .with_retryable(true)),
                }
            })
            .map_err(unavailable)?;
        self.check_dimension(&vector)?;
        Ok(vector)
    }

    fn check_dimension(&self, v: &[f32]) -> Result<(), AppError> {
        if v.len() != self.dimension {
            return Err(AppError::invalid_config(
                "Embedding dimension does not match the configured index dimension",
            )
            .with_details(format!("expected={}; got={}", self.dimension, v.len())));
        }
        Ok(())
    }
}

fn non_empty(v: Vec<f32>) -> Result<Vec<f32>, AppError> {
    if v.is_empty() {
        return Err(AppError::new(EMBEDDING_UNAVAILABLE, "Embedding vector was empty")
            .with_retryable(true));
    }
    Ok(v)
}

fn unavailable(e: AppError) -> AppError {
    if e.is(EMBEDDING_UNAVAILABLE) || e.is(acp_core::error::QUERY_CANCELLED) {
        return e;
    }
    let retryable = e.retryable;
    AppError::new(EMBEDDING_UNAVAILABLE, "Embedding capability unavailable")
        .with_details(e.to_string())
        .with_retryable(retryable)
}
