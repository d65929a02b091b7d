use std::collections::BTreeSet;
use std::sync::Arc;

use acp_core::cancel::CancelToken;
use acp_core::config::PipelineConfig;
use acp_core::domain::{
    document_id_for, Answer, Document, DocumentRecord, IndexEntry, IngestionStatus, QueryResult,
    SourceType,
};
use acp_core::error::{AppError, DOCUMENT_INVALID, DOCUMENT_NOT_FOUND};
use acp_core::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chunking::Chunker;
use crate::embeddings::ollama_embed::OllamaEmbedder;
use crate::embeddings::{Embedder, EmbeddingBackend};
use crate::index::{IndexStats, VectorIndex};
use crate::ingest::{DocumentRegistry, IngestionOrchestrator};
use crate::llm::ollama_llm::OllamaLlm;
use crate::llm::Llm;
use crate::ollama::OllamaClient;
use crate::retrieve::{RetrieveRequest, Retriever};
use crate::synthesize::Synthesizer;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Derived from `url`, or from the text itself, when absent.
    #[serde(default)]
    pub document_id: Option<String>,
    pub source_type: SourceType,
    pub text: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Per-document chunker overrides; the configured values apply when absent.
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub chunk_overlap: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestResponse {
    pub document_id: String,
    pub status: IngestionStatus,
    pub chunk_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Restrict retrieval to these documents; all documents when absent.
    #[serde(default)]
    pub document_scope: Option<Vec<String>>,
    pub question: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default = "default_dedup")]
    pub dedup: bool,
}

fn default_dedup() -> bool {
    true
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            document_scope: None,
            question: question.into(),
            k: None,
            dedup: default_dedup(),
        }
    }
}

/// Caller-facing entry point: ingestion, question answering and document management over one
/// shared index. Safe to share across threads behind an `Arc`.
pub struct QaService {
    cfg: PipelineConfig,
    chunker: Chunker,
    index: VectorIndex,
    registry: DocumentRegistry,
    embedding: Arc<dyn EmbeddingBackend>,
    llm: Arc<dyn Llm>,
    ollama: Option<OllamaClient>,
    retry: RetryPolicy,
}

impl QaService {
    pub fn new(
        cfg: PipelineConfig,
        embedding: Arc<dyn EmbeddingBackend>,
        llm: Arc<dyn Llm>,
    ) -> Result<Self, AppError> {
        cfg.validate()?;
        let chunker = Chunker::from_config(&cfg.chunking)?;
        let index = match cfg.index.path.clone() {
            Some(path) => VectorIndex::open(path, cfg.embedding.dimension)?,
            None => VectorIndex::in_memory(cfg.embedding.dimension)?,
        };
        let retry = RetryPolicy::from_config(&cfg.retry);
        info!(
            dimension = cfg.embedding.dimension,
            entries = index.len(),
            persistent = index.path().is_some(),
            "qa service ready"
        );
        Ok(Self {
            cfg,
            chunker,
            index,
            registry: DocumentRegistry::new(),
            embedding,
            llm,
            ollama: None,
            retry,
        })
    }

    /// Service backed by a local Ollama server for both embeddings and generation.
    pub fn with_ollama(cfg: PipelineConfig) -> Result<Self, AppError> {
        let client = OllamaClient::new(&cfg.ollama.base_url)?;
        let embedding = Arc::new(OllamaEmbedder::new(
            client.clone(),
            &cfg.embedding.model,
            cfg.embedding.timeout(),
        ));
        let llm = Arc::new(
            OllamaLlm::new(client.clone(), &cfg.synthesis.model, cfg.synthesis.timeout())
                .with_temperature(cfg.synthesis.temperature),
        );
        let mut svc = Self::new(cfg, embedding, llm)?;
        svc.ollama = Some(client);
        Ok(svc)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn health_check(&self) -> Result<(), AppError> {
        match self.ollama.as_ref() {
            Some(client) => client.health_check(),
            None => Ok(()),
        }
    }

    pub fn ingest(&self, req: IngestRequest) -> Result<IngestResponse, AppError> {
        let document_id = resolve_document_id(&req)?;
        let chunker = self.chunker_for(&req)?;
        let doc = Document {
            document_id,
            source_type: req.source_type,
            text: req.text,
            title: req.title,
            url: req.url,
        };
        let embedder = self.embedder()?;
        let outcome =
            IngestionOrchestrator::new(&chunker, &embedder, &self.index, &self.registry).ingest(&doc)?;
        Ok(IngestResponse {
            document_id: outcome.document_id,
            status: outcome.status,
            chunk_count: outcome.chunk_count,
        })
    }

    pub fn ingestion_status(&self, document_id: &str) -> Result<IngestionStatus, AppError> {
        let embedder = self.embedder()?;
        self.orchestrator(&embedder).status(document_id)
    }

    /// Ranked, deduplicated chunks for a question without generating an answer.
    pub fn retrieve(
        &self,
        req: &QueryRequest,
        cancel: Option<&CancelToken>,
    ) -> Result<QueryResult, AppError> {
        let embedder = self.embedder()?;
        let scope: Option<BTreeSet<String>> =
            req.document_scope.as_ref().map(|ids| ids.iter().cloned().collect());
        Retriever::new(&embedder, &self.index, &self.cfg.retrieval).retrieve(
            RetrieveRequest {
                query: &req.question,
                k: req.k,
                dedup: req.dedup,
                scope: scope.as_ref(),
            },
            cancel,
        )
    }

    pub fn query(&self, req: QueryRequest, cancel: Option<&CancelToken>) -> Result<Answer, AppError> {
        let result = self.retrieve(&req, cancel)?;
        let answer = self.synthesizer().synthesize(&req.question, &result.hits, cancel)?;
        info!(
            hits = result.len(),
            citations = answer.citations.len(),
            grounded = answer.grounded,
            "query answered"
        );
        Ok(answer)
    }

    pub fn meeting_minutes(
        &self,
        document_id: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<Answer, AppError> {
        let entries = self.indexed_entries(document_id)?;
        self.synthesizer().meeting_minutes(&entries, cancel)
    }

    pub fn summarize(
        &self,
        document_id: &str,
        max_words: Option<u32>,
        cancel: Option<&CancelToken>,
    ) -> Result<Answer, AppError> {
        let entries = self.indexed_entries(document_id)?;
        self.synthesizer().summarize(&entries, max_words, cancel)
    }

    pub fn list_documents(&self) -> Result<Vec<DocumentRecord>, AppError> {
        let embedder = self.embedder()?;
        Ok(self.orchestrator(&embedder).list_documents())
    }

    pub fn document(&self, document_id: &str) -> Result<DocumentRecord, AppError> {
        let embedder = self.embedder()?;
        self.orchestrator(&embedder).document(document_id)
    }

    pub fn delete_document(&self, document_id: &str) -> Result<usize, AppError> {
        let embedder = self.embedder()?;
        self.orchestrator(&embedder).delete(document_id)
    }

    pub fn index_stats(&self) -> IndexStats {
        self.index.stats()
    }

    fn embedder(&self) -> Result<Embedder<'_>, AppError> {
        Embedder::new(self.embedding.as_ref(), &self.cfg.embedding, self.retry.clone())
    }

    fn synthesizer(&self) -> Synthesizer<'_> {
        Synthesizer::new(self.llm.as_ref(), &self.cfg.synthesis, self.retry.clone())
    }

    fn orchestrator<'a>(&'a self, embedder: &'a Embedder<'a>) -> IngestionOrchestrator<'a> {
        IngestionOrchestrator::new(&self.chunker, embedder, &self.index, &self.registry)
    }

    fn chunker_for(&self, req: &IngestRequest) -> Result<Chunker, AppError> {
        if req.chunk_size.is_none() && req.chunk_overlap.is_none() {
            return Ok(self.chunker);
        }
        let max_size = req.chunk_size.unwrap_or(self.chunker.max_size());
        let overlap = req.chunk_overlap.unwrap_or(self.chunker.overlap());
        Chunker::new(max_size, self.chunker.min_size().min(max_size), overlap)
    }

    fn indexed_entries(&self, document_id: &str) -> Result<Vec<IndexEntry>, AppError> {
        let entries = self.index.document_entries(document_id);
        if entries.is_empty() {
            return Err(AppError::new(DOCUMENT_NOT_FOUND, "Document has no indexed content")
                .with_details(format!("document_id={document_id}")));
        }
        Ok(entries)
    }
}

fn resolve_document_id(req: &IngestRequest) -> Result<String, AppError> {
    if let Some(id) = req.document_id.as_deref() {
        let id = id.trim();
        if id.is_empty() {
            return Err(AppError::new(DOCUMENT_INVALID, "document_id must not be empty"));
        }
        return Ok(id.to_string());
    }
    match req.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => Ok(document_id_for(url)),
        _ => Ok(document_id_for(&req.text)),
    }
}
