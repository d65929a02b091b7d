use std::collections::{BTreeSet, HashMap};

use acp_core::domain::{
    sha256_hex, ChunkMeta, Document, DocumentRecord, IndexEntry, IngestionStatus,
};
use acp_core::error::{AppError, DOCUMENT_INVALID, DOCUMENT_NOT_FOUND, EMBEDDING_UNAVAILABLE};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::chunking::Chunker;
use crate::embeddings::Embedder;
use crate::index::VectorIndex;

mod registry;

pub use registry::DocumentRegistry;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestOutcome {
    pub document_id: String,
    pub status: IngestionStatus,
    pub chunk_count: u32,
    /// Chunks whose vectors were already indexed and were not embedded again.
    pub reused: u32,
    pub embedded: u32,
}

/// Drives one document through chunking, embedding and indexing.
pub struct IngestionOrchestrator<'a> {
    chunker: &'a Chunker,
    embedder: &'a Embedder<'a>,
    index: &'a VectorIndex,
    registry: &'a DocumentRegistry,
}

impl<'a> IngestionOrchestrator<'a> {
    pub fn new(
        chunker: &'a Chunker,
        embedder: &'a Embedder<'a>,
        index: &'a VectorIndex,
        registry: &'a DocumentRegistry,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
            registry,
        }
    }

    /// Ingest (or re-ingest) `doc`. On success every chunk is searchable; on failure the
    /// document's previously indexed chunks are left exactly as they were.
    pub fn ingest(&self, doc: &Document) -> Result<IngestOutcome, AppError> {
        if doc.document_id.trim().is_empty() {
            return Err(AppError::new(DOCUMENT_INVALID, "document_id must not be empty"));
        }
        let content_sha256 = sha256_hex(doc.text.as_bytes());
        let run = self.registry.begin(doc, &content_sha256, self.chunker)?;

        match self.run_stages(doc, &run) {
            Ok((chunk_count, reused, embedded)) => {
                let status = run
                    .finish(chunk_count)
                    .map(|r| r.status)
                    .unwrap_or(IngestionStatus::Indexed);
                info!(
                    document_id = %doc.document_id,
                    source_type = doc.source_type.as_str(),
                    chunks = chunk_count,
                    reused,
                    embedded,
                    "document indexed"
                );
                Ok(IngestOutcome {
                    document_id: doc.document_id.clone(),
                    status,
                    chunk_count,
                    reused,
                    embedded,
                })
            }
            Err(e) => {
                error!(document_id = %doc.document_id, error = %e, "ingestion failed");
                run.fail(&e);
                Err(e)
            }
        }
    }

    fn run_stages(
        &self,
        doc: &Document,
        run: &registry::InFlight<'_>,
    ) -> Result<(u32, u32, u32), AppError> {
        run.advance(IngestionStatus::Chunking);
        let chunks = self.chunker.chunk(&doc.document_id, &doc.text);
        if chunks.is_empty() {
            return Err(AppError::new(DOCUMENT_INVALID, "Document has no text content")
                .with_details(format!("document_id={}", doc.document_id)));
        }

        run.advance(IngestionStatus::Embedding);
        // Content-derived ids: an id already in the index carries the same text, so its
        // vector is still valid.
        let existing: HashMap<String, Vec<f32>> = self
            .index
            .document_entries(&doc.document_id)
            .into_iter()
            .map(|e| (e.chunk_id, e.vector))
            .collect();

        let missing: Vec<&str> = chunks
            .iter()
            .filter(|c| !existing.contains_key(&c.chunk_id))
            .map(|c| c.text.as_str())
            .collect();
        let embedded = missing.len() as u32;
        let mut fresh = self.embedder.embed_all(&missing)?.into_iter();

        let mut entries = Vec::with_capacity(chunks.len());
        for c in chunks {
            let vector = match existing.get(&c.chunk_id) {
                Some(v) => v.clone(),
                None => fresh.next().ok_or_else(|| {
                    AppError::new(EMBEDDING_UNAVAILABLE, "Embedding results ended early")
                })?,
            };
            entries.push(IndexEntry {
                chunk_id: c.chunk_id,
                vector,
                meta: ChunkMeta {
                    document_id: c.document_id,
                    span: c.span,
                    sequence_index: c.sequence_index,
                    source_type: doc.source_type,
                    title: doc.title.clone(),
                    url: doc.url.clone(),
                },
                text: c.text,
            });
        }

        let chunk_count = entries.len() as u32;
        self.index.replace_document(&doc.document_id, entries)?;
        Ok((chunk_count, chunk_count - embedded, embedded))
    }

    /// Current state of a document. Documents indexed before a restart have no registry
    /// record and report `indexed`.
    pub fn status(&self, document_id: &str) -> Result<IngestionStatus, AppError> {
        if let Some(r) = self.registry.get(document_id) {
            return Ok(r.status);
        }
        if self.index.contains_document(document_id) {
            return Ok(IngestionStatus::Indexed);
        }
        Err(not_found(document_id))
    }

    pub fn document(&self, document_id: &str) -> Result<DocumentRecord, AppError> {
        if let Some(r) = self.registry.get(document_id) {
            return Ok(r);
        }
        let entries = self.index.document_entries(document_id);
        if entries.is_empty() {
            return Err(not_found(document_id));
        }
        Ok(recovered_record(document_id, &entries))
    }

    /// Registry records first, then documents only the index knows about, by id.
    pub fn list_documents(&self) -> Vec<DocumentRecord> {
        let mut out = self.registry.list();
        let known: BTreeSet<String> = out.iter().map(|r| r.document_id.clone()).collect();
        for id in self.index.document_ids() {
            if known.contains(&id) {
                continue;
            }
            let entries = self.index.document_entries(&id);
            if !entries.is_empty() {
                out.push(recovered_record(&id, &entries));
            }
        }
        out
    }

    /// Drop a document from the index and the registry. Returns the number of removed chunks.
    ///
    /// The id stays claimed until the index write has landed, so a concurrent ingestion of
    /// the same document is refused rather than having its fresh chunks deleted.
    pub fn delete(&self, document_id: &str) -> Result<usize, AppError> {
        let claim = self.registry.begin_delete(document_id)?;
        let removed = self.index.delete(document_id)?;
        if !claim.had_record() && removed == 0 {
            return Err(not_found(document_id));
        }
        claim.commit();
        info!(document_id, removed, "document deleted");
        Ok(removed)
    }
}

// `entries` is non-empty and ordered by sequence index.
fn recovered_record(document_id: &str, entries: &[IndexEntry]) -> DocumentRecord {
    let first = &entries[0].meta;
    DocumentRecord {
        document_id: document_id.to_string(),
        source_type: first.source_type,
        title: first.title.clone(),
        url: first.url.clone(),
        content_sha256: String::new(),
        char_count: entries.iter().map(|e| e.meta.span.end).max().unwrap_or(0),
        chunk_count: entries.len() as u32,
        chunk_size: None,
        chunk_overlap: None,
        status: IngestionStatus::Indexed,
        submitted_at: String::new(),
        ingested_at: None,
        last_error: None,
    }
}

fn not_found(document_id: &str) -> AppError {
    AppError::new(DOCUMENT_NOT_FOUND, "Document not found")
        .with_details(format!("document_id={document_id}"))
}
