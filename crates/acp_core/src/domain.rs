use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Webpage,
    Transcript,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Webpage => "webpage",
            SourceType::Transcript => "transcript",
        }
    }
}

/// Per-document ingestion state. Transitions only move forward:
/// `pending -> chunking -> embedding -> indexed`, or to `failed` from any in-flight state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Pending,
    Chunking,
    Embedding,
    Indexed,
    Failed,
}

impl IngestionStatus {
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            IngestionStatus::Pending | IngestionStatus::Chunking | IngestionStatus::Embedding
        )
    }

    pub fn can_advance_to(&self, next: IngestionStatus) -> bool {
        use IngestionStatus::*;
        matches!(
            (self, next),
            (Pending, Chunking)
                | (Chunking, Embedding)
                | (Embedding, Indexed)
                | (Pending, Failed)
                | (Chunking, Failed)
                | (Embedding, Failed)
        )
    }
}

/// Half-open character range `[start, end)` measured in Unicode scalar values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlap_len(&self, other: &Span) -> usize {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        end.saturating_sub(start)
    }

    /// Overlap as a fraction of the shorter span. Two empty spans never overlap.
    pub fn overlap_fraction(&self, other: &Span) -> f32 {
        let shorter = self.len().min(other.len());
        if shorter == 0 {
            return 0.0;
        }
        self.overlap_len(other) as f32 / shorter as f32
    }
}

/// A document submitted for ingestion. Only lives for the duration of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub document_id: String,
    pub source_type: SourceType,
    pub text: String,
    pub title: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub sequence_index: u32,
    pub span: Span,
    pub text: String,
    pub text_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMeta {
    pub document_id: String,
    pub span: Span,
    pub sequence_index: u32,
    pub source_type: SourceType,
    /// Document title and URL, copied onto every chunk so they survive a restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub meta: ChunkMeta,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryHit {
    pub chunk_id: String,
    pub score: f32,
    pub text: String,
    pub meta: ChunkMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub hits: Vec<QueryHit>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<String>,
    /// False for the explicit "insufficient context" answer produced without calling the model.
    pub grounded: bool,
}

/// What the orchestrator remembers about a document after its text has been dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentRecord {
    pub document_id: String,
    pub source_type: SourceType,
    pub title: Option<String>,
    pub url: Option<String>,
    pub content_sha256: String,
    pub char_count: usize,
    pub chunk_count: u32,
    /// Chunker settings of the last run; unknown for documents recovered from the index alone.
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub chunk_overlap: Option<usize>,
    pub status: IngestionStatus,
    pub submitted_at: String, // RFC3339
    pub ingested_at: Option<String>,
    pub last_error: Option<String>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Stable document id derived from a source reference (URL, file path, or the content itself).
pub fn document_id_for(source_ref: &str) -> String {
    sha256_hex(format!("doc|v1|{}", source_ref.trim()).as_bytes())
}

/// Content-derived chunk id: identical text at the same position of the same document
/// always maps to the same id, which lets re-ingestion reuse existing vectors.
pub fn chunk_id_for(document_id: &str, sequence_index: u32, text_sha256: &str) -> String {
    sha256_hex(format!("v1|{document_id}|{sequence_index}|{text_sha256}").as_bytes())
}
