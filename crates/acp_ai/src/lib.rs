pub mod chunking;
pub mod citations;
pub mod embeddings;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod ollama;
pub mod retrieve;
pub mod service;
pub mod synthesize;

pub use service::{IngestRequest, IngestResponse, QaService, QueryRequest};

#[cfg(test)]
mod tests {
    use super::citations::{extract_cited_chunk_ids, marker};
    use super::index::VectorIndex;

    #[test]
    fn in_memory_index_rejects_zero_dimension() {
        let err = VectorIndex::in_memory(0).expect_err("zero dimension");
        assert_eq!(err.code, "INVALID_CONFIGURATION");
    }

    #[test]
    fn prompt_markers_parse_back() {
        let text = format!("claim {} and {}", marker("c1"), marker("c2"));
        assert_eq!(extract_cited_chunk_ids(&text), vec!["c1", "c2"]);
    }
}
