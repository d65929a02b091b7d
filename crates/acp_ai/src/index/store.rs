use std::collections::HashSet;
use std::fs;
use std::path::Path;

use acp_core::domain::{SourceType, Span};
use acp_core::error::{AppError, INDEX_CORRUPTION, INDEX_IO_FAILED};
use serde::{Deserialize, Serialize};

pub(crate) const FORMAT_VERSION: u32 = 1;

/// On-disk layout. Entries are written in insertion order so tie-breaking survives a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedIndex {
    pub format_version: u32,
    pub dimension: usize,
    pub entry_count: usize,
    pub entries: Vec<PersistedEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedEntry {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub document_id: String,
    pub span: Span,
    pub sequence_index: u32,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub text: String,
}

pub(crate) fn read(path: &Path) -> Result<Option<PersistedIndex>, AppError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path).map_err(|e| {
        AppError::new(INDEX_IO_FAILED, "Failed to read index file")
            .with_details(format!("path={}; err={}", path.display(), e))
    })?;
    let parsed: PersistedIndex = serde_json::from_slice(&bytes).map_err(|e| {
        AppError::new(INDEX_CORRUPTION, "Failed to decode index file")
            .with_details(format!("path={}; err={}", path.display(), e))
    })?;
    Ok(Some(parsed))
}

pub(crate) fn write(path: &Path, index: &PersistedIndex) -> Result<(), AppError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| {
            AppError::new(INDEX_IO_FAILED, "Failed to create index directory")
                .with_details(format!("path={}; err={}", dir.display(), e))
        })?;
    }
    let tmp = path.with_extension("tmp");
    let json = serde_json::to_vec(index).map_err(|e| {
        AppError::new(INDEX_IO_FAILED, "Failed to encode index").with_details(e.to_string())
    })?;
    fs::write(&tmp, &json).map_err(|e| {
        AppError::new(INDEX_IO_FAILED, "Failed to write index file")
            .with_details(format!("path={}; err={}", tmp.display(), e))
    })?;
    fs::rename(&tmp, path).map_err(|e| {
        AppError::new(INDEX_IO_FAILED, "Failed to finalize index write")
            .with_details(format!("tmp={}; dest={}; err={}", tmp.display(), path.display(), e))
    })?;
    Ok(())
}

/// Check the persisted invariants before the index is allowed to serve queries.
/// Never truncates or repairs: any violation refuses the whole file.
pub(crate) fn validate(index: &PersistedIndex, path: &Path) -> Result<(), AppError> {
    let corrupt = |what: String| {
        AppError::new(INDEX_CORRUPTION, "Persisted index failed validation")
            .with_details(format!("path={}; {what}", path.display()))
    };

    if index.format_version != FORMAT_VERSION {
        return Err(corrupt(format!(
            "unsupported format_version={}",
            index.format_version
        )));
    }
    if index.dimension == 0 {
        return Err(corrupt("dimension marker is 0".to_string()));
    }
    if index.entry_count != index.entries.len() {
        return Err(corrupt(format!(
            "entry_count={} but found {} entries",
            index.entry_count,
            index.entries.len()
        )));
    }

    let mut seen: HashSet<&str> = HashSet::with_capacity(index.entries.len());
    for e in index.entries.iter() {
        if e.vector.len() != index.dimension {
            return Err(corrupt(format!(
                "chunk_id={}; vector dims={} expected={}",
                e.chunk_id,
                e.vector.len(),
                index.dimension
            )));
        }
        if e.vector.iter().any(|x| !x.is_finite()) {
            return Err(corrupt(format!("chunk_id={}; non-finite vector value", e.chunk_id)));
        }
        if e.span.start > e.span.end {
            return Err(corrupt(format!("chunk_id={}; inverted span", e.chunk_id)));
        }
        if !seen.insert(e.chunk_id.as_str()) {
            return Err(corrupt(format!("duplicate chunk_id={}", e.chunk_id)));
        }
    }
    Ok(())
}
