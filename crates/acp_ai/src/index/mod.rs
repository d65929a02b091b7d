use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use acp_core::domain::{ChunkMeta, IndexEntry, QueryHit};
use acp_core::error::{AppError, DOCUMENT_INVALID, QUERY_INVALID};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

mod similarity;
mod store;

pub use similarity::{cosine_similarity, l2_norm};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStats {
    pub dimension: usize,
    pub entry_count: usize,
    pub document_count: usize,
}

#[derive(Debug)]
struct StoredEntry {
    entry: IndexEntry,
    norm: f32,
}

/// Immutable view of the index. Writers clone, modify and swap in a new one.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    // Keyed by insertion sequence; iteration order is the tie-break order.
    entries: BTreeMap<u64, Arc<StoredEntry>>,
    by_id: HashMap<String, u64>,
    next_seq: u64,
}

impl Snapshot {
    fn upsert(&mut self, entry: IndexEntry) {
        let stored = Arc::new(StoredEntry {
            norm: l2_norm(&entry.vector),
            entry,
        });
        match self.by_id.get(&stored.entry.chunk_id) {
            Some(&seq) => {
                self.entries.insert(seq, stored);
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.by_id.insert(stored.entry.chunk_id.clone(), seq);
                self.entries.insert(seq, stored);
            }
        }
    }

    fn remove_where<F>(&mut self, pred: F) -> usize
    where
        F: Fn(&IndexEntry) -> bool,
    {
        let doomed: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, s)| pred(&s.entry))
            .map(|(seq, _)| *seq)
            .collect();
        for seq in doomed.iter() {
            if let Some(s) = self.entries.remove(seq) {
                self.by_id.remove(&s.entry.chunk_id);
            }
        }
        doomed.len()
    }

    fn document_count(&self) -> usize {
        self.entries
            .values()
            .map(|s| s.entry.meta.document_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    fn to_persisted(&self, dimension: usize) -> store::PersistedIndex {
        let entries = self
            .entries
            .values()
            .map(|s| store::PersistedEntry {
                chunk_id: s.entry.chunk_id.clone(),
                vector: s.entry.vector.clone(),
                document_id: s.entry.meta.document_id.clone(),
                span: s.entry.meta.span,
                sequence_index: s.entry.meta.sequence_index,
                source_type: s.entry.meta.source_type,
                title: s.entry.meta.title.clone(),
                url: s.entry.meta.url.clone(),
                text: s.entry.text.clone(),
            })
            .collect::<Vec<_>>();
        store::PersistedIndex {
            format_version: store::FORMAT_VERSION,
            dimension,
            entry_count: entries.len(),
            entries,
        }
    }

    fn from_persisted(p: store::PersistedIndex) -> Self {
        let mut snap = Snapshot::default();
        for e in p.entries {
            snap.upsert(IndexEntry {
                chunk_id: e.chunk_id,
                vector: e.vector,
                meta: ChunkMeta {
                    document_id: e.document_id,
                    span: e.span,
                    sequence_index: e.sequence_index,
                    source_type: e.source_type,
                    title: e.title,
                    url: e.url,
                },
                text: e.text,
            });
        }
        snap
    }
}

/// Cosine-similarity vector index with copy-on-write snapshots.
///
/// Writes (`insert`, `delete`, `replace_document`) are serialized by a writer lock, build a new
/// snapshot, persist it (when file-backed) and only then publish it. Searches grab the current
/// snapshot and never block on a writer, so they see either the full old or the full new state.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    path: Option<PathBuf>,
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl VectorIndex {
    pub fn in_memory(dimension: usize) -> Result<Self, AppError> {
        check_dimension_config(dimension)?;
        Ok(Self {
            dimension,
            path: None,
            current: RwLock::new(Arc::new(Snapshot::default())),
            writer: Mutex::new(()),
        })
    }

    /// Open a file-backed index, loading and validating any existing file.
    pub fn open(path: PathBuf, dimension: usize) -> Result<Self, AppError> {
        check_dimension_config(dimension)?;
        let snapshot = match store::read(&path)? {
            Some(persisted) => {
                store::validate(&persisted, &path)?;
                if persisted.dimension != dimension {
                    return Err(AppError::invalid_config(
                        "Persisted index dimension does not match configured embedding dimension",
                    )
                    .with_details(format!(
                        "path={}; persisted={}; configured={}",
                        path.display(),
                        persisted.dimension,
                        dimension
                    )));
                }
                let snap = Snapshot::from_persisted(persisted);
                info!(
                    path = %path.display(),
                    entries = snap.entries.len(),
                    dimension,
                    "loaded vector index"
                );
                snap
            }
            None => Snapshot::default(),
        };
        Ok(Self {
            dimension,
            path: Some(path),
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.snapshot().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> IndexStats {
        let snap = self.snapshot();
        IndexStats {
            dimension: self.dimension,
            entry_count: snap.entries.len(),
            document_count: snap.document_count(),
        }
    }

    pub fn contains_document(&self, document_id: &str) -> bool {
        self.snapshot()
            .entries
            .values()
            .any(|s| s.entry.meta.document_id == document_id)
    }

    pub fn document_ids(&self) -> BTreeSet<String> {
        self.snapshot()
            .entries
            .values()
            .map(|s| s.entry.meta.document_id.clone())
            .collect()
    }

    /// Number of entries belonging to `scope`, or to the whole index when unscoped.
    pub fn count_in_scope(&self, scope: Option<&BTreeSet<String>>) -> usize {
        let snap = self.snapshot();
        match scope {
            None => snap.entries.len(),
            Some(ids) => snap
                .entries
                .values()
                .filter(|s| ids.contains(&s.entry.meta.document_id))
                .count(),
        }
    }

    /// A document's entries ordered by their position in the source text.
    pub fn document_entries(&self, document_id: &str) -> Vec<IndexEntry> {
        let mut out: Vec<IndexEntry> = self
            .snapshot()
            .entries
            .values()
            .filter(|s| s.entry.meta.document_id == document_id)
            .map(|s| s.entry.clone())
            .collect();
        out.sort_by_key(|e| e.meta.sequence_index);
        out
    }

    /// Insert or replace entries by chunk id. A replaced entry keeps its original position.
    pub fn insert(&self, entries: Vec<IndexEntry>) -> Result<(), AppError> {
        self.check_entries(&entries)?;
        let n = entries.len();
        self.commit(|snap| {
            for e in entries {
                snap.upsert(e);
            }
            Ok(())
        })?;
        debug!(entries = n, "index insert committed");
        Ok(())
    }

    /// Remove every chunk of `document_id`. Returns the number of removed entries.
    pub fn delete(&self, document_id: &str) -> Result<usize, AppError> {
        let removed = self.commit(|snap| Ok(snap.remove_where(|e| e.meta.document_id == document_id)))?;
        debug!(document_id, removed, "index delete committed");
        Ok(removed)
    }

    /// Swap a document's chunk set in a single write: chunks absent from `entries` disappear,
    /// chunks already present keep their position, new chunks are appended.
    pub fn replace_document(&self, document_id: &str, entries: Vec<IndexEntry>) -> Result<(), AppError> {
        self.check_entries(&entries)?;
        if let Some(bad) = entries.iter().find(|e| e.meta.document_id != document_id) {
            return Err(AppError::new(
                DOCUMENT_INVALID,
                "Entry does not belong to the document being replaced",
            )
            .with_details(format!(
                "document_id={document_id}; chunk_id={}; entry_document_id={}",
                bad.chunk_id, bad.meta.document_id
            )));
        }
        let keep: BTreeSet<String> = entries.iter().map(|e| e.chunk_id.clone()).collect();
        let n = entries.len();
        self.commit(|snap| {
            snap.remove_where(|e| e.meta.document_id == document_id && !keep.contains(&e.chunk_id));
            for e in entries {
                snap.upsert(e);
            }
            Ok(())
        })?;
        debug!(document_id, entries = n, "index replace committed");
        Ok(())
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<QueryHit>, AppError> {
        self.search_scoped(query, k, None)
    }

    /// Top-`k` entries by cosine similarity, descending; equal scores keep insertion order.
    /// Entries with a zero vector cannot be ranked and are never returned.
    pub fn search_scoped(
        &self,
        query: &[f32],
        k: usize,
        scope: Option<&BTreeSet<String>>,
    ) -> Result<Vec<QueryHit>, AppError> {
        if query.len() != self.dimension {
            return Err(AppError::invalid_config(
                "Query vector dimension does not match index dimension",
            )
            .with_details(format!("index_dims={}; query_dims={}", self.dimension, query.len())));
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        let qnorm = l2_norm(query);
        if qnorm == 0.0 || !qnorm.is_finite() {
            return Err(AppError::new(QUERY_INVALID, "Query embedding norm is zero"));
        }

        let snap = self.snapshot();
        let mut scored: Vec<(f32, u64, &Arc<StoredEntry>)> = Vec::new();
        for (seq, stored) in snap.entries.iter() {
            if let Some(ids) = scope {
                if !ids.contains(&stored.entry.meta.document_id) {
                    continue;
                }
            }
            if stored.norm == 0.0 {
                continue;
            }
            let score = cosine_similarity(query, &stored.entry.vector, qnorm, stored.norm);
            scored.push((score, *seq, stored));
        }

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, _, s)| QueryHit {
                chunk_id: s.entry.chunk_id.clone(),
                score,
                text: s.entry.text.clone(),
                meta: s.entry.meta.clone(),
            })
            .collect())
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    fn commit<R, F>(&self, f: F) -> Result<R, AppError>
    where
        F: FnOnce(&mut Snapshot) -> Result<R, AppError>,
    {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = Snapshot::clone(&self.snapshot());
        let out = f(&mut next)?;
        if let Some(path) = self.path.as_ref() {
            // Persist before publishing: a failed write leaves the previous state in place.
            store::write(path, &next.to_persisted(self.dimension))?;
        }
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(next);
        Ok(out)
    }

    fn check_entries(&self, entries: &[IndexEntry]) -> Result<(), AppError> {
        for e in entries {
            if e.vector.len() != self.dimension {
                return Err(AppError::invalid_config(
                    "Entry vector dimension does not match index dimension",
                )
                .with_details(format!(
                    "chunk_id={}; expected={}; got={}",
                    e.chunk_id,
                    self.dimension,
                    e.vector.len()
                )));
            }
            if e.vector.iter().any(|x| !x.is_finite()) {
                return Err(AppError::invalid_config("Entry vector contains non-finite values")
                    .with_details(format!("chunk_id={}", e.chunk_id)));
            }
        }
        Ok(())
    }
}

fn check_dimension_config(dimension: usize) -> Result<(), AppError> {
    if dimension == 0 {
        return Err(AppError::invalid_config("Index dimension must be greater than 0"));
    }
    Ok(())
}
