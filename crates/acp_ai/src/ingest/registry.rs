use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use acp_core::domain::{Document, DocumentRecord, IngestionStatus};
use acp_core::error::{AppError, INGESTION_IN_PROGRESS};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::chunking::{normalize_text, Chunker};

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<String, DocumentRecord>,
    // Ids whose chunks are being removed from the index.
    deleting: HashSet<String>,
}

impl State {
    fn busy(&self, document_id: &str) -> Option<AppError> {
        if self.deleting.contains(document_id) {
            return Some(busy_error(document_id, "Document is being deleted"));
        }
        match self.records.get(document_id) {
            Some(r) if r.status.is_in_flight() => Some(
                busy_error(document_id, "Document is already being ingested")
                    .with_details(format!("document_id={document_id}; status={:?}", r.status)),
            ),
            _ => None,
        }
    }
}

fn busy_error(document_id: &str, message: &str) -> AppError {
    AppError::new(INGESTION_IN_PROGRESS, message)
        .with_details(format!("document_id={document_id}"))
        .with_retryable(true)
}

/// In-memory ingestion bookkeeping: one record per document id, last run wins.
#[derive(Debug, Default)]
pub struct DocumentRegistry {
    state: Mutex<State>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, document_id: &str) -> Option<DocumentRecord> {
        self.lock().records.get(document_id).cloned()
    }

    /// All records, oldest submission first.
    pub fn list(&self) -> Vec<DocumentRecord> {
        let mut out: Vec<DocumentRecord> = self.lock().records.values().cloned().collect();
        out.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        out
    }

    /// Claim `doc` for ingestion with `chunker` and reset its record to `pending`.
    pub(crate) fn begin(
        &self,
        doc: &Document,
        content_sha256: &str,
        chunker: &Chunker,
    ) -> Result<InFlight<'_>, AppError> {
        let mut state = self.lock();
        if let Some(err) = state.busy(&doc.document_id) {
            return Err(err);
        }
        state.records.insert(
            doc.document_id.clone(),
            DocumentRecord {
                document_id: doc.document_id.clone(),
                source_type: doc.source_type,
                title: doc.title.clone(),
                url: doc.url.clone(),
                content_sha256: content_sha256.to_string(),
                // Spans are measured on the normalized text.
                char_count: normalize_text(&doc.text).chars().count(),
                chunk_count: 0,
                chunk_size: Some(chunker.max_size()),
                chunk_overlap: Some(chunker.overlap()),
                status: IngestionStatus::Pending,
                submitted_at: now_rfc3339(),
                ingested_at: None,
                last_error: None,
            },
        );
        Ok(InFlight {
            registry: self,
            document_id: doc.document_id.clone(),
        })
    }

    /// Claim a settled document for deletion. Its record is taken out now; ingestion of the
    /// same id is refused until the claim is committed or dropped.
    pub(crate) fn begin_delete(&self, document_id: &str) -> Result<DeleteClaim<'_>, AppError> {
        let mut state = self.lock();
        if let Some(err) = state.busy(document_id) {
            return Err(err);
        }
        let removed = state.records.remove(document_id);
        state.deleting.insert(document_id.to_string());
        Ok(DeleteClaim {
            registry: self,
            document_id: document_id.to_string(),
            removed,
            committed: false,
        })
    }

    fn update<F>(&self, document_id: &str, f: F)
    where
        F: FnOnce(&mut DocumentRecord),
    {
        if let Some(r) = self.lock().records.get_mut(document_id) {
            f(r);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive claim on one document's ingestion. Dropping it before `finish`/`fail` marks the
/// document failed so the id never stays locked.
pub(crate) struct InFlight<'r> {
    registry: &'r DocumentRegistry,
    document_id: String,
}

impl InFlight<'_> {
    pub(crate) fn advance(&self, next: IngestionStatus) {
        self.registry.update(&self.document_id, |r| {
            if r.status.can_advance_to(next) {
                debug!(document_id = %r.document_id, from = ?r.status, to = ?next, "ingestion status");
                r.status = next;
            } else {
                warn!(document_id = %r.document_id, from = ?r.status, to = ?next, "ignored backward status transition");
            }
        });
    }

    pub(crate) fn finish(self, chunk_count: u32) -> Option<DocumentRecord> {
        self.settle(IngestionStatus::Indexed, |r| {
            r.chunk_count = chunk_count;
            r.ingested_at = Some(now_rfc3339());
        })
    }

    pub(crate) fn fail(self, err: &AppError) -> Option<DocumentRecord> {
        let message = err.to_string();
        self.settle(IngestionStatus::Failed, |r| r.last_error = Some(message))
    }

    // Final transition and snapshot under one lock, so a concurrent delete cannot interleave.
    fn settle<F>(&self, status: IngestionStatus, f: F) -> Option<DocumentRecord>
    where
        F: FnOnce(&mut DocumentRecord),
    {
        let mut state = self.registry.lock();
        let r = state.records.get_mut(&self.document_id)?;
        f(r);
        if r.status.can_advance_to(status) {
            debug!(document_id = %r.document_id, from = ?r.status, to = ?status, "ingestion status");
            r.status = status;
        }
        Some(r.clone())
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.registry.lock();
        if let Some(r) = state.records.get_mut(&self.document_id) {
            if r.status.is_in_flight() {
                warn!(document_id = %r.document_id, status = ?r.status, "ingestion abandoned");
                r.status = IngestionStatus::Failed;
                r.last_error = Some("ingestion aborted before completion".to_string());
            }
        }
    }
}

/// Holds a document id for deletion. Dropping it uncommitted puts the removed record back.
pub(crate) struct DeleteClaim<'r> {
    registry: &'r DocumentRegistry,
    document_id: String,
    removed: Option<DocumentRecord>,
    committed: bool,
}

impl DeleteClaim<'_> {
    pub(crate) fn had_record(&self) -> bool {
        self.removed.is_some()
    }

    pub(crate) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for DeleteClaim<'_> {
    fn drop(&mut self) {
        let mut state = self.registry.lock();
        state.deleting.remove(&self.document_id);
        if !self.committed {
            if let Some(r) = self.removed.take() {
                state.records.insert(self.document_id.clone(), r);
            }
        }
    }
}
