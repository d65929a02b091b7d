use std::collections::BTreeSet;

use acp_core::cancel::{check_cancelled, CancelToken};
use acp_core::config::RetrievalConfig;
use acp_core::domain::{QueryHit, QueryResult};
use acp_core::error::{AppError, EMPTY_INDEX, QUERY_INVALID};
use tracing::debug;

use crate::embeddings::Embedder;
use crate::index::VectorIndex;

mod dedup;

pub use dedup::dedup_overlapping;

/// Parameters of one retrieval. `k` is clamped to `[1, max_k]`.
#[derive(Debug, Clone, Default)]
pub struct RetrieveRequest<'q> {
    pub query: &'q str,
    pub k: Option<usize>,
    pub dedup: bool,
    pub scope: Option<&'q BTreeSet<String>>,
}

pub struct Retriever<'a> {
    embedder: &'a Embedder<'a>,
    index: &'a VectorIndex,
    cfg: RetrievalConfig,
}

impl<'a> Retriever<'a> {
    pub fn new(embedder: &'a Embedder<'a>, index: &'a VectorIndex, cfg: &RetrievalConfig) -> Self {
        Self {
            embedder,
            index,
            cfg: cfg.clone(),
        }
    }

    pub fn retrieve(
        &self,
        req: RetrieveRequest<'_>,
        cancel: Option<&CancelToken>,
    ) -> Result<QueryResult, AppError> {
        let q = req.query.trim();
        if q.is_empty() {
            return Err(AppError::new(QUERY_INVALID, "Query must not be empty"));
        }
        let k = req
            .k
            .unwrap_or(self.cfg.default_k)
            .clamp(1, self.cfg.max_k.max(1));

        let available = self.index.count_in_scope(req.scope);
        if available == 0 {
            let details = match req.scope {
                Some(ids) => format!("scope={}", ids.iter().cloned().collect::<Vec<_>>().join(",")),
                None => "scope=all".to_string(),
            };
            return Err(AppError::new(EMPTY_INDEX, "No indexed content for the query scope")
                .with_details(details));
        }

        check_cancelled(cancel, "embed_query")?;
        let qv = self.embedder.embed(q, cancel)?;
        check_cancelled(cancel, "search")?;

        if !req.dedup {
            let hits = self.index.search_scoped(&qv, k, req.scope)?;
            return Ok(QueryResult {
                hits: self.apply_min_score(hits),
            });
        }

        let mut window = k.saturating_mul(self.cfg.over_fetch_factor.max(1));
        loop {
            let raw = self.index.search_scoped(&qv, window, req.scope)?;
            let window_full = raw.len() == window;
            let lowest = raw.last().map(|h| h.score);
            let mut hits = dedup_overlapping(self.apply_min_score(raw), self.cfg.dedup_overlap_threshold);

            // Widening cannot help once the window holds everything, or once it already
            // reaches below the relevance floor.
            let below_floor = matches!((lowest, self.cfg.min_score), (Some(l), Some(m)) if l < m);
            if hits.len() >= k || !window_full || below_floor || window >= available {
                hits.truncate(k);
                debug!(k, window, returned = hits.len(), "retrieval complete");
                return Ok(QueryResult { hits });
            }

            debug!(k, window, kept = hits.len(), "dedup left too few hits; widening");
            check_cancelled(cancel, "search")?;
            window = window.saturating_mul(2);
        }
    }

    fn apply_min_score(&self, hits: Vec<QueryHit>) -> Vec<QueryHit> {
        match self.cfg.min_score {
            Some(min) => hits.into_iter().filter(|h| h.score >= min).collect(),
            None => hits,
        }
    }
}
