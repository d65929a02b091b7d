use acp_core::domain::QueryHit;

/// Drop hits whose span overlaps an already kept, higher-ranked hit of the same document by
/// more than `threshold` (fraction of the shorter span). Input must be in rank order.
pub fn dedup_overlapping(hits: Vec<QueryHit>, threshold: f32) -> Vec<QueryHit> {
    let mut kept: Vec<QueryHit> = Vec::with_capacity(hits.len());
    for hit in hits {
        let duplicate = kept.iter().any(|k| {
            k.meta.document_id == hit.meta.document_id
                && k.meta.span.overlap_fraction(&hit.meta.span) > threshold
        });
        if !duplicate {
            kept.push(hit);
        }
    }
    kept
}
