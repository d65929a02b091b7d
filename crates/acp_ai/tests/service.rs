mod common;

use std::sync::Arc;

use acp_ai::{IngestRequest, QaService, QueryRequest};
use acp_core::cancel::CancelToken;
use acp_core::domain::{document_id_for, IngestionStatus, SourceType};
use common::{test_config, LetterEmbedder, ScriptedLlm};
use pretty_assertions::assert_eq;

fn webpage(id: &str, text: &str) -> IngestRequest {
    IngestRequest {
        document_id: Some(id.to_string()),
        source_type: SourceType::Webpage,
        text: text.to_string(),
        title: None,
        url: None,
        chunk_size: None,
        chunk_overlap: None,
    }
}

fn cache_article() -> String {
    "A cache stores computed results. Caches cut latency for repeated reads. ".repeat(6)
}

fn bread_article() -> String {
    "Bread needs flour, water and salt. Bake the bread at a high heat. ".repeat(6)
}

#[test]
fn ingest_then_query_returns_cited_answer() {
    let llm = Arc::new(ScriptedLlm::answering("Caches cut latency."));
    let svc = QaService::new(test_config(), Arc::new(LetterEmbedder::new()), llm.clone())
        .expect("service");

    let resp = svc.ingest(webpage("cache", &cache_article())).expect("ingest");
    assert_eq!(resp.status, IngestionStatus::Indexed);
    svc.ingest(webpage("bread", &bread_article())).expect("ingest");
    assert_eq!(svc.ingestion_status("cache").expect("status"), IngestionStatus::Indexed);

    let answer = svc
        .query(QueryRequest::new("What does a cache do?"), None)
        .expect("answer");
    assert!(answer.grounded);
    assert!(!answer.citations.is_empty());
    assert_eq!(llm.calls(), 1);
    let prompt = llm.last_prompt().expect("prompt");
    for id in answer.citations.iter() {
        assert!(prompt.contains(&format!("[[chunk:{id}]]")));
    }

    let stats = svc.index_stats();
    assert_eq!(stats.document_count, 2);
    assert_eq!(stats.dimension, common::DIMS);
}

#[test]
fn generation_outage_fails_query_and_leaves_index_untouched() {
    let llm = Arc::new(ScriptedLlm::unavailable());
    let svc = QaService::new(test_config(), Arc::new(LetterEmbedder::new()), llm.clone())
        .expect("service");
    svc.ingest(webpage("cache", &cache_article())).expect("ingest");
    let before = svc.index_stats();

    let err = svc
        .query(QueryRequest::new("What does a cache do?"), None)
        .expect_err("outage");
    assert_eq!(err.code, "GENERATION_UNAVAILABLE");
    assert_eq!(llm.calls(), 3);
    assert_eq!(svc.index_stats(), before);
}

#[test]
fn querying_an_empty_service_is_empty_index() {
    let llm = Arc::new(ScriptedLlm::answering("unused"));
    let svc = QaService::new(test_config(), Arc::new(LetterEmbedder::new()), llm.clone())
        .expect("service");
    let err = svc
        .query(QueryRequest::new("anything?"), None)
        .expect_err("empty");
    assert_eq!(err.code, "EMPTY_INDEX");
    assert!(!err.retryable);
    assert_eq!(llm.calls(), 0);
}

#[test]
fn cancelled_query_never_reaches_the_model() {
    let llm = Arc::new(ScriptedLlm::answering("unused"));
    let svc = QaService::new(test_config(), Arc::new(LetterEmbedder::new()), llm.clone())
        .expect("service");
    svc.ingest(webpage("cache", &cache_article())).expect("ingest");

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = svc
        .query(QueryRequest::new("What does a cache do?"), Some(&cancel))
        .expect_err("cancelled");
    assert_eq!(err.code, "QUERY_CANCELLED");
    assert_eq!(llm.calls(), 0);
}

#[test]
fn scoped_query_only_cites_scoped_documents() {
    let llm = Arc::new(ScriptedLlm::answering("no markers"));
    let svc = QaService::new(test_config(), Arc::new(LetterEmbedder::new()), llm)
        .expect("service");
    svc.ingest(webpage("cache", &cache_article())).expect("ingest");
    svc.ingest(webpage("bread", &bread_article())).expect("ingest");

    let mut req = QueryRequest::new("How do I bake?");
    req.document_scope = Some(vec!["bread".to_string()]);
    let hits = svc.retrieve(&req, None).expect("retrieve");
    assert!(hits.hits.iter().all(|h| h.meta.document_id == "bread"));

    // No markers in the model output: every context chunk is cited, in rank order.
    let answer = svc.query(req, None).expect("answer");
    let hit_ids: Vec<String> = hits.hits.iter().map(|h| h.chunk_id.clone()).collect();
    assert_eq!(answer.citations, hit_ids);
}

#[test]
fn minutes_and_summary_for_an_ingested_transcript() {
    let llm = Arc::new(ScriptedLlm::answering("## Meeting Minutes\n- ship Friday"));
    let svc = QaService::new(test_config(), Arc::new(LetterEmbedder::new()), llm.clone())
        .expect("service");
    svc.ingest(IngestRequest {
        document_id: Some("standup".to_string()),
        source_type: SourceType::Transcript,
        text: "Alice: we ship Friday. Bob: I own the release notes. ".repeat(5),
        title: Some("Standup".to_string()),
        url: None,
        chunk_size: None,
        chunk_overlap: None,
    })
    .expect("ingest");

    let minutes = svc.meeting_minutes("standup", None).expect("minutes");
    assert!(minutes.grounded);
    assert!(llm.last_prompt().expect("prompt").contains("## Task List"));

    let summary = svc.summarize("standup", None, None).expect("summary");
    assert!(summary.grounded);

    let err = svc.meeting_minutes("missing", None).expect_err("missing");
    assert_eq!(err.code, "DOCUMENT_NOT_FOUND");
}

#[test]
fn document_id_is_derived_from_url_when_absent() {
    let svc = QaService::new(
        test_config(),
        Arc::new(LetterEmbedder::new()),
        Arc::new(ScriptedLlm::answering("ok")),
    )
    .expect("service");
    let resp = svc
        .ingest(IngestRequest {
            document_id: None,
            source_type: SourceType::Webpage,
            text: cache_article(),
            title: None,
            url: Some("https://example.com/caching".to_string()),
            chunk_size: None,
            chunk_overlap: None,
        })
        .expect("ingest");
    assert_eq!(resp.document_id, document_id_for("https://example.com/caching"));

    assert_eq!(svc.delete_document(&resp.document_id).expect("delete"), resp.chunk_count as usize);
    assert!(svc.list_documents().expect("list").is_empty());
}

#[test]
fn persistent_index_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = test_config();
    cfg.index.path = Some(dir.path().join("vectors.json"));

    let chunk_count = {
        let svc = QaService::new(
            cfg.clone(),
            Arc::new(LetterEmbedder::new()),
            Arc::new(ScriptedLlm::answering("ok")),
        )
        .expect("service");
        svc.ingest(webpage("cache", &cache_article())).expect("ingest").chunk_count
    };

    let svc = QaService::new(
        cfg.clone(),
        Arc::new(LetterEmbedder::new()),
        Arc::new(ScriptedLlm::answering("A cache stores results.")),
    )
    .expect("restart");
    assert_eq!(svc.ingestion_status("cache").expect("status"), IngestionStatus::Indexed);
    assert_eq!(svc.index_stats().entry_count, chunk_count as usize);
    let answer = svc
        .query(QueryRequest::new("What is a cache?"), None)
        .expect("answer");
    assert!(answer.grounded);

    cfg.embedding.dimension = 8;
    let err = QaService::new(
        cfg,
        Arc::new(LetterEmbedder::new()),
        Arc::new(ScriptedLlm::answering("ok")),
    )
    .err()
    .expect("dimension change refused");
    assert_eq!(err.code, "INVALID_CONFIGURATION");
}

#[test]
fn per_request_chunk_settings_override_config() {
    let svc = QaService::new(
        test_config(),
        Arc::new(LetterEmbedder::new()),
        Arc::new(ScriptedLlm::answering("ok")),
    )
    .expect("service");
    let default_run = svc.ingest(webpage("plain", &cache_article())).expect("default");

    let mut req = webpage("fine", &cache_article());
    req.chunk_size = Some(100);
    req.chunk_overlap = Some(10);
    let fine_run = svc.ingest(req).expect("override");
    assert!(fine_run.chunk_count > default_run.chunk_count);

    let record = svc.document("fine").expect("record");
    assert_eq!(record.chunk_size, Some(100));
    assert_eq!(record.chunk_overlap, Some(10));
    assert_eq!(svc.document("plain").expect("record").chunk_size, Some(200));

    let mut bad = webpage("bad", &cache_article());
    bad.chunk_size = Some(50);
    bad.chunk_overlap = Some(50);
    let err = svc.ingest(bad).expect_err("overlap too large");
    assert_eq!(err.code, "INVALID_CONFIGURATION");
    assert_eq!(svc.document("bad").expect_err("never started").code, "DOCUMENT_NOT_FOUND");
}

#[test]
fn title_and_url_reach_the_prompt_and_survive_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = test_config();
    cfg.index.path = Some(dir.path().join("vectors.json"));

    let mut req = webpage("cache", &cache_article());
    req.title = Some("Caching guide".to_string());
    req.url = Some("https://example.com/caching".to_string());
    {
        let svc = QaService::new(
            cfg.clone(),
            Arc::new(LetterEmbedder::new()),
            Arc::new(ScriptedLlm::answering("ok")),
        )
        .expect("service");
        svc.ingest(req).expect("ingest");
    }

    let llm = Arc::new(ScriptedLlm::answering("A cache stores results."));
    let svc = QaService::new(cfg, Arc::new(LetterEmbedder::new()), llm.clone()).expect("restart");
    let record = svc.document("cache").expect("recovered");
    assert_eq!(record.title.as_deref(), Some("Caching guide"));
    assert_eq!(record.url.as_deref(), Some("https://example.com/caching"));

    svc.query(QueryRequest::new("What is a cache?"), None)
        .expect("answer");
    let prompt = llm.last_prompt().expect("prompt");
    assert!(prompt.contains("Title: Caching guide\n  URL: https://example.com/caching"));
}

#[test]
fn query_request_defaults_from_json() {
    let req: QueryRequest =
        serde_json::from_str(r#"{"question":"what changed?"}"#).expect("decode");
    assert!(req.dedup);
    assert_eq!(req.k, None);
    assert!(req.document_scope.is_none());
}
