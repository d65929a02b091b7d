mod common;

use acp_ai::embeddings::Embedder;
use acp_core::retry::RetryPolicy;
use common::{letter_vector, test_config, LetterEmbedder};
use pretty_assertions::assert_eq;

fn fast_retry() -> RetryPolicy {
    RetryPolicy::from_config(&test_config().retry)
}

#[test]
fn embed_all_preserves_input_order_across_batches() {
    let backend = LetterEmbedder::new();
    let cfg = test_config().embedding;
    let embedder = Embedder::new(&backend, &cfg, fast_retry()).expect("embedder");

    let texts = ["a", "bb", "ccc", "ab", "abc", "cc", "b"];
    let vectors = embedder.embed_all(&texts).expect("embed_all");

    let expected: Vec<Vec<f32>> = texts.iter().map(|t| letter_vector(t)).collect();
    assert_eq!(vectors, expected);
    // batch_size 2 -> 4 batches
    assert_eq!(backend.calls(), 4);
}

#[test]
fn transient_outage_is_retried() {
    let backend = LetterEmbedder::failing_first(2);
    let cfg = test_config().embedding;
    let embedder = Embedder::new(&backend, &cfg, fast_retry()).expect("embedder");

    let v = embedder.embed("abc", None).expect("embed after retries");
    assert_eq!(v, letter_vector("abc"));
    assert_eq!(backend.calls(), 3);
}

#[test]
fn persistent_outage_surfaces_embedding_unavailable() {
    let backend = LetterEmbedder::failing_first(100);
    let cfg = test_config().embedding;
    let embedder = Embedder::new(&backend, &cfg, fast_retry()).expect("embedder");

    let err = embedder.embed_all(&["a", "b"]).expect_err("should fail");
    assert_eq!(err.code, "EMBEDDING_UNAVAILABLE");
    assert!(err.retryable);
    assert_eq!(backend.calls(), 3);
}

#[test]
fn failing_item_does_not_hide_its_batch_neighbours() {
    let backend = LetterEmbedder::with_poison("zzz");
    let cfg = test_config().embedding;
    let embedder = Embedder::new(&backend, &cfg, fast_retry()).expect("embedder");

    let ok = embedder.embed_all(&["a", "b", "c", "ab"]).expect("clean batches");
    assert_eq!(ok.len(), 4);

    let err = embedder
        .embed_all(&["a", "zzz"])
        .expect_err("poisoned item");
    assert_eq!(err.code, "EMBEDDING_UNAVAILABLE");
}

#[test]
fn dimension_mismatch_is_a_configuration_error() {
    let backend = LetterEmbedder {
        dims: Some(3),
        ..LetterEmbedder::default()
    };
    let cfg = test_config().embedding;
    let embedder = Embedder::new(&backend, &cfg, fast_retry()).expect("embedder");

    let err = embedder.embed("abc", None).expect_err("wrong dims");
    assert_eq!(err.code, "INVALID_CONFIGURATION");
    assert_eq!(backend.calls(), 1);
}

#[test]
fn cancelled_token_stops_before_calling_backend() {
    let backend = LetterEmbedder::new();
    let cfg = test_config().embedding;
    let embedder = Embedder::new(&backend, &cfg, fast_retry()).expect("embedder");
    let cancel = acp_core::cancel::CancelToken::new();
    cancel.cancel();

    let err = embedder.embed("abc", Some(&cancel)).expect_err("cancelled");
    assert_eq!(err.code, "QUERY_CANCELLED");
    assert_eq!(backend.calls(), 0);
}
