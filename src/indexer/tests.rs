use std::sync::atomic::Ordering;

use serde_json::json;

use super::*;
use crate::test_support::{MemoryBackend, StubEmbedder};

const DIM: usize = 16;

struct Setup {
    backend: Arc<MemoryBackend>,
    embedder: Arc<StubEmbedder>,
    index: Arc<IndexCache>,
    indexer: Indexer,
}

fn setup(backend: Arc<MemoryBackend>, batch_size: usize) -> Setup {
    let manager = backend.manager();
    let embedder = StubEmbedder::new(DIM);
    let index = Arc::new(IndexCache::new());
    let fallback = FallbackPersister::new(
        Arc::clone(&manager),
        embedder.clone(),
        DIM,
        IndexingConfig {
            verify_attempts: 2,
            verify_backoff_ms: 1,
        },
    );
    let indexer = Indexer::new(
        manager,
        embedder.clone(),
        Arc::clone(&index),
        ChunkingConfig::default(),
        batch_size,
        fallback,
    );
    Setup {
        backend,
        embedder,
        index,
        indexer,
    }
}

fn rules_documents() -> Vec<Document> {
    vec![
        Document::new("rules.pdf#page=1", "The knight moves in an L shape. ".repeat(75))
            .with_metadata("file_name", "rules.pdf")
            .with_metadata("page_label", "1"),
        Document::new("faq.txt", "Pawns never move backwards."),
    ]
}

#[test]
fn indexing_config_defaults_and_validation() {
    let config = IndexingConfig::default();
    assert_eq!(config.verify_attempts, 5);
    assert_eq!(config.verify_backoff_ms, 500);
    assert!(config.validate().is_ok());

    let config = IndexingConfig {
        verify_attempts: 0,
        ..IndexingConfig::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidVerifyAttempts(0))
    ));
}

#[tokio::test]
async fn indexes_every_chunk_with_matching_width() {
    let s = setup(MemoryBackend::new(), 2);

    let stats = s
        .indexer
        .index_documents(&rules_documents())
        .await
        .expect("indexing should succeed");

    assert_eq!(stats.documents, 2);
    assert!(stats.chunks_created >= 4);
    assert_eq!(stats.embeddings_generated, stats.chunks_created);
    assert_eq!(stats.fallback_rows, 0);

    let rows = s.backend.rows();
    assert_eq!(rows.len(), stats.chunks_created);
    assert!(rows.iter().all(|row| row.embedding.len() == DIM));
    assert!(
        rows.iter()
            .any(|row| row.metadata.get("file_name") == Some(&json!("rules.pdf")))
    );
    assert!(
        rows.iter()
            .all(|row| row.metadata.contains_key("position")
                && row.metadata.contains_key("document_id"))
    );
    assert_eq!(
        s.embedder.calls.load(Ordering::SeqCst),
        stats.chunks_created
    );
}

#[tokio::test]
async fn indexing_caches_the_query_index() {
    let s = setup(MemoryBackend::new(), 16);
    assert!(!s.index.is_cached().await);

    s.indexer
        .index_documents(&rules_documents())
        .await
        .expect("indexing should succeed");

    assert!(s.index.is_cached().await);
}

#[tokio::test]
async fn lost_batches_trigger_manual_persistence() {
    let backend = MemoryBackend::new();
    backend.drop_batches.store(true, Ordering::SeqCst);
    let s = setup(backend, 16);

    let stats = s
        .indexer
        .index_documents(&rules_documents())
        .await
        .expect("indexing should succeed");

    assert_eq!(stats.fallback_rows, stats.chunks_created);
    assert_eq!(s.backend.rows().len(), stats.chunks_created);
}

#[tokio::test]
async fn width_mismatch_fails_before_writing() {
    let s = setup(MemoryBackend::with_table(DIM * 2, 1), 16);

    let result = s.indexer.index_documents(&rules_documents()).await;

    let err = result.expect_err("mismatched widths must be rejected");
    assert!(format!("{err:#}").contains("dimension"), "{err:#}");
    assert_eq!(s.backend.rows().len(), 1);
}

#[tokio::test]
async fn whitespace_documents_produce_nothing() {
    let s = setup(MemoryBackend::new(), 16);

    let stats = s
        .indexer
        .index_documents(&[Document::new("blank.txt", "  \n\n  ")])
        .await
        .expect("should succeed");

    assert_eq!(stats.chunks_created, 0);
    assert!(s.backend.rows().is_empty());
    assert_eq!(s.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn embedding_failures_propagate() {
    let s = setup(MemoryBackend::new(), 16);
    s.embedder.fail.store(true, Ordering::SeqCst);

    let result = s.indexer.index_documents(&rules_documents()).await;
    assert!(result.is_err());
    assert!(s.backend.rows().is_empty());
}
