use std::sync::atomic::Ordering;

use serde_json::Map;
use tempfile::TempDir;
use uuid::Uuid;

use super::*;
use crate::test_support::MemoryBackend;

fn record(dimension: usize) -> VectorRecord {
    VectorRecord {
        id: Uuid::new_v4(),
        content: "Castling moves the king two squares.".to_string(),
        embedding: vec![0.5; dimension],
        metadata: Map::new(),
    }
}

#[tokio::test]
async fn create_table_twice_is_a_no_op() {
    let backend = MemoryBackend::new();
    let manager = backend.manager();

    assert!(manager.create_table(8).await.expect("first create"));
    assert!(!manager.create_table(8).await.expect("second create"));
    assert_eq!(manager.stored_dimension().await.expect("dimension"), Some(8));
}

#[tokio::test]
async fn create_table_with_other_width_is_rejected() {
    let backend = MemoryBackend::with_table(8, 2);
    let manager = backend.manager();

    let err = manager
        .create_table(16)
        .await
        .expect_err("conflicting width should fail");
    assert!(matches!(
        err,
        AdvisorError::DimensionMismatch {
            stored: 8,
            expected: 16
        }
    ));
    assert_eq!(manager.row_count().await.expect("count"), 2);
}

#[tokio::test]
async fn row_count_of_absent_table_is_zero() {
    let manager = MemoryBackend::new().manager();
    assert!(!manager.table_exists().await.expect("exists"));
    assert_eq!(manager.row_count().await.expect("count"), 0);
    assert_eq!(
        manager.schema().await.expect("schema"),
        VectorStoreSchema {
            table_name: "advisor_docs".to_string(),
            dimension: None,
            row_count: 0,
        }
    );
}

#[tokio::test]
async fn drop_without_consent_spares_rows() {
    let backend = MemoryBackend::with_table(4, 3);
    let manager = backend.manager();

    assert!(manager.drop_table(DataLoss::Refuse).await.is_err());
    assert_eq!(manager.row_count().await.expect("count"), 3);

    assert!(manager.drop_table(DataLoss::Accept).await.expect("drop"));
    assert!(!manager.table_exists().await.expect("exists"));
}

#[tokio::test]
async fn empty_table_drops_without_consent() {
    let backend = MemoryBackend::with_table(4, 0);
    let manager = backend.manager();
    assert!(manager.drop_table(DataLoss::Refuse).await.expect("drop"));
}

#[tokio::test]
async fn writes_are_validated_against_stored_width() {
    let backend = MemoryBackend::with_table(4, 0);
    let manager = backend.manager();

    let err = manager
        .write_batch(&[record(4), record(3)])
        .await
        .expect_err("mixed widths should fail");
    assert!(matches!(
        err,
        AdvisorError::DimensionMismatch {
            stored: 4,
            expected: 3
        }
    ));
    assert_eq!(manager.row_count().await.expect("count"), 0);

    manager
        .write_batch(&[record(4), record(4)])
        .await
        .expect("matching widths should write");
    assert_eq!(manager.row_count().await.expect("count"), 2);
}

#[tokio::test]
async fn first_batch_defines_width_of_new_table() {
    let backend = MemoryBackend::new();
    let manager = backend.manager();

    assert!(manager.write_batch(&[record(6), record(5)]).await.is_err());
    manager
        .write_batch(&[record(6)])
        .await
        .expect("uniform batch should write");
    assert_eq!(manager.stored_dimension().await.expect("dimension"), Some(6));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_first_writes_create_the_table_once() {
    let backend = MemoryBackend::new();
    let manager = backend.manager();

    let writers: Vec<_> = (0..2)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.write_batch(&[record(5), record(5)]).await })
        })
        .collect();
    for writer in writers {
        writer
            .await
            .expect("writer task should not panic")
            .expect("both first writes should succeed");
    }

    assert_eq!(backend.creates.load(Ordering::SeqCst), 1);
    assert_eq!(manager.stored_dimension().await.expect("dimension"), Some(5));
    assert_eq!(manager.row_count().await.expect("count"), 4);
}

#[tokio::test]
async fn insert_row_needs_existing_table() {
    let backend = MemoryBackend::new();
    let manager = backend.manager();
    assert!(manager.insert_row(&record(4)).await.is_err());

    manager.create_table(4).await.expect("create");
    manager.insert_row(&record(4)).await.expect("insert");
    assert!(manager.insert_row(&record(2)).await.is_err());
    assert_eq!(manager.row_count().await.expect("count"), 1);
}

#[tokio::test]
async fn unreachable_store_is_unavailable() {
    let backend = MemoryBackend::new();
    backend.offline.store(true, Ordering::SeqCst);
    let manager = backend.manager();

    assert!(matches!(
        manager.ensure_connected().await,
        Err(AdvisorError::StoreUnavailable(_))
    ));
    assert!(!manager.ping().await);
}

#[tokio::test]
async fn admin_session_blocks_readers() {
    let backend = MemoryBackend::with_table(4, 1);
    let manager = backend.manager();

    let session = manager.admin().await;
    let reader = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.row_count().await })
    };

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!reader.is_finished(), "reader should wait for the session");

    session.drop_table().await.expect("drop inside session");
    session.create_table(4).await.expect("create inside session");
    drop(session);

    let count = reader
        .await
        .expect("reader task should not panic")
        .expect("count");
    assert_eq!(count, 0);
}

#[test]
fn manager_follows_configured_backend() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::with_base_dir(temp_dir.path());
    config.store.table_name = "rules".to_string();

    let manager = VectorStoreManager::from_config(&config);
    assert_eq!(manager.backend_kind(), StoreBackendKind::LanceDb);
    assert_eq!(manager.table_name(), "rules");
    assert!(!manager.is_opened());
}

#[test]
fn backend_kind_display_matches_config_names() {
    assert_eq!(StoreBackendKind::LanceDb.to_string(), "lancedb");
    assert_eq!(StoreBackendKind::Postgres.to_string(), "postgres");
}

#[test]
fn postgres_target_hides_password() {
    let config = PostgresConfig {
        password: "hunter2".to_string(),
        ..PostgresConfig::default()
    };
    assert_eq!(config.display_target(), "localhost:5432/postgres");
    assert!(matches!(
        PostgresConfig {
            max_connections: 0,
            ..PostgresConfig::default()
        }
        .validate(),
        Err(ConfigError::InvalidPoolSize(0))
    ));
}
