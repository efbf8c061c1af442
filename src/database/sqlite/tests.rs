use super::*;
use crate::query::{DocumentMetadata, SourceDocument};
use anyhow::Result;
use std::collections::HashSet;
use tempfile::TempDir;

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    Ok((temp_dir, database))
}

fn response(sources: usize) -> QueryResponse {
    QueryResponse {
        chat_response: "Bishops move diagonally.".to_string(),
        source_documents: (0..sources)
            .map(|i| SourceDocument {
                content: format!("passage {i}"),
                score: 0.9 - i as f32 * 0.1,
                metadata: DocumentMetadata {
                    file_name: "rules.pdf".to_string(),
                    page: Some(i as i64 + 1),
                    source: Some("/docs/rules.pdf".to_string()),
                },
            })
            .collect(),
    }
}

#[tokio::test]
async fn integration_schema_migration() -> Result<()> {
    let (temp_dir, database) = create_test_database().await?;
    assert!(temp_dir.path().join("history.db").exists());

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' \
         AND name NOT LIKE '_sqlx%'",
    )
    .fetch_all(database.pool())
    .await?;

    let expected_tables: HashSet<&'static str> = ["query_history", "source_document_history"]
        .into_iter()
        .collect();

    let actual_tables: HashSet<&str> = tables.iter().map(|t| t.as_str()).collect();
    assert_eq!(actual_tables, expected_tables);

    Ok(())
}

#[tokio::test]
async fn integration_migrations_are_idempotent() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    database.run_migrations().await?;
    Ok(())
}

#[tokio::test]
async fn integration_record_successful_query() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let request = QueryRequest::new("How do bishops move?").with_top_k(3);

    let recorded = database
        .record(&request, &response(2), Duration::from_millis(250), None)
        .await?;

    assert!(recorded.success);
    assert_eq!(recorded.top_k, 3);
    assert_eq!(recorded.response_time_ms, Some(250));
    assert_eq!(recorded.source_document_count, 2);

    let sources = database.sources_for(recorded.id).await?;
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].content_preview, "passage 0");
    assert_eq!(
        sources[1].metadata().and_then(|m| m.page),
        Some(2),
        "page survives the JSON round trip"
    );

    Ok(())
}

#[tokio::test]
async fn integration_record_failed_query() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let request = QueryRequest::new("Anything?");
    let failure = QueryResponse {
        chat_response: crate::GENERIC_QUERY_ERROR.to_string(),
        source_documents: Vec::new(),
    };

    let id = database
        .try_record(&request, &failure, Duration::from_millis(5), Some("Query failed: boom"))
        .await
        .expect("recording should succeed");

    let stored = database.get(id).await?.expect("query should exist");
    assert!(!stored.success);
    assert_eq!(stored.error_message.as_deref(), Some("Query failed: boom"));
    assert_eq!(stored.chat_response, "Error processing query.");

    let stats = database.statistics().await?;
    assert_eq!(stats.total_queries, 1);
    assert_eq!(stats.successful_queries, 0);
    assert!(stats.success_rate_percent.abs() < f64::EPSILON);

    Ok(())
}

#[tokio::test]
async fn integration_history_page() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    for i in 0..3 {
        database
            .record(
                &QueryRequest::new(format!("question {i}")),
                &response(1),
                Duration::from_millis(10),
                None,
            )
            .await?;
    }

    let page = database.list(10, 0).await?;
    assert_eq!(page.total_count, 3);
    assert_eq!(page.items.len(), 3);
    assert_eq!(page.items[0].query, "question 2");

    Ok(())
}

#[tokio::test]
async fn integration_try_record_swallows_failures() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    database.pool().close().await;

    let id = database
        .try_record(
            &QueryRequest::new("lost"),
            &response(0),
            Duration::from_millis(1),
            None,
        )
        .await;
    assert!(id.is_none());

    Ok(())
}
