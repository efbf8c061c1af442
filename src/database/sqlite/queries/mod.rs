
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use super::models::{
    HistoryPage, NewQueryHistory, QueryHistory, QueryStatistics, SourceDocumentHistory,
};

const QUERY_HISTORY_COLUMNS: &str = "id, query, chat_response, top_k, response_time_ms, \
     source_document_count, created_at, success, error_message";

const SOURCE_DOCUMENT_COLUMNS: &str =
    "id, query_id, content_preview, similarity_score, document_metadata, created_at";

pub struct HistoryQueries;

impl HistoryQueries {
    /// Insert a query and its sources in one transaction
    #[inline]
    pub async fn create(pool: &SqlitePool, new: &NewQueryHistory) -> Result<QueryHistory> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let source_count = i64::try_from(new.sources.len()).unwrap_or(i64::MAX);

        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            "INSERT INTO query_history (id, query, chat_response, top_k, response_time_ms, \
             source_document_count, created_at, success, error_message) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&new.query)
        .bind(&new.chat_response)
        .bind(new.top_k)
        .bind(new.response_time_ms)
        .bind(source_count)
        .bind(now)
        .bind(new.success)
        .bind(&new.error_message)
        .execute(&mut *tx)
        .await
        .context("Failed to insert query history")?;

        for source in &new.sources {
            let metadata = source
                .document_metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("Failed to encode document metadata")?;

            sqlx::query(
                "INSERT INTO source_document_history (id, query_id, content_preview, \
                 similarity_score, document_metadata, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(&source.content_preview)
            .bind(source.similarity_score)
            .bind(metadata)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to insert source document history")?;
        }

        tx.commit().await.context("Failed to commit query history")?;
        debug!("Recorded query {} with {} sources", id, new.sources.len());

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve recorded query"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<QueryHistory>> {
        let sql = format!("SELECT {QUERY_HISTORY_COLUMNS} FROM query_history WHERE id = ?");
        sqlx::query_as::<_, QueryHistory>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get query history by id")
    }

    /// Newest first
    #[inline]
    pub async fn list(pool: &SqlitePool, limit: i64, offset: i64) -> Result<HistoryPage> {
        let sql = format!(
            "SELECT {QUERY_HISTORY_COLUMNS} FROM query_history \
             ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
        );
        let items = sqlx::query_as::<_, QueryHistory>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
            .context("Failed to list query history")?;

        Ok(HistoryPage {
            items,
            total_count: Self::count(pool).await?,
            limit,
            offset,
        })
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM query_history")
            .fetch_one(pool)
            .await
            .context("Failed to count query history")
    }

    #[inline]
    pub async fn sources_for(
        pool: &SqlitePool,
        query_id: Uuid,
    ) -> Result<Vec<SourceDocumentHistory>> {
        let sql = format!(
            "SELECT {SOURCE_DOCUMENT_COLUMNS} FROM source_document_history \
             WHERE query_id = ? ORDER BY similarity_score DESC, rowid ASC"
        );
        sqlx::query_as::<_, SourceDocumentHistory>(&sql)
            .bind(query_id)
            .fetch_all(pool)
            .await
            .context("Failed to get source documents for query")
    }

    #[inline]
    pub async fn statistics(pool: &SqlitePool) -> Result<QueryStatistics> {
        let (total, successful, average): (i64, i64, Option<f64>) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN success THEN 1 ELSE 0 END), 0), \
             AVG(response_time_ms) FROM query_history",
        )
        .fetch_one(pool)
        .await
        .context("Failed to compute query statistics")?;

        Ok(QueryStatistics::new(total, successful, average))
    }
}
