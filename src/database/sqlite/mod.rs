use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::sqlite::models::{
    HistoryPage, NewQueryHistory, NewSourceDocument, QueryHistory, QueryStatistics,
    SourceDocumentHistory,
};
use crate::database::sqlite::queries::HistoryQueries;
use crate::query::{QueryRequest, QueryResponse};

#[cfg(test)]
mod tests;

pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

/// Query history store
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to create history database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running history database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("History database migrations completed successfully");
        Ok(())
    }

    /// Open `<dir>/history.db`, creating the directory if needed
    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(config_dir.join("history.db")).await
    }

    /// Persist one query outcome with its sources. A missing `error` means
    /// the query succeeded.
    #[inline]
    pub async fn record(
        &self,
        request: &QueryRequest,
        response: &QueryResponse,
        elapsed: Duration,
        error: Option<&str>,
    ) -> Result<QueryHistory> {
        let new = NewQueryHistory {
            query: request.query.clone(),
            chat_response: response.chat_response.clone(),
            top_k: i64::try_from(request.top_k).unwrap_or(i64::MAX),
            response_time_ms: i64::try_from(elapsed.as_millis()).ok(),
            success: error.is_none(),
            error_message: error.map(str::to_string),
            sources: response
                .source_documents
                .iter()
                .map(|doc| NewSourceDocument::new(&doc.content, doc.score, doc.metadata.clone()))
                .collect(),
        };
        let recorded = HistoryQueries::create(&self.pool, &new).await?;
        info!("Saved query history with ID: {}", recorded.id);
        Ok(recorded)
    }

    /// Same as [`Database::record`], but failures only reach the log
    #[inline]
    pub async fn try_record(
        &self,
        request: &QueryRequest,
        response: &QueryResponse,
        elapsed: Duration,
        error: Option<&str>,
    ) -> Option<Uuid> {
        match self.record(request, response, elapsed, error).await {
            Ok(recorded) => Some(recorded.id),
            Err(e) => {
                warn!("Failed to save query history: {:#}", e);
                None
            }
        }
    }

    #[inline]
    pub async fn list(&self, limit: i64, offset: i64) -> Result<HistoryPage> {
        HistoryQueries::list(&self.pool, limit, offset).await
    }

    #[inline]
    pub async fn get(&self, id: Uuid) -> Result<Option<QueryHistory>> {
        HistoryQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn sources_for(&self, id: Uuid) -> Result<Vec<SourceDocumentHistory>> {
        HistoryQueries::sources_for(&self.pool, id).await
    }

    #[inline]
    pub async fn statistics(&self) -> Result<QueryStatistics> {
        HistoryQueries::statistics(&self.pool).await
    }
}
