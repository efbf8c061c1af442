
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use pgvector::Vector;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use super::{ScoredRow, StoreBackendKind, VectorBackend, VectorRecord};
use crate::config::is_valid_table_name;
use crate::database::vector::PostgresConfig;

/// Postgres with the pgvector extension. Each operation checks a connection
/// out of the pool and returns it when the statement completes.
#[derive(Debug, Clone)]
pub struct PgVectorBackend {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct SearchRow {
    id: String,
    content: String,
    metadata: Option<String>,
    score: f32,
}

impl PgVectorBackend {
    /// Pool connects on first use
    #[inline]
    pub fn new(config: &PostgresConfig) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy_with(config.connect_options());
        Self { pool }
    }

    #[inline]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[inline]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Table names are interpolated into statements, so they are checked again here
fn quoted(table: &str) -> Result<String> {
    if is_valid_table_name(table) {
        Ok(format!("\"{table}\""))
    } else {
        Err(anyhow!("Refusing unsafe table name {table:?}"))
    }
}

#[async_trait]
impl VectorBackend for PgVectorBackend {
    fn kind(&self) -> StoreBackendKind {
        StoreBackendKind::Postgres
    }

    async fn connect(&self) -> Result<()> {
        self.ping().await?;

        if let Err(e) = sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
        {
            warn!("Could not ensure the vector extension: {}", e);
        }

        info!("Connected to Postgres vector store");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let one: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Postgres round trip failed")?;
        debug!("Postgres ping returned {}", one);
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1)",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to check for table {table}"))
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        if !self.table_exists(table).await? {
            return Ok(0);
        }
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quoted(table)?))
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count rows in {table}"))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn stored_dimension(&self, table: &str) -> Result<Option<usize>> {
        let typmod: Option<i32> = sqlx::query_scalar(
            "SELECT a.atttypmod FROM pg_attribute a \
             JOIN pg_class c ON a.attrelid = c.oid \
             WHERE c.relname = $1 AND a.attname = 'embedding' \
             AND c.relnamespace = to_regnamespace(current_schema())::oid \
             AND NOT a.attisdropped",
        )
        .bind(table)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to read embedding width of {table}"))?;

        Ok(typmod.and_then(|t| usize::try_from(t).ok()).filter(|&d| d > 0))
    }

    async fn create_table(&self, table: &str, dimension: usize) -> Result<()> {
        let statement = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             id UUID PRIMARY KEY, \
             content TEXT NOT NULL, \
             embedding VECTOR({dimension}) NOT NULL, \
             metadata JSON)",
            quoted(table)?
        );
        sqlx::query(&statement)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create table {table}"))?;
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", quoted(table)?))
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to drop table {table}"))?;
        Ok(())
    }

    async fn write_batch(&self, table: &str, records: &[VectorRecord]) -> Result<()> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        if !self.table_exists(table).await? {
            info!(
                "Table {} absent, creating it from the first batch ({} dimensions)",
                table,
                first.embedding.len()
            );
            self.create_table(table, first.embedding.len()).await?;
        }

        let statement = insert_statement(table)?;
        let mut tx = self.pool.begin().await.context("Failed to begin write")?;
        for record in records {
            bind_record(sqlx::query(&statement), record)?
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to write row {}", record.id))?;
        }
        tx.commit().await.context("Failed to commit write")?;
        Ok(())
    }

    async fn insert_row(&self, table: &str, record: &VectorRecord) -> Result<()> {
        let statement = insert_statement(table)?;
        bind_record(sqlx::query(&statement), record)?
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to insert row {}", record.id))?;
        Ok(())
    }

    async fn search(&self, table: &str, vector: &[f32], limit: usize) -> Result<Vec<ScoredRow>> {
        if !self.table_exists(table).await? {
            return Ok(Vec::new());
        }

        let statement = format!(
            "SELECT id::text AS id, content, metadata::text AS metadata, \
             (1 - (embedding <=> $1))::float4 AS score \
             FROM {} ORDER BY embedding <=> $1 LIMIT $2",
            quoted(table)?
        );
        let rows: Vec<SearchRow> = sqlx::query_as(&statement)
            .bind(Vector::from(vector.to_vec()))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to search {table}"))?;

        Ok(rows
            .into_iter()
            .map(|row| ScoredRow {
                id: row.id,
                content: row.content,
                metadata: parse_metadata(row.metadata.as_deref()),
                score: row.score,
            })
            .collect())
    }
}

fn insert_statement(table: &str) -> Result<String> {
    Ok(format!(
        "INSERT INTO {} (id, content, embedding, metadata) VALUES ($1, $2, $3, $4::text::json)",
        quoted(table)?
    ))
}

fn bind_record<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    record: &'q VectorRecord,
) -> Result<sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>> {
    let metadata = serde_json::to_string(&record.metadata).context("Failed to encode metadata")?;
    Ok(query
        .bind(record.id)
        .bind(record.content.as_str())
        .bind(Vector::from(record.embedding.clone()))
        .bind(metadata))
}

fn parse_metadata(raw: Option<&str>) -> Map<String, Value> {
    match raw.map(serde_json::from_str::<Value>) {
        Some(Ok(Value::Object(map))) => map,
        _ => Map::new(),
    }
}
