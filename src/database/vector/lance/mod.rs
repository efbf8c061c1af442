
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{ScoredRow, StoreBackendKind, VectorBackend, VectorRecord};

const EMBEDDING_COLUMN: &str = "embedding";

/// Embedded LanceDB directory. Metadata is kept as JSON text next to the
/// fixed-width embedding column.
pub struct LanceBackend {
    path: PathBuf,
    connection: OnceCell<Connection>,
}

impl LanceBackend {
    #[inline]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            connection: OnceCell::new(),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connection(&self) -> Result<&Connection> {
        self.connection
            .get_or_try_init(|| async {
                std::fs::create_dir_all(&self.path).with_context(|| {
                    format!(
                        "Failed to create vector database directory: {}",
                        self.path.display()
                    )
                })?;

                let uri = self.path.to_string_lossy().into_owned();
                debug!("Opening LanceDB at {}", uri);
                lancedb::connect(&uri)
                    .execute()
                    .await
                    .with_context(|| format!("Failed to connect to LanceDB at {uri}"))
            })
            .await
    }

    async fn open(&self, table: &str) -> Result<Option<Table>> {
        let connection = self.connection().await?;
        if !self.contains(connection, table).await? {
            return Ok(None);
        }
        let handle = connection
            .open_table(table)
            .execute()
            .await
            .with_context(|| format!("Failed to open table {table}"))?;
        Ok(Some(handle))
    }

    async fn contains(&self, connection: &Connection, table: &str) -> Result<bool> {
        let names = connection
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;
        Ok(names.iter().any(|name| name == table))
    }
}

#[async_trait]
impl VectorBackend for LanceBackend {
    fn kind(&self) -> StoreBackendKind {
        StoreBackendKind::LanceDb
    }

    async fn connect(&self) -> Result<()> {
        self.connection().await?;
        info!("LanceDB ready at {}", self.path.display());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let connection = self.connection().await?;
        connection
            .table_names()
            .execute()
            .await
            .context("LanceDB round trip failed")?;
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let connection = self.connection().await?;
        self.contains(connection, table).await
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let Some(handle) = self.open(table).await? else {
            return Ok(0);
        };
        let count = handle
            .count_rows(None)
            .await
            .with_context(|| format!("Failed to count rows in {table}"))?;
        Ok(count as u64)
    }

    async fn stored_dimension(&self, table: &str) -> Result<Option<usize>> {
        let Some(handle) = self.open(table).await? else {
            return Ok(None);
        };
        let schema = handle
            .schema()
            .await
            .with_context(|| format!("Failed to read schema of {table}"))?;

        let dimension = dimension_of(&schema);
        if dimension.is_none() {
            warn!(
                "Table {} has no fixed-width {} column",
                table, EMBEDDING_COLUMN
            );
        }
        Ok(dimension)
    }

    async fn create_table(&self, table: &str, dimension: usize) -> Result<()> {
        let connection = self.connection().await?;
        connection
            .create_empty_table(table, table_schema(dimension)?)
            .execute()
            .await
            .with_context(|| format!("Failed to create table {table}"))?;
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        let connection = self.connection().await?;
        connection
            .drop_table(table)
            .await
            .with_context(|| format!("Failed to drop table {table}"))?;
        Ok(())
    }

    async fn write_batch(&self, table: &str, records: &[VectorRecord]) -> Result<()> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        let dimension = first.embedding.len();
        let batch = record_batch(records, dimension)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);

        match self.open(table).await? {
            Some(handle) => {
                handle
                    .add(reader)
                    .execute()
                    .await
                    .with_context(|| format!("Failed to append to {table}"))?;
            }
            None => {
                info!(
                    "Table {} absent, creating it from the first batch ({} dimensions)",
                    table, dimension
                );
                self.connection()
                    .await?
                    .create_table(table, reader)
                    .execute()
                    .await
                    .with_context(|| format!("Failed to create {table} from batch"))?;
            }
        }
        Ok(())
    }

    async fn insert_row(&self, table: &str, record: &VectorRecord) -> Result<()> {
        let handle = self
            .open(table)
            .await?
            .ok_or_else(|| anyhow!("Table {table} does not exist"))?;
        let batch = record_batch(std::slice::from_ref(record), record.embedding.len())?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        handle
            .add(reader)
            .execute()
            .await
            .with_context(|| format!("Failed to insert row into {table}"))?;
        Ok(())
    }

    async fn search(&self, table: &str, vector: &[f32], limit: usize) -> Result<Vec<ScoredRow>> {
        let Some(handle) = self.open(table).await? else {
            return Ok(Vec::new());
        };

        let mut stream = handle
            .vector_search(vector)
            .context("Failed to create vector search")?
            .column(EMBEDDING_COLUMN)
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute search")?;

        let mut rows = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .context("Failed to read result stream")?
        {
            rows.extend(parse_search_batch(&batch)?);
        }

        debug!("Search on {} returned {} rows", table, rows.len());
        Ok(rows)
    }
}

fn table_schema(dimension: usize) -> Result<SchemaRef> {
    let width = i32::try_from(dimension).context("Embedding dimension does not fit in i32")?;
    Ok(Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new(
            EMBEDDING_COLUMN,
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), width),
            false,
        ),
        Field::new("metadata", DataType::Utf8, true),
    ])))
}

fn dimension_of(schema: &Schema) -> Option<usize> {
    let field = schema.field_with_name(EMBEDDING_COLUMN).ok()?;
    match field.data_type() {
        DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
        _ => None,
    }
}

fn record_batch(records: &[VectorRecord], dimension: usize) -> Result<RecordBatch> {
    let schema = table_schema(dimension)?;
    let width = i32::try_from(dimension).context("Embedding dimension does not fit in i32")?;

    let mut flat_values = Vec::with_capacity(records.len() * dimension);
    let mut metadata = Vec::with_capacity(records.len());
    for record in records {
        flat_values.extend_from_slice(&record.embedding);
        metadata.push(serde_json::to_string(&record.metadata).context("Failed to encode metadata")?);
    }

    let ids: Vec<String> = records.iter().map(|r| r.id.to_string()).collect();
    let contents: Vec<&str> = records.iter().map(|r| r.content.as_str()).collect();

    let item_field = Arc::new(Field::new("item", DataType::Float32, true));
    let embeddings = FixedSizeListArray::try_new(
        item_field,
        width,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .context("Failed to create embedding array")?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(StringArray::from(contents)),
        Arc::new(embeddings),
        Arc::new(StringArray::from(metadata)),
    ];

    RecordBatch::try_new(schema, arrays).context("Failed to create record batch")
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("Missing {name} column"))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| anyhow!("Invalid {name} column type"))
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<ScoredRow>> {
    let ids = string_column(batch, "id")?;
    let contents = string_column(batch, "content")?;
    let metadata = string_column(batch, "metadata")?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    let mut rows = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let metadata = if metadata.is_null(row) {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(metadata.value(row)) {
                Ok(Value::Object(map)) => map,
                _ => {
                    warn!("Row {} carries unreadable metadata", ids.value(row));
                    Map::new()
                }
            }
        };

        let distance = distances
            .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

        rows.push(ScoredRow {
            id: ids.value(row).to_string(),
            content: contents.value(row).to_string(),
            metadata,
            score: 1.0 - distance,
        });
    }
    Ok(rows)
}
