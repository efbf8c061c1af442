// Vector store: the backend seam, the schema-owning manager and the reconciler.

#[cfg(test)]
mod tests;

pub mod lance;
pub mod postgres;
pub mod reconciler;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, ConfigError, is_valid_table_name};
use crate::{AdvisorError, Result};

pub use lance::LanceBackend;
pub use postgres::PgVectorBackend;
pub use reconciler::{AdminOutcome, ReconcileOutcome, SchemaReconciler, SchemaStatus};

pub const DEFAULT_TABLE_NAME: &str = "ultimate_advisor_docs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StoreBackendKind {
    #[default]
    #[serde(rename = "lancedb")]
    LanceDb,
    #[serde(rename = "postgres")]
    Postgres,
}

impl fmt::Display for StoreBackendKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LanceDb => f.write_str("lancedb"),
            Self::Postgres => f.write_str("postgres"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
    pub table_name: String,
    pub postgres: PostgresConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::default(),
            table_name: DEFAULT_TABLE_NAME.to_string(),
            postgres: PostgresConfig::default(),
        }
    }
}

impl StoreConfig {
    #[inline]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !is_valid_table_name(&self.table_name) {
            return Err(ConfigError::InvalidTableName(self.table_name.clone()));
        }
        self.postgres.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_connections: 10,
        }
    }
}

impl PostgresConfig {
    #[inline]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if !(1..=100).contains(&self.max_connections) {
            return Err(ConfigError::InvalidPoolSize(self.max_connections));
        }
        Ok(())
    }

    /// `host:port/database`, without credentials
    #[inline]
    pub fn display_target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    pub(crate) fn connect_options(&self) -> sqlx::postgres::PgConnectOptions {
        let options = sqlx::postgres::PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database);
        if self.password.is_empty() {
            options
        } else {
            options.password(&self.password)
        }
    }
}

/// One row as written to the store
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: Uuid,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Map<String, Value>,
}

/// One search hit, `score = 1 - cosine distance`
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRow {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VectorStoreSchema {
    pub table_name: String,
    pub dimension: Option<usize>,
    pub row_count: u64,
}

/// Consent for operations that can destroy stored rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLoss {
    Accept,
    Refuse,
}

/// Physical storage operations. Implementations never take locks of their
/// own; serialization of schema changes lives in [`VectorStoreManager`].
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn kind(&self) -> StoreBackendKind;

    /// Open connections and make sure any storage extension exists
    async fn connect(&self) -> anyhow::Result<()>;

    /// Cheap round trip
    async fn ping(&self) -> anyhow::Result<()>;

    async fn table_exists(&self, table: &str) -> anyhow::Result<bool>;

    /// Zero when the table is absent
    async fn row_count(&self, table: &str) -> anyhow::Result<u64>;

    /// `None` when the table is absent or its width cannot be read
    async fn stored_dimension(&self, table: &str) -> anyhow::Result<Option<usize>>;

    async fn create_table(&self, table: &str, dimension: usize) -> anyhow::Result<()>;

    async fn drop_table(&self, table: &str) -> anyhow::Result<()>;

    /// Bulk write; creates the table from the records when it is absent
    async fn write_batch(&self, table: &str, records: &[VectorRecord]) -> anyhow::Result<()>;

    /// Single-row write into an existing table
    async fn insert_row(&self, table: &str, record: &VectorRecord) -> anyhow::Result<()>;

    /// Rows ordered by descending similarity
    async fn search(
        &self,
        table: &str,
        vector: &[f32],
        limit: usize,
    ) -> anyhow::Result<Vec<ScoredRow>>;
}

/// Owner of the logical table. Reads and writes share the schema lock;
/// anything that changes the table's shape holds it exclusively.
pub struct VectorStoreManager {
    backend: Arc<dyn VectorBackend>,
    table_name: String,
    schema_lock: RwLock<()>,
    opened: AtomicBool,
}

impl fmt::Debug for VectorStoreManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorStoreManager")
            .field("backend", &self.backend.kind())
            .field("table_name", &self.table_name)
            .field("opened", &self.is_opened())
            .finish()
    }
}

impl VectorStoreManager {
    #[inline]
    pub fn new(backend: Arc<dyn VectorBackend>, table_name: impl Into<String>) -> Self {
        Self {
            backend,
            table_name: table_name.into(),
            schema_lock: RwLock::new(()),
            opened: AtomicBool::new(false),
        }
    }

    /// Build the backend named in the configuration
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        let backend: Arc<dyn VectorBackend> = match config.store.backend {
            StoreBackendKind::LanceDb => Arc::new(LanceBackend::new(config.vector_database_path())),
            StoreBackendKind::Postgres => Arc::new(PgVectorBackend::new(&config.store.postgres)),
        };
        Self::new(backend, config.store.table_name.clone())
    }

    #[inline]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    #[inline]
    pub fn backend_kind(&self) -> StoreBackendKind {
        self.backend.kind()
    }

    /// Whether startup reconciliation completed
    #[inline]
    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn mark_opened(&self) {
        self.opened.store(true, Ordering::Release);
    }

    #[inline]
    pub async fn ensure_connected(&self) -> Result<()> {
        self.backend.connect().await.map_err(|e| {
            error!("Vector store connection failed: {:#}", e);
            AdvisorError::StoreUnavailable(format!("{e:#}"))
        })?;
        debug!("Connected to {} vector store", self.backend.kind());
        Ok(())
    }

    #[inline]
    pub async fn ping(&self) -> bool {
        match self.backend.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Vector store ping failed: {:#}", e);
                false
            }
        }
    }

    #[inline]
    pub async fn table_exists(&self) -> Result<bool> {
        let _shared = self.schema_lock.read().await;
        table_exists(self.backend.as_ref(), &self.table_name).await
    }

    #[inline]
    pub async fn row_count(&self) -> Result<u64> {
        let _shared = self.schema_lock.read().await;
        row_count(self.backend.as_ref(), &self.table_name).await
    }

    #[inline]
    pub async fn stored_dimension(&self) -> Result<Option<usize>> {
        let _shared = self.schema_lock.read().await;
        stored_dimension(self.backend.as_ref(), &self.table_name).await
    }

    #[inline]
    pub async fn schema(&self) -> Result<VectorStoreSchema> {
        let _shared = self.schema_lock.read().await;
        Ok(VectorStoreSchema {
            table_name: self.table_name.clone(),
            dimension: stored_dimension(self.backend.as_ref(), &self.table_name).await?,
            row_count: row_count(self.backend.as_ref(), &self.table_name).await?,
        })
    }

    /// Create the table unless it exists with the same width. Returns whether
    /// a table was created.
    #[inline]
    pub async fn create_table(&self, dimension: usize) -> Result<bool> {
        self.admin().await.create_table(dimension).await
    }

    /// Drop the table. Without consent only an empty table is dropped.
    #[inline]
    pub async fn drop_table(&self, consent: DataLoss) -> Result<bool> {
        let session = self.admin().await;
        if consent == DataLoss::Refuse {
            let rows = session.row_count().await?;
            if rows > 0 {
                return Err(AdvisorError::InvalidRequest(format!(
                    "table '{}' holds {} rows; dropping it requires consent",
                    self.table_name, rows
                )));
            }
        }
        session.drop_table().await
    }

    /// Exclusive session for check-then-act schema changes
    #[inline]
    pub async fn admin(&self) -> AdminSession<'_> {
        AdminSession {
            manager: self,
            _guard: self.schema_lock.write().await,
        }
    }

    /// Primary write. Every vector must match the stored width, or share one
    /// width when the table does not exist yet. A missing table is created
    /// under the exclusive lock before the rows are written.
    #[inline]
    pub async fn write_batch(&self, records: &[VectorRecord]) -> Result<()> {
        let Some(first) = records.first() else {
            debug!("No records to write");
            return Ok(());
        };

        let width = first.embedding.len();
        if !self.table_exists().await? {
            validate_widths(records, width)?;
            self.admin().await.create_table(width).await?;
        }

        let _shared = self.schema_lock.read().await;
        let stored = stored_dimension(self.backend.as_ref(), &self.table_name).await?;
        let expected = stored.unwrap_or(width);
        validate_widths(records, expected)?;

        self.backend
            .write_batch(&self.table_name, records)
            .await
            .map_err(|e| {
                error!("Batch write of {} records failed: {:#}", records.len(), e);
                AdvisorError::Database(format!("{e:#}"))
            })?;

        debug!("Wrote {} records to {}", records.len(), self.table_name);
        Ok(())
    }

    /// Manual single-row write; the table must already exist
    #[inline]
    pub async fn insert_row(&self, record: &VectorRecord) -> Result<()> {
        let _shared = self.schema_lock.read().await;
        let Some(stored) = stored_dimension(self.backend.as_ref(), &self.table_name).await? else {
            return Err(AdvisorError::Database(format!(
                "table '{}' does not exist",
                self.table_name
            )));
        };
        validate_widths(std::slice::from_ref(record), stored)?;

        self.backend
            .insert_row(&self.table_name, record)
            .await
            .map_err(|e| AdvisorError::Database(format!("{e:#}")))
    }

    #[inline]
    pub async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredRow>> {
        let _shared = self.schema_lock.read().await;
        let mut rows = self
            .backend
            .search(&self.table_name, vector, limit)
            .await
            .map_err(|e| AdvisorError::Database(format!("{e:#}")))?;

        rows.sort_by(|a, b| b.score.total_cmp(&a.score));
        rows.truncate(limit);
        Ok(rows)
    }
}

/// Holds the schema lock exclusively for its whole lifetime
pub struct AdminSession<'a> {
    manager: &'a VectorStoreManager,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl AdminSession<'_> {
    #[inline]
    pub fn table_name(&self) -> &str {
        &self.manager.table_name
    }

    #[inline]
    pub async fn table_exists(&self) -> Result<bool> {
        table_exists(self.manager.backend.as_ref(), &self.manager.table_name).await
    }

    #[inline]
    pub async fn row_count(&self) -> Result<u64> {
        row_count(self.manager.backend.as_ref(), &self.manager.table_name).await
    }

    #[inline]
    pub async fn stored_dimension(&self) -> Result<Option<usize>> {
        stored_dimension(self.manager.backend.as_ref(), &self.manager.table_name).await
    }

    #[inline]
    pub async fn create_table(&self, dimension: usize) -> Result<bool> {
        if dimension == 0 {
            return Err(AdvisorError::InvalidRequest(
                "table dimension must be positive".to_string(),
            ));
        }

        if self.table_exists().await? {
            return match self.stored_dimension().await? {
                Some(stored) if stored == dimension => {
                    debug!(
                        "Table {} already exists with {} dimensions",
                        self.table_name(),
                        stored
                    );
                    Ok(false)
                }
                Some(stored) => Err(AdvisorError::DimensionMismatch {
                    stored,
                    expected: dimension,
                }),
                None => Err(AdvisorError::Database(format!(
                    "table '{}' exists but its dimension cannot be read",
                    self.table_name()
                ))),
            };
        }

        self.manager
            .backend
            .create_table(&self.manager.table_name, dimension)
            .await
            .map_err(|e| AdvisorError::Database(format!("{e:#}")))?;
        info!(
            "Created table {} with {} dimensions",
            self.table_name(),
            dimension
        );
        Ok(true)
    }

    /// Returns whether a table was dropped
    #[inline]
    pub async fn drop_table(&self) -> Result<bool> {
        if !self.table_exists().await? {
            return Ok(false);
        }
        self.manager
            .backend
            .drop_table(&self.manager.table_name)
            .await
            .map_err(|e| AdvisorError::Database(format!("{e:#}")))?;
        info!("Dropped table {}", self.table_name());
        Ok(true)
    }
}

async fn table_exists(backend: &dyn VectorBackend, table: &str) -> Result<bool> {
    backend
        .table_exists(table)
        .await
        .map_err(|e| AdvisorError::Database(format!("{e:#}")))
}

async fn row_count(backend: &dyn VectorBackend, table: &str) -> Result<u64> {
    backend
        .row_count(table)
        .await
        .map_err(|e| AdvisorError::Database(format!("{e:#}")))
}

async fn stored_dimension(backend: &dyn VectorBackend, table: &str) -> Result<Option<usize>> {
    backend
        .stored_dimension(table)
        .await
        .map_err(|e| AdvisorError::Database(format!("{e:#}")))
}

fn validate_widths(records: &[VectorRecord], expected: usize) -> Result<()> {
    match records.iter().find(|r| r.embedding.len() != expected) {
        Some(bad) => Err(AdvisorError::DimensionMismatch {
            stored: expected,
            expected: bad.embedding.len(),
        }),
        None => Ok(()),
    }
}
