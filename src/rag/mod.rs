// Explicit application context: every handle the pipelines need, built once
// at startup, plus the service facade the CLI talks to.


use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use crate::config::Config;
use crate::database::sqlite::Database;
use crate::database::vector::{
    AdminOutcome, DataLoss, ReconcileOutcome, SchemaReconciler, SchemaStatus, VectorStoreManager,
};
use crate::embeddings::{
    Completer, Document, Embedder, EmbeddingProbe, OllamaClient, ProbedDimension,
};
use crate::health::{HealthMonitor, HealthStatus};
use crate::indexer::{FallbackPersister, Indexer, IndexingStats};
use crate::query::{IndexCache, QueryPipeline, QueryRequest, QueryResponse};
use crate::{AdvisorError, GENERIC_QUERY_ERROR, Result};

pub struct RagContext {
    config: Config,
    manager: Arc<VectorStoreManager>,
    embedder: Arc<dyn Embedder>,
    completer: Arc<dyn Completer>,
    dimensions: ProbedDimension,
    index: Arc<IndexCache>,
}

impl RagContext {
    /// Connect to the configured store and models and probe the embedding
    /// width. The table is not touched; call [`RagContext::reconcile`] next or
    /// use [`RagContext::initialize`].
    #[inline]
    pub async fn connect(config: Config) -> Result<Self> {
        let client = OllamaClient::new(&config.ollama).map_err(|e| {
            error!("Failed to set up model client: {:#}", e);
            AdvisorError::ModelSetupFailed(format!("{e:#}"))
        })?;
        let client = Arc::new(client);
        let manager = Arc::new(VectorStoreManager::from_config(&config));

        Self::from_parts(config, manager, Arc::<OllamaClient>::clone(&client), client).await
    }

    /// Connect and reconcile in one step, ready for queries
    #[inline]
    pub async fn initialize(config: Config) -> Result<Self> {
        let context = Self::connect(config).await?;
        context.reconcile().await?;
        Ok(context)
    }

    #[inline]
    pub async fn from_parts(
        config: Config,
        manager: Arc<VectorStoreManager>,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
    ) -> Result<Self> {
        manager.ensure_connected().await?;

        let configured = usize::try_from(config.ollama.embedding_dimension).unwrap_or(usize::MAX);
        let dimensions = EmbeddingProbe::new(Arc::clone(&embedder), configured)
            .resolve()
            .await;

        Ok(Self {
            config,
            manager,
            embedder,
            completer,
            dimensions,
            index: Arc::new(IndexCache::new()),
        })
    }

    /// Startup reconciliation; marks the store opened on success
    #[inline]
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        let outcome = self.reconciler().reconcile(self.dimensions).await?;
        if matches!(outcome, ReconcileOutcome::Recreated { .. }) {
            self.index.reset().await;
        }
        self.manager.mark_opened();
        info!("Vector store ready: {:?}", outcome);
        Ok(outcome)
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn manager(&self) -> &Arc<VectorStoreManager> {
        &self.manager
    }

    #[inline]
    pub fn dimensions(&self) -> ProbedDimension {
        self.dimensions
    }

    #[inline]
    pub fn index(&self) -> &Arc<IndexCache> {
        &self.index
    }

    #[inline]
    pub fn reconciler(&self) -> SchemaReconciler {
        SchemaReconciler::new(Arc::clone(&self.manager))
    }

    #[inline]
    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.embedder),
            Arc::clone(&self.completer),
            Arc::clone(&self.index),
        )
    }

    #[inline]
    pub fn query_pipeline(&self) -> QueryPipeline {
        QueryPipeline::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.embedder),
            Arc::clone(&self.completer),
            self.health_monitor(),
            Arc::clone(&self.index),
            self.config.retrieval.clone(),
        )
    }

    #[inline]
    pub fn indexer(&self) -> Indexer {
        let fallback = FallbackPersister::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.embedder),
            self.dimensions.effective(),
            self.config.indexing.clone(),
        );
        Indexer::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.embedder),
            Arc::clone(&self.index),
            self.config.chunking.clone(),
            usize::try_from(self.config.ollama.batch_size).unwrap_or(1),
            fallback,
        )
    }

    #[inline]
    pub async fn check_schema_status(&self) -> Result<SchemaStatus> {
        self.reconciler().check_schema_status(self.dimensions).await
    }

    #[inline]
    pub async fn create_table(&self) -> Result<AdminOutcome> {
        self.reconciler().create_table(self.dimensions).await
    }

    #[inline]
    pub async fn recreate_table(&self, consent: DataLoss) -> Result<AdminOutcome> {
        let outcome = self
            .reconciler()
            .recreate_table(self.dimensions, consent)
            .await?;
        if matches!(outcome, AdminOutcome::Recreated { .. }) {
            self.index.reset().await;
        }
        Ok(outcome)
    }

    /// Drop every stored chunk and start over with an empty table
    #[inline]
    pub async fn clear_index(&self) -> Result<AdminOutcome> {
        info!("Clearing vector index {}", self.manager.table_name());
        self.recreate_table(DataLoss::Accept).await
    }

    #[inline]
    pub async fn document_count(&self) -> Result<u64> {
        self.manager.row_count().await
    }
}

/// Caller-facing operations over a [`RagContext`]
pub struct RagService {
    context: Arc<RagContext>,
    pipeline: QueryPipeline,
    history: Option<Database>,
}

impl RagService {
    #[inline]
    pub fn new(context: Arc<RagContext>, history: Option<Database>) -> Self {
        let pipeline = context.query_pipeline();
        Self {
            context,
            pipeline,
            history,
        }
    }

    #[inline]
    pub fn context(&self) -> &RagContext {
        &self.context
    }

    /// Never fails; errors become the generic message and are recorded
    #[inline]
    pub async fn query(&self, request: &QueryRequest) -> QueryResponse {
        self.try_query(request)
            .await
            .unwrap_or_else(|_| failure_response())
    }

    /// Typed errors for callers that want them. History is recorded either way.
    #[inline]
    pub async fn try_query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let result = self.pipeline.query(request).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(response) => {
                info!(
                    "Answered query in {}ms with {} sources",
                    elapsed.as_millis(),
                    response.source_documents.len()
                );
                if let Some(history) = &self.history {
                    history.try_record(request, response, elapsed, None).await;
                }
            }
            Err(e) => {
                error!("Query failed: {}", e);
                if let Some(history) = &self.history {
                    let detail = e.to_string();
                    history
                        .try_record(request, &failure_response(), elapsed, Some(&detail))
                        .await;
                }
            }
        }

        result
    }

    #[inline]
    pub async fn index_documents(&self, documents: &[Document]) -> Result<IndexingStats> {
        if documents.is_empty() {
            return Err(AdvisorError::NoDocuments);
        }
        self.context
            .indexer()
            .index_documents(documents)
            .await
            .map_err(|e| {
                error!("Indexing failed: {:#}", e);
                AdvisorError::IndexingFailed(format!("{e:#}"))
            })
    }

    #[inline]
    pub async fn health(&self, require_index: bool) -> HealthStatus {
        self.context.health_monitor().check(require_index).await
    }

    #[inline]
    pub async fn document_count(&self) -> Result<u64> {
        self.context.document_count().await
    }

    #[inline]
    pub async fn clear_index(&self) -> Result<AdminOutcome> {
        self.context.clear_index().await
    }
}

fn failure_response() -> QueryResponse {
    QueryResponse {
        chat_response: GENERIC_QUERY_ERROR.to_string(),
        source_documents: Vec::new(),
    }
}
