// Retrieval: request/response shapes, the cached query index and the
// embed → search → cutoff → summarize pipeline.


pub mod metadata;
pub mod synthesis;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::ConfigError;
use crate::database::vector::{ScoredRow, VectorStoreManager};
use crate::embeddings::{Completer, Embedder, embed_blocking};
use crate::health::HealthMonitor;
use crate::{AdvisorError, Result};

pub use metadata::{DocumentMetadata, UNKNOWN_DOCUMENT, resolve_metadata};
pub use synthesis::{EMPTY_RESPONSE, TreeSummarizer};

const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates scoring below this are discarded before synthesis
    pub similarity_cutoff: f32,
    pub over_fetch_factor: usize,
    pub max_candidates: usize,
    pub context_window_tokens: usize,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self {
            similarity_cutoff: 0.6,
            over_fetch_factor: 2,
            max_candidates: 15,
            context_window_tokens: 3900,
        }
    }
}

impl RetrievalConfig {
    #[inline]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.similarity_cutoff) {
            return Err(ConfigError::InvalidSimilarityCutoff(self.similarity_cutoff));
        }
        if !(1..=10).contains(&self.over_fetch_factor) {
            return Err(ConfigError::InvalidOverFetchFactor(self.over_fetch_factor));
        }
        if !(1..=200).contains(&self.max_candidates) {
            return Err(ConfigError::InvalidMaxCandidates(self.max_candidates));
        }
        if self.context_window_tokens < 256 {
            return Err(ConfigError::InvalidContextWindow(
                self.context_window_tokens,
            ));
        }
        Ok(())
    }

    /// Rows fetched from the store before the cutoff is applied
    #[inline]
    pub fn candidate_count(&self, top_k: usize) -> usize {
        top_k
            .saturating_mul(self.over_fetch_factor)
            .min(self.max_candidates)
    }
}

const fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl QueryRequest {
    #[inline]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: DEFAULT_TOP_K,
        }
    }

    #[inline]
    #[must_use]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(AdvisorError::InvalidRequest(
                "query must not be empty".to_string(),
            ));
        }
        if self.top_k == 0 {
            return Err(AdvisorError::InvalidRequest(
                "top_k must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub content: String,
    pub score: f32,
    pub metadata: DocumentMetadata,
}

impl From<ScoredRow> for SourceDocument {
    #[inline]
    fn from(row: ScoredRow) -> Self {
        Self {
            metadata: resolve_metadata(&row.metadata),
            content: row.content,
            score: row.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub chat_response: String,
    pub source_documents: Vec<SourceDocument>,
}

/// Handle over the populated table, as seen when it was materialized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryIndex {
    pub table_name: String,
    pub dimension: Option<usize>,
}

/// Lazily built [`QueryIndex`], shared by the pipeline, the indexer and the
/// health monitor. Reset whenever the table is cleared or recreated.
#[derive(Debug, Default)]
pub struct IndexCache {
    slot: RwLock<Option<Arc<QueryIndex>>>,
}

impl IndexCache {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub async fn is_cached(&self) -> bool {
        self.slot.read().await.is_some()
    }

    #[inline]
    pub async fn get_or_materialize(
        &self,
        manager: &VectorStoreManager,
    ) -> Result<Arc<QueryIndex>> {
        let cached = self.slot.read().await.clone();
        if let Some(index) = cached {
            return Ok(index);
        }

        let mut slot = self.slot.write().await;
        if let Some(index) = slot.as_ref() {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(materialize(manager).await?);
        info!(
            "Query index ready over {} ({:?} dimensions)",
            index.table_name, index.dimension
        );
        *slot = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Rebuild from the current table, e.g. after new rows were written
    #[inline]
    pub async fn refresh(&self, manager: &VectorStoreManager) -> Result<Arc<QueryIndex>> {
        let index = Arc::new(materialize(manager).await?);
        *self.slot.write().await = Some(Arc::clone(&index));
        debug!("Query index refreshed");
        Ok(index)
    }

    #[inline]
    pub async fn reset(&self) {
        let previous = self.slot.write().await.take();
        if previous.is_some() {
            debug!("Query index cache dropped");
        }
    }
}

async fn materialize(manager: &VectorStoreManager) -> Result<QueryIndex> {
    Ok(QueryIndex {
        table_name: manager.table_name().to_string(),
        dimension: manager.stored_dimension().await?,
    })
}

pub struct QueryPipeline {
    manager: Arc<VectorStoreManager>,
    embedder: Arc<dyn Embedder>,
    summarizer: TreeSummarizer,
    health: HealthMonitor,
    index: Arc<IndexCache>,
    config: RetrievalConfig,
}

impl QueryPipeline {
    #[inline]
    pub fn new(
        manager: Arc<VectorStoreManager>,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
        health: HealthMonitor,
        index: Arc<IndexCache>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            manager,
            embedder,
            summarizer: TreeSummarizer::new(completer, config.context_window_tokens),
            health,
            index,
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Gate on health and row count, then retrieve and synthesize
    #[inline]
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        request.validate()?;

        let status = self.health.check(false).await;
        if !status.is_basic_ready() {
            error!("Query rejected, system not ready: {}", status);
            return Err(AdvisorError::NotReady(status));
        }

        let rows = self
            .manager
            .row_count()
            .await
            .map_err(|e| query_failed("counting stored rows", &e))?;
        if rows == 0 {
            info!("Query rejected, vector store is empty");
            return Err(AdvisorError::EmptyStore);
        }

        self.retrieve(request)
            .await
            .map_err(|e| query_failed("answering query", &e))
    }

    async fn retrieve(&self, request: &QueryRequest) -> anyhow::Result<QueryResponse> {
        let index = self.index.get_or_materialize(&self.manager).await?;

        let candidates = self.config.candidate_count(request.top_k);
        let vector = embed_blocking(Arc::clone(&self.embedder), request.query.clone()).await?;
        if let Some(stored) = index.dimension.filter(|stored| *stored != vector.len()) {
            warn!(
                "Query embedding has {} dimensions but {} stores {}; searching anyway",
                vector.len(),
                index.table_name,
                stored
            );
        }

        let hits = self.manager.search(&vector, candidates).await?;
        let fetched = hits.len();
        let survivors: Vec<ScoredRow> = hits
            .into_iter()
            .filter(|row| row.score >= self.config.similarity_cutoff)
            .collect();
        debug!(
            "Retrieved {} candidates (limit {}), {} above cutoff {}",
            fetched,
            candidates,
            survivors.len(),
            self.config.similarity_cutoff
        );

        let passages = survivors.iter().map(|row| row.content.clone()).collect();
        let chat_response = self.summarizer.summarize(&request.query, passages).await?;

        let source_documents = survivors
            .into_iter()
            .take(request.top_k)
            .map(SourceDocument::from)
            .collect();

        Ok(QueryResponse {
            chat_response,
            source_documents,
        })
    }
}

fn query_failed(step: &str, e: &dyn std::fmt::Display) -> AdvisorError {
    error!("Query failed while {}: {:#}", step, e);
    AdvisorError::QueryFailed(format!("{step}: {e:#}"))
}
