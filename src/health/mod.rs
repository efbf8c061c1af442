
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::database::vector::VectorStoreManager;
use crate::embeddings::{Completer, Embedder};
use crate::query::IndexCache;

/// Readiness snapshot, recomputed on every check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub store_connected: bool,
    pub vector_store_ready: bool,
    pub models_ready: bool,
    pub index_ready: bool,
}

impl HealthStatus {
    /// Store reachable, reconciled, and both models configured
    #[inline]
    pub fn is_basic_ready(&self) -> bool {
        self.store_connected && self.vector_store_ready && self.models_ready
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.is_basic_ready() && self.index_ready
    }
}

impl fmt::Display for HealthStatus {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "store_connected={}, vector_store_ready={}, models_ready={}, index_ready={}",
            self.store_connected, self.vector_store_ready, self.models_ready, self.index_ready
        )
    }
}

#[derive(Clone)]
pub struct HealthMonitor {
    manager: Arc<VectorStoreManager>,
    embedder: Arc<dyn Embedder>,
    completer: Arc<dyn Completer>,
    index: Arc<IndexCache>,
}

impl HealthMonitor {
    #[inline]
    pub fn new(
        manager: Arc<VectorStoreManager>,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
        index: Arc<IndexCache>,
    ) -> Self {
        Self {
            manager,
            embedder,
            completer,
            index,
        }
    }

    #[inline]
    pub async fn check(&self, require_index: bool) -> HealthStatus {
        let status = HealthStatus {
            store_connected: self.manager.ping().await,
            vector_store_ready: self.manager.is_opened(),
            models_ready: self.embedder.is_ready() && self.completer.is_ready(),
            index_ready: !require_index || self.index.is_cached().await,
        };
        debug!("Health check: {}", status);
        status
    }
}
