
use std::sync::Arc;

use tracing::{info, warn};

use crate::embeddings::{Embedder, embed_blocking};
use crate::{AdvisorError, Result};

/// Text embedded once at startup to learn the model's output width
pub const PROBE_SENTINEL: &str = "__dim_probe__";

/// Outcome of probing, kept next to the configured fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbedDimension {
    pub probed: Option<usize>,
    pub configured: usize,
}

impl ProbedDimension {
    /// Dimension used for table creation and validation
    #[inline]
    pub fn effective(&self) -> usize {
        self.probed.unwrap_or(self.configured)
    }

    /// Drift detection only runs against a live measurement
    #[inline]
    pub fn is_verified(&self) -> bool {
        self.probed.is_some()
    }
}

pub struct EmbeddingProbe {
    embedder: Arc<dyn Embedder>,
    configured: usize,
}

impl EmbeddingProbe {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, configured: usize) -> Self {
        Self {
            embedder,
            configured,
        }
    }

    /// Embed the sentinel and return the vector length
    #[inline]
    pub async fn probe(&self) -> Result<usize> {
        let vector = embed_blocking(Arc::clone(&self.embedder), PROBE_SENTINEL.to_string())
            .await
            .map_err(|e| AdvisorError::DimensionProbeFailed(format!("{e:#}")))?;

        if vector.is_empty() {
            return Err(AdvisorError::DimensionProbeFailed(
                "model returned an empty embedding".to_string(),
            ));
        }

        Ok(vector.len())
    }

    /// Probe, falling back to the configured width when the model is unreachable
    #[inline]
    pub async fn resolve(&self) -> ProbedDimension {
        match self.probe().await {
            Ok(dimension) => {
                if dimension == self.configured {
                    info!("Embedding model produces {} dimensions", dimension);
                } else {
                    warn!(
                        "Embedding model produces {} dimensions but {} is configured; using model output dimension",
                        dimension, self.configured
                    );
                }
                ProbedDimension {
                    probed: Some(dimension),
                    configured: self.configured,
                }
            }
            Err(e) => {
                warn!(
                    "{}; running in degraded mode with configured dimension {}",
                    e, self.configured
                );
                ProbedDimension {
                    probed: None,
                    configured: self.configured,
                }
            }
        }
    }
}
