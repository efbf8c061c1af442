
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::IndexingConfig;
use crate::database::vector::{VectorRecord, VectorStoreManager};
use crate::embeddings::{Chunk, Embedder, embed_blocking};

/// Detects batch writes that reported success but left no rows, and redoes
/// them one row at a time
pub struct FallbackPersister {
    manager: Arc<VectorStoreManager>,
    embedder: Arc<dyn Embedder>,
    dimension: usize,
    config: IndexingConfig,
}

impl FallbackPersister {
    #[inline]
    pub fn new(
        manager: Arc<VectorStoreManager>,
        embedder: Arc<dyn Embedder>,
        dimension: usize,
        config: IndexingConfig,
    ) -> Self {
        Self {
            manager,
            embedder,
            dimension,
            config,
        }
    }

    /// Returns the number of rows written manually, zero when the primary
    /// write is visible
    #[inline]
    pub async fn verify_or_persist(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        if self.rows_visible().await? {
            return Ok(0);
        }

        warn!(
            "Vector store is still empty after writing {} chunks; persisting them manually",
            chunks.len()
        );

        if self
            .manager
            .create_table(self.dimension)
            .await
            .context("Failed to create table for manual persistence")?
        {
            info!(
                "Created table {} with {} dimensions for manual persistence",
                self.manager.table_name(),
                self.dimension
            );
        }

        let mut written = 0;
        for chunk in chunks {
            let embedding = embed_blocking(Arc::clone(&self.embedder), chunk.text.clone())
                .await
                .with_context(|| format!("Failed to embed chunk {}", chunk.id))?;
            let record = VectorRecord {
                id: chunk.id,
                content: chunk.text.clone(),
                embedding,
                metadata: chunk.metadata.clone(),
            };
            self.manager
                .insert_row(&record)
                .await
                .with_context(|| format!("Failed to insert chunk {}", chunk.id))?;
            written += 1;
        }

        info!("Manually persisted {} chunks", written);
        Ok(written)
    }

    async fn rows_visible(&self) -> Result<bool> {
        let attempts = self.config.verify_attempts.max(1);
        for attempt in 1..=attempts {
            let rows = self
                .manager
                .row_count()
                .await
                .context("Failed to count rows after write")?;
            if rows > 0 {
                debug!("Verified {} rows after {} attempt(s)", rows, attempt);
                return Ok(true);
            }
            if attempt < attempts {
                let delay = self.config.verify_backoff_ms * u64::from(attempt);
                debug!(
                    "No rows visible yet (attempt {}/{}), retrying in {}ms",
                    attempt, attempts, delay
                );
                sleep(Duration::from_millis(delay)).await;
            }
        }
        Ok(false)
    }
}
