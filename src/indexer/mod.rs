// Indexer module
// Chunks loaded documents, embeds them in batches and writes them through the
// vector store manager, then checks that the rows actually landed.

#[cfg(test)]
mod tests;

pub mod fallback;
pub mod loader;

use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ConfigError;
use crate::database::vector::{VectorRecord, VectorStoreManager};
use crate::embeddings::{
    Chunk, ChunkingConfig, Document, Embedder, chunk_documents, embed_batch_blocking,
};
use crate::query::IndexCache;

pub use fallback::FallbackPersister;
pub use loader::DocumentLoader;

/// Post-write verification settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub verify_attempts: u32,
    /// Delay before poll `n` is `n * verify_backoff_ms`
    pub verify_backoff_ms: u64,
}

impl Default for IndexingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            verify_attempts: 5,
            verify_backoff_ms: 500,
        }
    }
}

impl IndexingConfig {
    #[inline]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(1..=20).contains(&self.verify_attempts) {
            return Err(ConfigError::InvalidVerifyAttempts(self.verify_attempts));
        }
        Ok(())
    }
}

/// Statistics about one indexing run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexingStats {
    pub documents: usize,
    pub chunks_created: usize,
    pub embeddings_generated: usize,
    /// Rows written one by one after the batch write went missing
    pub fallback_rows: usize,
}

pub struct Indexer {
    manager: Arc<VectorStoreManager>,
    embedder: Arc<dyn Embedder>,
    index: Arc<IndexCache>,
    chunking: ChunkingConfig,
    batch_size: usize,
    fallback: FallbackPersister,
}

impl Indexer {
    #[inline]
    pub fn new(
        manager: Arc<VectorStoreManager>,
        embedder: Arc<dyn Embedder>,
        index: Arc<IndexCache>,
        chunking: ChunkingConfig,
        batch_size: usize,
        fallback: FallbackPersister,
    ) -> Self {
        Self {
            manager,
            embedder,
            index,
            chunking,
            batch_size: batch_size.max(1),
            fallback,
        }
    }

    /// Chunk, embed and store `documents`
    #[inline]
    pub async fn index_documents(&self, documents: &[Document]) -> Result<IndexingStats> {
        let chunks =
            chunk_documents(documents, &self.chunking).context("Failed to chunk documents")?;
        let mut stats = IndexingStats {
            documents: documents.len(),
            chunks_created: chunks.len(),
            ..IndexingStats::default()
        };

        if chunks.is_empty() {
            info!("No chunks produced from {} documents", documents.len());
            return Ok(stats);
        }

        info!(
            "Indexing {} chunks from {} documents",
            chunks.len(),
            documents.len()
        );

        let bar = progress_bar(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let records = self.embed_batch(batch).await?;
            stats.embeddings_generated += records.len();

            self.manager
                .write_batch(&records)
                .await
                .context("Failed to store embeddings")?;

            bar.inc(batch.len() as u64);
            debug!("Stored batch of {} chunks", batch.len());
        }
        bar.finish_and_clear();

        info!(
            "Documents indexed successfully - created {} text chunks",
            chunks.len()
        );

        stats.fallback_rows = self
            .fallback
            .verify_or_persist(&chunks)
            .await
            .context("Fallback persistence failed")?;

        self.index
            .refresh(&self.manager)
            .await
            .context("Failed to refresh query index")?;

        Ok(stats)
    }

    async fn embed_batch(&self, batch: &[Chunk]) -> Result<Vec<VectorRecord>> {
        let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = embed_batch_blocking(Arc::clone(&self.embedder), texts)
            .await
            .context("Failed to generate embeddings")?;
        ensure!(
            embeddings.len() == batch.len(),
            "embedding model returned {} vectors for {} chunks",
            embeddings.len(),
            batch.len()
        );

        Ok(batch
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorRecord {
                id: chunk.id,
                content: chunk.text.clone(),
                embedding,
                metadata: chunk.metadata.clone(),
            })
            .collect())
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }
    let style = ProgressStyle::with_template("{spinner} [{pos}/{len}] Embedding chunks")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    ProgressBar::new(len as u64).with_style(style)
}
