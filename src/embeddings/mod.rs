// Model-facing side of the pipeline: the embedding/completion seams, the
// Ollama client behind them, the dimension probe and the chunker.

pub mod chunking;
pub mod ollama;
pub mod probe;

use std::sync::Arc;

use anyhow::{Context, Result};

pub use chunking::{Chunk, ChunkingConfig, Document, chunk_documents, count_tokens};
pub use ollama::OllamaClient;
pub use probe::{EmbeddingProbe, ProbedDimension};

/// Text to vector. Implementations block, so async callers go through
/// [`embed_blocking`] / [`embed_batch_blocking`].
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    #[inline]
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    /// Whether a model is configured; no network round trip
    #[inline]
    fn is_ready(&self) -> bool {
        true
    }
}

/// Prompt plus retrieved context to answer text
pub trait Completer: Send + Sync {
    fn complete(&self, prompt: &str, context: &str) -> Result<String>;

    #[inline]
    fn is_ready(&self) -> bool {
        true
    }
}

#[inline]
pub async fn embed_blocking(embedder: Arc<dyn Embedder>, text: String) -> Result<Vec<f32>> {
    tokio::task::spawn_blocking(move || embedder.embed(&text))
        .await
        .context("Embedding task panicked")?
}

#[inline]
pub async fn embed_batch_blocking(
    embedder: Arc<dyn Embedder>,
    texts: Vec<String>,
) -> Result<Vec<Vec<f32>>> {
    tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
        .await
        .context("Embedding task panicked")?
}

#[inline]
pub async fn complete_blocking(
    completer: Arc<dyn Completer>,
    prompt: String,
    context: String,
) -> Result<String> {
    tokio::task::spawn_blocking(move || completer.complete(&prompt, &context))
        .await
        .context("Completion task panicked")?
}
