// In-memory stand-ins for the store and the models

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::database::vector::{
    ScoredRow, StoreBackendKind, VectorBackend, VectorRecord, VectorStoreManager,
};
use crate::embeddings::{Completer, Embedder};

pub(crate) const TEST_TABLE: &str = "advisor_docs";

#[derive(Debug, Default)]
struct MemoryTable {
    dimension: usize,
    rows: Vec<VectorRecord>,
}

/// Vector backend over a `HashMap`, with switches for failure modes
#[derive(Debug, Default)]
pub(crate) struct MemoryBackend {
    tables: Mutex<HashMap<String, MemoryTable>>,
    pub offline: AtomicBool,
    /// Accept batch writes without storing them
    pub drop_batches: AtomicBool,
    pub hide_dimension: AtomicBool,
    pub searches: AtomicUsize,
    pub last_search_limit: AtomicUsize,
    pub creates: AtomicUsize,
    pub drops: AtomicUsize,
}

impl MemoryBackend {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn with_table(dimension: usize, rows: usize) -> Arc<Self> {
        let backend = Self::default();
        {
            let mut tables = backend.tables.lock().expect("lock should not be poisoned");
            tables.insert(
                TEST_TABLE.to_string(),
                MemoryTable {
                    dimension,
                    rows: (0..rows)
                        .map(|i| VectorRecord {
                            id: uuid::Uuid::new_v4(),
                            content: format!("seed row {i}"),
                            embedding: vec![1.0; dimension],
                            metadata: serde_json::Map::new(),
                        })
                        .collect(),
                },
            );
        }
        Arc::new(backend)
    }

    pub(crate) fn manager(self: &Arc<Self>) -> Arc<VectorStoreManager> {
        let backend: Arc<dyn VectorBackend> = Arc::<Self>::clone(self);
        Arc::new(VectorStoreManager::new(backend, TEST_TABLE))
    }

    pub(crate) fn rows(&self) -> Vec<VectorRecord> {
        self.tables
            .lock()
            .expect("lock should not be poisoned")
            .get(TEST_TABLE)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(anyhow!("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    fn kind(&self) -> StoreBackendKind {
        StoreBackendKind::LanceDb
    }

    async fn connect(&self) -> Result<()> {
        self.check_online()
    }

    async fn ping(&self) -> Result<()> {
        self.check_online()
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        self.check_online()?;
        Ok(self.tables.lock().expect("lock").contains_key(table))
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        self.check_online()?;
        Ok(self
            .tables
            .lock()
            .expect("lock")
            .get(table)
            .map_or(0, |t| t.rows.len() as u64))
    }

    async fn stored_dimension(&self, table: &str) -> Result<Option<usize>> {
        self.check_online()?;
        if self.hide_dimension.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.tables.lock().expect("lock").get(table).map(|t| t.dimension))
    }

    async fn create_table(&self, table: &str, dimension: usize) -> Result<()> {
        self.check_online()?;
        let mut tables = self.tables.lock().expect("lock");
        if tables.contains_key(table) {
            return Err(anyhow!("table {table} already exists"));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        tables.insert(
            table.to_string(),
            MemoryTable {
                dimension,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.check_online()?;
        self.drops.fetch_add(1, Ordering::SeqCst);
        self.tables.lock().expect("lock").remove(table);
        Ok(())
    }

    async fn write_batch(&self, table: &str, records: &[VectorRecord]) -> Result<()> {
        self.check_online()?;
        let Some(first) = records.first() else {
            return Ok(());
        };
        let mut tables = self.tables.lock().expect("lock");
        let entry = tables.entry(table.to_string()).or_insert(MemoryTable {
            dimension: first.embedding.len(),
            rows: Vec::new(),
        });
        if !self.drop_batches.load(Ordering::SeqCst) {
            entry.rows.extend_from_slice(records);
        }
        Ok(())
    }

    async fn insert_row(&self, table: &str, record: &VectorRecord) -> Result<()> {
        self.check_online()?;
        let mut tables = self.tables.lock().expect("lock");
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| anyhow!("no table {table}"))?;
        entry.rows.push(record.clone());
        Ok(())
    }

    async fn search(&self, table: &str, vector: &[f32], limit: usize) -> Result<Vec<ScoredRow>> {
        self.check_online()?;
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.last_search_limit.store(limit, Ordering::SeqCst);
        let tables = self.tables.lock().expect("lock");
        let Some(entry) = tables.get(table) else {
            return Ok(Vec::new());
        };
        if vector.len() != entry.dimension {
            return Err(anyhow!(
                "different vector dimensions {} and {}",
                vector.len(),
                entry.dimension
            ));
        }
        let mut rows: Vec<ScoredRow> = entry
            .rows
            .iter()
            .map(|r| ScoredRow {
                id: r.id.to_string(),
                content: r.content.clone(),
                metadata: r.metadata.clone(),
                score: cosine(vector, &r.embedding),
            })
            .collect();
        rows.sort_by(|a, b| b.score.total_cmp(&a.score));
        rows.truncate(limit);
        Ok(rows)
    }
}

pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Deterministic letter-histogram embeddings: equal texts score 1.0
#[derive(Debug)]
pub(crate) struct StubEmbedder {
    pub dimension: usize,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl StubEmbedder {
    pub(crate) fn new(dimension: usize) -> Arc<Self> {
        Arc::new(Self {
            dimension,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    pub(crate) fn failing(dimension: usize) -> Arc<Self> {
        let embedder = Self::new(dimension);
        embedder.fail.store(true, Ordering::SeqCst);
        embedder
    }

    pub(crate) fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        for c in text.chars().filter(char::is_ascii_alphanumeric) {
            vector[(c.to_ascii_lowercase() as usize) % self.dimension] += 1.0;
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[0] = 1.0;
        }
        vector
    }
}

impl Embedder for StubEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("embedding service unreachable"));
        }
        Ok(self.vector_for(text))
    }
}

/// Records every prompt and answers with a fixed prefix plus a counter
#[derive(Debug, Default)]
pub(crate) struct StubCompleter {
    pub prompts: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
    pub ready: Option<bool>,
}

impl StubCompleter {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn calls(&self) -> usize {
        self.prompts.lock().expect("lock").len()
    }
}

impl Completer for StubCompleter {
    fn complete(&self, prompt: &str, context: &str) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("chat model crashed"));
        }
        let mut prompts = self.prompts.lock().expect("lock");
        prompts.push((prompt.to_string(), context.to_string()));
        Ok(format!("answer {}", prompts.len()))
    }

    fn is_ready(&self) -> bool {
        self.ready.unwrap_or(true)
    }
}
