use thiserror::Error;

use crate::config::ConfigError;
use crate::health::HealthStatus;

pub type Result<T> = std::result::Result<T, AdvisorError>;

/// Message shown to end users whenever a query fails, whatever the cause.
pub const GENERIC_QUERY_ERROR: &str = "Error processing query.";

#[derive(Error, Debug)]
pub enum AdvisorError {
    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Model setup failed: {0}")]
    ModelSetupFailed(String),

    #[error("Embedding dimension probe failed: {0}")]
    DimensionProbeFailed(String),

    #[error("Embedding dimension mismatch: table stores {stored}, model produces {expected}")]
    DimensionMismatch { stored: usize, expected: usize },

    #[error("No documents in vector store")]
    EmptyStore,

    #[error("System not ready for queries: {0}")]
    NotReady(HealthStatus),

    #[error("No documents to index")]
    NoDocuments,

    #[error("Indexing failed: {0}")]
    IndexingFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl AdvisorError {
    /// Text that is safe to hand to an end user. Internal detail stays in the logs.
    #[inline]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotReady(_) | Self::StoreUnavailable(_) | Self::ModelSetupFailed(_) => {
                "System not ready. Please try again later."
            }
            Self::EmptyStore => "No documents have been indexed yet.",
            Self::NoDocuments => "No documents to index.",
            Self::InvalidRequest(_) => "Invalid request.",
            _ => GENERIC_QUERY_ERROR,
        }
    }
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod health;
pub mod indexer;
pub mod query;
pub mod rag;

#[cfg(test)]
pub(crate) mod test_support;
