
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::warn;
use uuid::Uuid;

use crate::query::DocumentMetadata;

/// Characters of passage content kept per source document
pub const CONTENT_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct QueryHistory {
    pub id: Uuid,
    pub query: String,
    pub chat_response: String,
    pub top_k: i64,
    pub response_time_ms: Option<i64>,
    pub source_document_count: i64,
    pub created_at: DateTime<Utc>,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SourceDocumentHistory {
    pub id: Uuid,
    pub query_id: Uuid,
    pub content_preview: String,
    pub similarity_score: f64,
    /// JSON-encoded [`DocumentMetadata`]
    pub document_metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SourceDocumentHistory {
    /// Decoded metadata; unparseable rows are logged and read as `None`
    #[inline]
    pub fn metadata(&self) -> Option<DocumentMetadata> {
        let raw = self.document_metadata.as_deref()?;
        match serde_json::from_str(raw) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("Failed to parse metadata for source document {}: {}", self.id, e);
                None
            }
        }
    }
}

/// One query outcome as handed to the history store
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueryHistory {
    pub query: String,
    pub chat_response: String,
    pub top_k: i64,
    pub response_time_ms: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
    pub sources: Vec<NewSourceDocument>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSourceDocument {
    pub content_preview: String,
    pub similarity_score: f64,
    pub document_metadata: Option<DocumentMetadata>,
}

impl NewSourceDocument {
    #[inline]
    pub fn new(content: &str, similarity_score: f32, metadata: DocumentMetadata) -> Self {
        Self {
            content_preview: content.chars().take(CONTENT_PREVIEW_CHARS).collect(),
            similarity_score: f64::from(similarity_score),
            document_metadata: Some(metadata),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPage {
    pub items: Vec<QueryHistory>,
    pub total_count: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStatistics {
    pub total_queries: i64,
    pub successful_queries: i64,
    /// Rounded to two decimals
    pub success_rate_percent: f64,
    /// Over queries with a recorded response time; `None` when there are none
    pub average_response_time_ms: Option<f64>,
}

impl QueryStatistics {
    #[inline]
    pub fn new(total: i64, successful: i64, average_response_time_ms: Option<f64>) -> Self {
        let rate = if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total_queries: total,
            successful_queries: successful,
            success_rate_percent: round2(rate),
            average_response_time_ms: average_response_time_ms.map(round2),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
