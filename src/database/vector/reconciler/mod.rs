
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::{DataLoss, VectorStoreManager};
use crate::Result;
use crate::embeddings::ProbedDimension;

/// What startup reconciliation did to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Created { dimension: usize },
    Unchanged { dimension: usize },
    Recreated { from: usize, to: usize },
    /// Rows exist, so the stale table is left alone
    MismatchKept {
        stored: usize,
        expected: usize,
        rows: u64,
    },
    /// No live probe or unreadable width; nothing was compared
    Unverified { stored: Option<usize> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchemaStatus {
    pub exists: bool,
    pub row_count: u64,
    pub stored_dimension: Option<usize>,
    pub expected_dimension: usize,
    pub dimension_mismatch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdminOutcome {
    Created { dimension: usize },
    AlreadyExists { dimension: Option<usize> },
    Recreated { from: Option<usize>, to: usize },
    /// Nothing was dropped; the caller must ask again with consent
    ConfirmationRequired { row_count: u64 },
}

/// Brings the persisted table in line with the embedding model. Each
/// operation runs inside one exclusive admin session.
#[derive(Debug, Clone)]
pub struct SchemaReconciler {
    manager: Arc<VectorStoreManager>,
}

impl SchemaReconciler {
    #[inline]
    pub fn new(manager: Arc<VectorStoreManager>) -> Self {
        Self { manager }
    }

    #[inline]
    pub async fn reconcile(&self, dimensions: ProbedDimension) -> Result<ReconcileOutcome> {
        let session = self.manager.admin().await;
        let table = session.table_name().to_string();

        if !session.table_exists().await? {
            let dimension = dimensions.effective();
            session.create_table(dimension).await?;
            info!("Created {} with {} dimensions", table, dimension);
            return Ok(ReconcileOutcome::Created { dimension });
        }

        let stored = session.stored_dimension().await?;
        let (Some(probed), Some(stored)) = (dimensions.probed, stored) else {
            warn!(
                "Skipping dimension check for {} (probed: {:?}, stored: {:?})",
                table, dimensions.probed, stored
            );
            return Ok(ReconcileOutcome::Unverified { stored });
        };

        if stored == probed {
            info!("{} matches the model at {} dimensions", table, stored);
            return Ok(ReconcileOutcome::Unchanged { dimension: stored });
        }

        let rows = session.row_count().await?;
        if rows == 0 {
            warn!(
                "{} stores {} dimensions but the model produces {}; recreating the empty table",
                table, stored, probed
            );
            session.drop_table().await?;
            session.create_table(probed).await?;
            return Ok(ReconcileOutcome::Recreated {
                from: stored,
                to: probed,
            });
        }

        warn!(
            "{} stores {} dimensions but the model produces {}; keeping {} existing rows. \
             Queries will likely fail until the table is recreated",
            table, stored, probed, rows
        );
        Ok(ReconcileOutcome::MismatchKept {
            stored,
            expected: probed,
            rows,
        })
    }

    /// `dimension_mismatch` is only reported against a live probe
    #[inline]
    pub async fn check_schema_status(&self, dimensions: ProbedDimension) -> Result<SchemaStatus> {
        let session = self.manager.admin().await;
        let exists = session.table_exists().await?;
        let (row_count, stored_dimension) = if exists {
            (session.row_count().await?, session.stored_dimension().await?)
        } else {
            (0, None)
        };
        let expected_dimension = dimensions.effective();

        Ok(SchemaStatus {
            exists,
            row_count,
            stored_dimension,
            expected_dimension,
            dimension_mismatch: dimensions.is_verified()
                && stored_dimension.is_some_and(|d| d != expected_dimension),
        })
    }

    /// Create the table at the effective width, leaving an existing one alone
    #[inline]
    pub async fn create_table(&self, dimensions: ProbedDimension) -> Result<AdminOutcome> {
        let session = self.manager.admin().await;
        if session.table_exists().await? {
            return Ok(AdminOutcome::AlreadyExists {
                dimension: session.stored_dimension().await?,
            });
        }
        let dimension = dimensions.effective();
        session.create_table(dimension).await?;
        Ok(AdminOutcome::Created { dimension })
    }

    /// Drop and recreate at the effective width. A table holding rows is only
    /// dropped with [`DataLoss::Accept`].
    #[inline]
    pub async fn recreate_table(
        &self,
        dimensions: ProbedDimension,
        consent: DataLoss,
    ) -> Result<AdminOutcome> {
        let session = self.manager.admin().await;
        let from = session.stored_dimension().await?;
        let row_count = session.row_count().await?;

        if row_count > 0 && consent == DataLoss::Refuse {
            warn!(
                "Refusing to recreate {} without consent ({} rows)",
                session.table_name(),
                row_count
            );
            return Ok(AdminOutcome::ConfirmationRequired { row_count });
        }

        let to = dimensions.effective();
        session.drop_table().await?;
        session.create_table(to).await?;
        info!(
            "Recreated {} ({:?} -> {} dimensions, {} rows discarded)",
            session.table_name(),
            from,
            to,
            row_count
        );
        Ok(AdminOutcome::Recreated { from, to })
    }
}
