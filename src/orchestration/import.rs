use crate::datasource::{ExecutionSource, SourceError};
use crate::db::Repository;
use crate::domain::{Account, Instrument};
use crate::engine::flow::DEFAULT_ORDERING_TOLERANCE_MS;
use crate::engine::ExecutionDeduplicator;
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::info;

/// Moves rows from a source through deduplication into storage.
#[derive(Clone)]
pub struct Importer {
    repo: Repository,
    ordering_tolerance_ms: i64,
}

/// Summary of one import.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub source: String,
    pub rows_read: usize,
    pub accepted: usize,
    pub duplicates: usize,
    /// One message per skipped row, including its row number.
    pub malformed: Vec<String>,
    pub fallback_keys: usize,
    /// Rows that went back in time within their partition in file order.
    pub ordering_warnings: Vec<String>,
    /// Partitions that received at least one new execution.
    pub partitions: Vec<(Account, Instrument)>,
}

impl Importer {
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            ordering_tolerance_ms: DEFAULT_ORDERING_TOLERANCE_MS,
        }
    }

    pub fn with_ordering_tolerance(mut self, tolerance_ms: i64) -> Self {
        self.ordering_tolerance_ms = tolerance_ms;
        self
    }

    /// Import every row of `source` that has never been accepted before.
    ///
    /// The deduplicator is seeded from the durable membership record, so
    /// importing the same file twice accepts nothing the second time.
    pub async fn import(&self, source: &dyn ExecutionSource) -> Result<ImportReport, ImportError> {
        let rows = source.fetch_rows().await?;
        let rows_read = rows.len();

        let known = self.repo.load_accepted_keys().await?;
        let mut dedup = ExecutionDeduplicator::with_known(known)
            .with_ordering_tolerance(self.ordering_tolerance_ms);
        let outcome = dedup.accept_batch(rows, Some(source.name()));

        let stored = self.repo.insert_executions_atomic(&outcome.accepted).await?;
        // Accepted here but already stored by a concurrent import.
        let raced = outcome.accepted.len() - stored.len();

        let partitions: BTreeSet<(Account, Instrument)> = stored
            .iter()
            .map(|e| (e.account.clone(), e.instrument.clone()))
            .collect();

        let report = ImportReport {
            source: source.name().to_string(),
            rows_read,
            accepted: stored.len(),
            duplicates: outcome.duplicates + raced,
            malformed: outcome.malformed.iter().map(|e| e.to_string()).collect(),
            fallback_keys: outcome.fallback_keys,
            ordering_warnings: outcome
                .ordering_warnings
                .iter()
                .map(|e| e.to_string())
                .collect(),
            partitions: partitions.into_iter().collect(),
        };

        info!(
            source = %report.source,
            rows = report.rows_read,
            accepted = report.accepted,
            duplicates = report.duplicates,
            malformed = report.malformed.len(),
            fallback_keys = report.fallback_keys,
            ordering_warnings = report.ordering_warnings.len(),
            "Import finished"
        );

        Ok(report)
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}
