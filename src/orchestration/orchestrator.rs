use crate::datasource::ExecutionSource;
use crate::db::Repository;
use crate::domain::{Account, Instrument};
use crate::orchestration::import::{ImportError, ImportReport, Importer};
use crate::rebuild::{RebuildError, RebuildReport, Rebuilder};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::error;

type PartitionKey = (Account, Instrument);

/// Runs imports and the rebuilds they make necessary.
///
/// Distinct partitions rebuild concurrently; rebuilds of the same partition
/// are serialized.
#[derive(Clone)]
pub struct Orchestrator {
    importer: Importer,
    rebuilder: Rebuilder,
    repo: Repository,
    partition_locks: Arc<Mutex<HashMap<PartitionKey, Arc<tokio::sync::Mutex<()>>>>>,
}

/// A partition whose rebuild failed. Its prior positions are untouched.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionFailure {
    pub account: Account,
    pub instrument: Instrument,
    pub integrity_violation: bool,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildSummary {
    pub rebuilt: Vec<RebuildReport>,
    pub failed: Vec<PartitionFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub import: ImportReport,
    #[serde(flatten)]
    pub rebuilds: RebuildSummary,
}

impl Orchestrator {
    pub fn new(repo: Repository, rebuilder: Rebuilder) -> Self {
        Self {
            importer: Importer::new(repo.clone())
                .with_ordering_tolerance(rebuilder.ordering_tolerance_ms()),
            rebuilder,
            repo,
            partition_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Import a source, then rebuild every partition it touched.
    ///
    /// A failing partition does not stop the others; failures are reported
    /// with their context.
    pub async fn import_and_rebuild(
        &self,
        source: &dyn ExecutionSource,
    ) -> Result<RunReport, OrchestrationError> {
        let import = self.importer.import(source).await?;
        let rebuilds = self.rebuild_partitions(&import.partitions).await;
        Ok(RunReport { import, rebuilds })
    }

    /// Rebuild one partition.
    pub async fn rebuild(
        &self,
        account: &Account,
        instrument: &Instrument,
    ) -> Result<RebuildReport, RebuildError> {
        let lock = self.partition_lock(account, instrument);
        let _guard = lock.lock().await;
        self.rebuilder.rebuild(account, instrument).await
    }

    /// Rebuild every partition with stored executions.
    pub async fn rebuild_all(&self) -> Result<RebuildSummary, OrchestrationError> {
        let partitions = self.repo.query_partitions().await?;
        Ok(self.rebuild_partitions(&partitions).await)
    }

    async fn rebuild_partitions(&self, partitions: &[PartitionKey]) -> RebuildSummary {
        let results = join_all(
            partitions
                .iter()
                .map(|(account, instrument)| self.rebuild(account, instrument)),
        )
        .await;

        let mut summary = RebuildSummary::default();
        for ((account, instrument), result) in partitions.iter().zip(results) {
            match result {
                Ok(report) => summary.rebuilt.push(report),
                Err(e) => {
                    error!(account = %account, instrument = %instrument, error = %e, "Partition rebuild failed");
                    summary.failed.push(PartitionFailure {
                        account: account.clone(),
                        instrument: instrument.clone(),
                        integrity_violation: e.integrity().is_some(),
                        error: e.to_string(),
                    });
                }
            }
        }
        summary
    }

    fn partition_lock(
        &self,
        account: &Account,
        instrument: &Instrument,
    ) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .partition_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry((account.clone(), instrument.clone()))
            .or_default()
            .clone()
    }
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}
