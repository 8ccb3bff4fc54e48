//! Identity-preserving rebuild of one partition.

use crate::db::{RebuildCommit, Repository};
use crate::domain::{Account, Execution, Instrument, Position};
use crate::engine::{
    analyze, build_positions, check_ordering, verify_positions, EngineError,
    InstrumentMultipliers, PnlCalculator, PositionBuilder, QuantityFlowAnalyzer,
};
use crate::rebuild::{RebuildError, RebuildMode, RebuildReport};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Rebuilds partitions from stored executions.
///
/// Open positions are mutable state addressed by a stable id: new executions
/// are appended to them. Closed positions are derived artifacts and are only
/// rebuilt wholesale when executions older than the last close arrive.
#[derive(Clone)]
pub struct Rebuilder {
    repo: Repository,
    multipliers: Arc<InstrumentMultipliers>,
    ordering_tolerance_ms: i64,
}

/// Positions produced for a partition before they are verified and committed.
struct Plan {
    mode: RebuildMode,
    positions: Vec<Position>,
    processed: usize,
    ordering_warnings: Vec<EngineError>,
}

impl Rebuilder {
    pub fn new(
        repo: Repository,
        multipliers: Arc<InstrumentMultipliers>,
        ordering_tolerance_ms: i64,
    ) -> Self {
        Self {
            repo,
            multipliers,
            ordering_tolerance_ms,
        }
    }

    pub fn ordering_tolerance_ms(&self) -> i64 {
        self.ordering_tolerance_ms
    }

    /// Fold executions that arrived since the partition's watermark into its
    /// positions and commit the result atomically.
    ///
    /// # Errors
    /// `RebuildError::Engine` with an `IntegrityViolation` when a rebuilt
    /// position breaks a lifecycle invariant; nothing is written in that case.
    /// `RebuildError::Db` when storage fails.
    pub async fn rebuild(
        &self,
        account: &Account,
        instrument: &Instrument,
    ) -> Result<RebuildReport, RebuildError> {
        let state = self.repo.get_rebuild_state(account, instrument).await?;
        let last_seq = state.as_ref().map(|s| s.last_import_seq).unwrap_or(0);
        let fresh = self
            .repo
            .query_partition_executions_after(account, instrument, last_seq)
            .await?;

        if fresh.is_empty() {
            return Ok(RebuildReport::noop(account, instrument));
        }

        let last_import_seq = fresh
            .iter()
            .map(|e| e.import_seq)
            .max()
            .unwrap_or(last_seq);
        let last_timestamp = fresh
            .iter()
            .map(|e| e.timestamp)
            .chain(state.as_ref().and_then(|s| s.last_timestamp))
            .max();

        let mut plan = match self.repo.load_open_position(account, instrument).await? {
            Some(open) => self.extend_open(account, instrument, open, &fresh),
            None => self.build_from_flat(account, instrument, &fresh).await,
        }
        .map_err(|e| abort(account, instrument, e))?;

        let multiplier = self.multipliers.lookup(instrument);
        for position in &mut plan.positions {
            PnlCalculator::attach(position, multiplier)
                .map_err(|e| abort(account, instrument, e.into()))?;
        }
        verify_positions(&plan.positions).map_err(|e| abort(account, instrument, e.into()))?;

        self.repo
            .commit_rebuild(&RebuildCommit {
                account,
                instrument,
                positions: &plan.positions,
                replace_closed: plan.mode == RebuildMode::Full,
                last_import_seq,
                last_timestamp,
            })
            .await?;

        info!(
            account = %account,
            instrument = %instrument,
            mode = ?plan.mode,
            executions = plan.processed,
            positions = plan.positions.len(),
            ordering_warnings = plan.ordering_warnings.len(),
            "Partition rebuilt"
        );

        Ok(RebuildReport {
            account: account.clone(),
            instrument: instrument.clone(),
            mode: plan.mode,
            executions_processed: plan.processed,
            positions_written: plan.positions.len(),
            ordering_warnings: plan.ordering_warnings,
            missing_multiplier: multiplier.is_none(),
        })
    }

    /// Append fresh executions to the partition's open position.
    fn extend_open(
        &self,
        account: &Account,
        instrument: &Instrument,
        open: Position,
        fresh: &[Execution],
    ) -> Result<Plan, RebuildError> {
        let ordering_warnings = check_ordering(
            account,
            instrument,
            fresh,
            Some(open.last_execution_time()),
            self.ordering_tolerance_ms,
        );

        let mut analyzer = QuantityFlowAnalyzer::resume(open.open_quantity);
        let events = analyzer.analyze(fresh);
        let mut builder = PositionBuilder::resume(open);
        builder.apply_all(&events)?;

        Ok(Plan {
            mode: RebuildMode::Extended,
            positions: builder.finish(),
            processed: fresh.len(),
            ordering_warnings,
        })
    }

    /// No open position: build fresh executions from flat, or rebuild every
    /// closed position when fresh executions predate the last close.
    async fn build_from_flat(
        &self,
        account: &Account,
        instrument: &Instrument,
        fresh: &[Execution],
    ) -> Result<Plan, RebuildError> {
        let last_exit = self.repo.last_closed_exit_time(account, instrument).await?;
        let ordering_warnings = check_ordering(
            account,
            instrument,
            fresh,
            last_exit,
            self.ordering_tolerance_ms,
        );

        let backfilled = match (last_exit, fresh.first()) {
            (Some(exit), Some(first)) => {
                first.timestamp.as_ms() < exit.as_ms().saturating_sub(self.ordering_tolerance_ms)
            }
            _ => false,
        };

        if !backfilled {
            let positions = build_positions(account, instrument, &analyze(fresh))?;
            return Ok(Plan {
                mode: RebuildMode::Incremental,
                positions,
                processed: fresh.len(),
                ordering_warnings,
            });
        }

        warn!(
            account = %account,
            instrument = %instrument,
            late_executions = ordering_warnings.len(),
            "Executions predate the last closed position, rebuilding closed positions"
        );
        let all = self
            .repo
            .query_partition_executions(account, instrument)
            .await?;
        let positions = build_positions(account, instrument, &analyze(&all))?;
        Ok(Plan {
            mode: RebuildMode::Full,
            positions,
            processed: all.len(),
            ordering_warnings,
        })
    }
}

/// Log an aborted rebuild and pass the error through.
fn abort(account: &Account, instrument: &Instrument, err: RebuildError) -> RebuildError {
    if let Some(violation) = err.integrity() {
        error!(
            account = %account,
            instrument = %instrument,
            error = %violation,
            "Rebuild aborted, prior positions left untouched"
        );
    }
    err
}
