//! Pure computation engine for position building.
//!
//! Executions flow strictly forward through the stages:
//! raw rows -> [`ExecutionDeduplicator`] -> [`QuantityFlowAnalyzer`] ->
//! [`PositionBuilder`] -> [`PnlCalculator`]. Nothing here performs I/O.

pub mod builder;
pub mod dedup;
pub mod error;
pub mod flow;
pub mod integrity;
pub mod multiplier;
pub mod pnl;

pub use builder::{build_positions, split_reversal, PositionBuilder};
pub use dedup::{validate_row, DedupOutcome, ExecutionDeduplicator};
pub use error::EngineError;
pub use flow::{analyze, check_ordering, classify, FlowEvent, FlowEventType, QuantityFlowAnalyzer};
pub use integrity::{verify_position, verify_positions};
pub use multiplier::{parse_multiplier_entries, InstrumentMultipliers, MultiplierSource};
pub use pnl::{MatchedLot, PnlCalculator, PositionPnl};

use crate::domain::{Account, Execution, Instrument, Position};

/// Run the whole pipeline for one partition starting flat: flow analysis,
/// position building, P&L, and invariant checks.
///
/// `executions` must already be in processing order.
pub fn build_partition(
    account: &Account,
    instrument: &Instrument,
    executions: &[Execution],
    multipliers: &InstrumentMultipliers,
) -> Result<Vec<Position>, EngineError> {
    let events = analyze(executions);
    let mut positions = build_positions(account, instrument, &events)?;
    let multiplier = multipliers.lookup(instrument);
    for position in &mut positions {
        PnlCalculator::attach(position, multiplier)?;
    }
    verify_positions(&positions)?;
    Ok(positions)
}
