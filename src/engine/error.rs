//! Error taxonomy for the position-building engine.
//!
//! Row-level errors (`MalformedExecution`) and warnings (`OrderingViolation`,
//! `MissingMultiplier`) are recovered where they occur and reported alongside
//! results. `IntegrityViolation` aborts the rebuild of one partition.

use crate::domain::{Account, Instrument, TimeMs};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("malformed execution at row {row}: {reason}")]
    MalformedExecution { row: usize, reason: String },

    #[error(
        "execution {execution_id} for {account}/{instrument} at {timestamp} precedes last processed {last_processed}"
    )]
    OrderingViolation {
        account: Account,
        instrument: Instrument,
        execution_id: String,
        timestamp: TimeMs,
        last_processed: TimeMs,
    },

    #[error("no dollar multiplier known for instrument {instrument}")]
    MissingMultiplier { instrument: Instrument },

    #[error("integrity violation for {account}/{instrument}: {reason} (executions: {})", execution_ids.join(","))]
    IntegrityViolation {
        account: Account,
        instrument: Instrument,
        execution_ids: Vec<String>,
        reason: String,
    },
}

impl EngineError {
    pub fn integrity(
        account: &Account,
        instrument: &Instrument,
        execution_ids: Vec<String>,
        reason: impl Into<String>,
    ) -> Self {
        EngineError::IntegrityViolation {
            account: account.clone(),
            instrument: instrument.clone(),
            execution_ids,
            reason: reason.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::IntegrityViolation { .. })
    }
}
