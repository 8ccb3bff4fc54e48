//! Partition rebuilds: stored executions -> persisted positions.
//!
//! This module provides:
//! - Watermark-based incremental rebuilds keyed on execution arrival order
//! - In-place extension of a partition's open position
//! - Full rebuild of closed positions when older executions arrive late

use crate::domain::{Account, Instrument, TimeMs};
use crate::engine::EngineError;
use serde::Serialize;
use thiserror::Error;

pub mod incremental;

pub use incremental::Rebuilder;

/// Rebuild watermark for one (account, instrument) partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildState {
    pub account: Account,
    pub instrument: Instrument,
    /// Highest `import_seq` already folded into positions.
    pub last_import_seq: i64,
    /// Latest execution timestamp already folded into positions.
    pub last_timestamp: Option<TimeMs>,
    /// Number of committed rebuilds.
    pub rebuild_version: i64,
}

impl RebuildState {
    pub fn new(account: Account, instrument: Instrument) -> Self {
        Self {
            account,
            instrument,
            last_import_seq: 0,
            last_timestamp: None,
            rebuild_version: 0,
        }
    }
}

/// How a rebuild treated the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildMode {
    /// No executions since the watermark.
    Noop,
    /// New executions were appended to the existing open position.
    Extended,
    /// New executions were built into new positions starting flat.
    Incremental,
    /// Closed positions were rebuilt from every stored execution.
    Full,
}

/// Summary of one partition rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub account: Account,
    pub instrument: Instrument,
    pub mode: RebuildMode,
    /// Executions folded in by this rebuild.
    pub executions_processed: usize,
    pub positions_written: usize,
    #[serde(serialize_with = "serialize_errors")]
    pub ordering_warnings: Vec<EngineError>,
    /// Set when dollar P&L could not be computed.
    pub missing_multiplier: bool,
}

impl RebuildReport {
    pub fn noop(account: &Account, instrument: &Instrument) -> Self {
        Self {
            account: account.clone(),
            instrument: instrument.clone(),
            mode: RebuildMode::Noop,
            executions_processed: 0,
            positions_written: 0,
            ordering_warnings: Vec::new(),
            missing_multiplier: false,
        }
    }
}

fn serialize_errors<S>(errors: &[EngineError], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(errors.iter().map(|e| e.to_string()))
}

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl RebuildError {
    /// The integrity violation that aborted the rebuild, if that is what happened.
    pub fn integrity(&self) -> Option<&EngineError> {
        match self {
            RebuildError::Engine(e) if e.is_fatal() => Some(e),
            _ => None,
        }
    }
}
