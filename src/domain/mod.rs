//! Domain types and determinism layer for the position ledger.
//!
//! This module provides:
//! - Lossless numeric handling via the Decimal wrapper
//! - Domain primitives: TimeMs, Account, Instrument, Side, PositionType
//! - Execution records and their deduplication key
//! - The Position aggregate with ordered member executions
//! - Stable execution ordering for deterministic processing

pub mod decimal;
pub mod execution;
pub mod ordering;
pub mod position;
pub mod primitives;

pub use decimal::Decimal;
pub use execution::{Execution, ExecutionKey, RawExecution};
pub use ordering::{sort_executions, ExecutionOrderingKey};
pub use position::{MemberExecution, Position, PositionId};
pub use primitives::{
    Account, Instrument, LegRole, PositionStatus, PositionType, Side, SideParseError,
    TimeMs, TimeParseError,
};
