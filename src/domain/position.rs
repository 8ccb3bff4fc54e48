//! Position aggregate and its member executions.

use crate::domain::{
    Account, Decimal, Execution, Instrument, PositionStatus, PositionType, TimeMs,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Stable identity of a position.
///
/// Derived from (account, instrument, dedup key of the opening execution), so
/// rebuilding the same executions always reproduces the same id. An execution
/// opens at most one position, which keeps ids unique within a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionId(pub Uuid);

impl PositionId {
    pub fn derive(account: &Account, instrument: &Instrument, opening_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(account.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(instrument.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(opening_key.as_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash[..16]);
        PositionId(Uuid::from_bytes(bytes))
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(PositionId)
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An execution's membership in a position.
///
/// `quantity` and `commission` are the portion attributed to this position.
/// They equal the execution's own values except when a reversal splits one
/// execution between the position it closes and the one it opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberExecution {
    pub execution: Execution,
    pub quantity: i64,
    pub commission: Decimal,
}

impl MemberExecution {
    pub fn whole(execution: &Execution) -> Self {
        MemberExecution {
            quantity: execution.quantity,
            commission: execution.commission,
            execution: execution.clone(),
        }
    }

    pub fn portion(execution: &Execution, quantity: i64, commission: Decimal) -> Self {
        MemberExecution {
            execution: execution.clone(),
            quantity,
            commission,
        }
    }

    pub fn is_split(&self) -> bool {
        self.quantity != self.execution.quantity
    }

    pub fn signed_quantity(&self) -> i64 {
        self.execution.side.signed(self.quantity)
    }
}

/// Discrete trading position reconstructed from quantity flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub account: Account,
    pub instrument: Instrument,
    pub position_type: PositionType,
    pub position_status: PositionStatus,
    pub entry_time: TimeMs,
    /// None while open.
    pub exit_time: Option<TimeMs>,
    /// Size of the opening leg.
    pub total_quantity: i64,
    /// Largest absolute running quantity seen while the position lived.
    pub max_quantity: i64,
    /// Signed running quantity after the last member execution; zero once closed.
    pub open_quantity: i64,
    pub average_entry_price: Decimal,
    pub average_exit_price: Option<Decimal>,
    pub total_points_pnl: Decimal,
    /// None when the instrument's multiplier is unknown.
    pub total_dollars_pnl: Option<Decimal>,
    pub total_commission: Decimal,
    /// Set by storage on first insert and never changed afterwards.
    pub created_at: Option<TimeMs>,
    pub executions: Vec<MemberExecution>,
}

impl Position {
    /// A freshly opened position with its opening member.
    pub fn open(opening: MemberExecution, running_quantity: i64, position_type: PositionType) -> Self {
        let exec = &opening.execution;
        Position {
            id: PositionId::derive(&exec.account, &exec.instrument, &exec.dedup_key),
            account: exec.account.clone(),
            instrument: exec.instrument.clone(),
            position_type,
            position_status: PositionStatus::Open,
            entry_time: exec.timestamp,
            exit_time: None,
            total_quantity: running_quantity.abs(),
            max_quantity: running_quantity.abs(),
            open_quantity: running_quantity,
            average_entry_price: Decimal::zero(),
            average_exit_price: None,
            total_points_pnl: Decimal::zero(),
            total_dollars_pnl: None,
            total_commission: Decimal::zero(),
            created_at: None,
            executions: vec![opening],
        }
    }

    pub fn is_open(&self) -> bool {
        self.position_status == PositionStatus::Open
    }

    /// Latest timestamp among member executions. Members are kept in arrival
    /// order, so this is not necessarily the last member's timestamp.
    pub fn last_execution_time(&self) -> TimeMs {
        self.executions
            .iter()
            .map(|m| m.execution.timestamp)
            .max()
            .unwrap_or(self.entry_time)
    }

    pub fn execution_ids(&self) -> Vec<String> {
        self.executions
            .iter()
            .map(|m| m.execution.display_id().to_string())
            .collect()
    }
}
