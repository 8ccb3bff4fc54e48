//! Quantity flow analysis: ordered executions -> lifecycle events.
//!
//! The running signed quantity is an explicit fold over the execution list,
//! so the event sequence depends on nothing but its input.

use crate::domain::{Account, Execution, Instrument, TimeMs};
use crate::engine::EngineError;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEventType {
    /// Flat -> non-zero.
    Start,
    /// Non-zero -> non-zero with the same sign.
    Modify,
    /// Non-zero -> flat.
    Close,
    /// Sign flip in a single execution without resting at zero.
    Reversal,
}

/// How one execution moved the running quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEvent<'a> {
    pub event_type: FlowEventType,
    pub execution: &'a Execution,
    /// Running quantity before the execution.
    pub previous_quantity: i64,
    /// Running quantity after the execution.
    pub running_quantity: i64,
}

impl FlowEvent<'_> {
    /// Contracts of the execution that offset the prior position.
    ///
    /// For a reversal this is exactly `|previous_quantity|`; the remainder
    /// opens the new position.
    pub fn closing_quantity(&self) -> i64 {
        match self.event_type {
            FlowEventType::Close | FlowEventType::Reversal => self.previous_quantity.abs(),
            FlowEventType::Start => 0,
            FlowEventType::Modify => {
                (self.previous_quantity.abs() - self.running_quantity.abs()).max(0)
            }
        }
    }

    /// Contracts of the execution that open or add to a position.
    pub fn opening_quantity(&self) -> i64 {
        self.execution.quantity - self.closing_quantity()
    }
}

/// Classify a running-quantity transition.
///
/// Returns None when the quantity stays flat, which only a zero-size
/// execution could cause.
pub fn classify(prev: i64, next: i64) -> Option<FlowEventType> {
    match (prev == 0, next == 0) {
        (true, true) => None,
        (true, false) => Some(FlowEventType::Start),
        (false, true) => Some(FlowEventType::Close),
        (false, false) if prev.signum() == next.signum() => Some(FlowEventType::Modify),
        (false, false) => Some(FlowEventType::Reversal),
    }
}

/// Walks one partition's ordered executions and emits flow events.
#[derive(Debug, Clone, Default)]
pub struct QuantityFlowAnalyzer {
    running_quantity: i64,
}

impl QuantityFlowAnalyzer {
    /// Analyzer starting flat.
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyzer resuming from a known running quantity, e.g. the residual of
    /// an open position being extended.
    pub fn resume(running_quantity: i64) -> Self {
        Self { running_quantity }
    }

    pub fn running_quantity(&self) -> i64 {
        self.running_quantity
    }

    /// Apply one execution and return the event it produced.
    pub fn step<'a>(&mut self, execution: &'a Execution) -> Option<FlowEvent<'a>> {
        let prev = self.running_quantity;
        let next = prev + execution.signed_quantity();
        self.running_quantity = next;
        classify(prev, next).map(|event_type| FlowEvent {
            event_type,
            execution,
            previous_quantity: prev,
            running_quantity: next,
        })
    }

    /// Fold a whole execution list into its event sequence.
    pub fn analyze<'a>(&mut self, executions: &'a [Execution]) -> Vec<FlowEvent<'a>> {
        executions.iter().filter_map(|e| self.step(e)).collect()
    }
}

/// Event sequence for a partition starting flat.
pub fn analyze(executions: &[Execution]) -> Vec<FlowEvent<'_>> {
    QuantityFlowAnalyzer::new().analyze(executions)
}

/// Default slack before an execution that goes back in time is reported.
pub const DEFAULT_ORDERING_TOLERANCE_MS: i64 = 1_000;

/// Report executions whose timestamp precedes the latest one processed so far
/// by more than `tolerance_ms`.
///
/// The list is not reordered: callers keep arrival order and only learn which
/// executions arrived late. `last_processed` seeds the check with the
/// partition's previously processed high-water mark.
pub fn check_ordering(
    account: &Account,
    instrument: &Instrument,
    executions: &[Execution],
    last_processed: Option<TimeMs>,
    tolerance_ms: i64,
) -> Vec<EngineError> {
    let mut high_water = last_processed;
    let mut violations = Vec::new();

    for exec in executions {
        if let Some(hw) = high_water {
            if exec.timestamp.as_ms() < hw.as_ms().saturating_sub(tolerance_ms) {
                warn!(
                    account = %account,
                    instrument = %instrument,
                    execution_id = exec.display_id(),
                    timestamp = exec.timestamp.as_ms(),
                    last_processed = hw.as_ms(),
                    "Execution arrived out of order, processing in arrival order"
                );
                violations.push(EngineError::OrderingViolation {
                    account: account.clone(),
                    instrument: instrument.clone(),
                    execution_id: exec.display_id().to_string(),
                    timestamp: exec.timestamp,
                    last_processed: hw,
                });
            }
        }
        high_water = Some(match high_water {
            Some(hw) if hw > exec.timestamp => hw,
            _ => exec.timestamp,
        });
    }

    violations
}
