//! Position building: flow events -> Position aggregates with member executions.

use crate::domain::{
    Account, Decimal, Execution, Instrument, MemberExecution, Position, PositionStatus,
    PositionType,
};
use crate::engine::flow::{FlowEvent, FlowEventType};
use crate::engine::EngineError;
use tracing::debug;

/// Groups executions into positions by following flow events.
///
/// At most one position is under construction at a time. Its members
/// accumulate in `current_members`, which is emptied every time a position is
/// sealed so the next trading sequence never inherits executions from the
/// previous one.
pub struct PositionBuilder {
    account: Account,
    instrument: Instrument,
    current: Option<Position>,
    current_members: Vec<MemberExecution>,
    positions: Vec<Position>,
}

impl PositionBuilder {
    pub fn new(account: Account, instrument: Instrument) -> Self {
        Self {
            account,
            instrument,
            current: None,
            current_members: Vec::new(),
            positions: Vec::new(),
        }
    }

    /// Continue building an existing open position.
    ///
    /// The position keeps its id and creation time; new members are appended
    /// after the ones it already has.
    pub fn resume(mut open: Position) -> Self {
        let members = std::mem::take(&mut open.executions);
        Self {
            account: open.account.clone(),
            instrument: open.instrument.clone(),
            current: Some(open),
            current_members: members,
            positions: Vec::new(),
        }
    }

    /// Apply one flow event.
    pub fn apply(&mut self, event: &FlowEvent<'_>) -> Result<(), EngineError> {
        let exec = event.execution;
        match event.event_type {
            FlowEventType::Start => {
                if self.current.is_some() {
                    return Err(self.violation(exec, "start event while a position is open"));
                }
                self.start(MemberExecution::whole(exec), event.running_quantity)
            }
            FlowEventType::Modify => {
                self.require_open(exec, "modify event without an open position")?;
                if let Some(position) = self.current.as_mut() {
                    position.max_quantity =
                        position.max_quantity.max(event.running_quantity.abs());
                    position.open_quantity = event.running_quantity;
                }
                self.current_members.push(MemberExecution::whole(exec));
                Ok(())
            }
            FlowEventType::Close => {
                self.require_open(exec, "close event without an open position")?;
                self.current_members.push(MemberExecution::whole(exec));
                self.seal(exec)
            }
            FlowEventType::Reversal => {
                self.require_open(exec, "reversal event without an open position")?;
                let (closing, opening) = split_reversal(event);
                self.current_members.push(closing);
                self.seal(exec)?;
                self.start(opening, event.running_quantity)
            }
        }
    }

    /// Apply a whole event sequence.
    pub fn apply_all(&mut self, events: &[FlowEvent<'_>]) -> Result<(), EngineError> {
        for event in events {
            self.apply(event)?;
        }
        Ok(())
    }

    /// Emit every position built so far. A position still under construction
    /// is emitted last with Open status and the state of the last execution.
    pub fn finish(mut self) -> Vec<Position> {
        if let Some(mut open) = self.current.take() {
            open.executions = std::mem::take(&mut self.current_members);
            self.positions.push(open);
        }
        self.positions
    }

    fn start(&mut self, opening: MemberExecution, running_quantity: i64) -> Result<(), EngineError> {
        let position_type = PositionType::from_running_quantity(running_quantity).ok_or_else(|| {
            self.violation(&opening.execution, "start event with zero running quantity")
        })?;
        let mut position = Position::open(opening, running_quantity, position_type);
        // The opening member lives in the accumulator until the position is sealed.
        self.current_members = std::mem::take(&mut position.executions);
        debug!(
            position_id = %position.id,
            account = %self.account,
            instrument = %self.instrument,
            position_type = position_type.as_str(),
            quantity = running_quantity.abs(),
            "Position started"
        );
        self.current = Some(position);
        Ok(())
    }

    /// Finalize the current position at `exec` and reset the accumulator.
    fn seal(&mut self, exec: &Execution) -> Result<(), EngineError> {
        let mut position = self
            .current
            .take()
            .ok_or_else(|| self.violation(exec, "seal without an open position"))?;
        position.position_status = PositionStatus::Closed;
        position.open_quantity = 0;
        position.executions = std::mem::take(&mut self.current_members);
        // Late fills are folded in arrival order, so the closing execution is
        // not necessarily the latest member.
        position.exit_time = Some(position.last_execution_time().max(exec.timestamp));
        debug_assert!(self.current_members.is_empty());
        debug!(
            position_id = %position.id,
            members = position.executions.len(),
            "Position closed"
        );
        self.positions.push(position);
        Ok(())
    }

    fn require_open(&self, exec: &Execution, reason: &str) -> Result<(), EngineError> {
        match self.current {
            Some(_) => Ok(()),
            None => Err(self.violation(exec, reason)),
        }
    }

    fn violation(&self, exec: &Execution, reason: &str) -> EngineError {
        let mut ids: Vec<String> = self
            .current_members
            .iter()
            .map(|m| m.execution.display_id().to_string())
            .collect();
        ids.push(exec.display_id().to_string());
        EngineError::integrity(&self.account, &self.instrument, ids, reason)
    }
}

/// Split a reversing execution into the member that closes the old position
/// and the member that opens the new one.
///
/// Quantity splits exactly at zero. Commission is attributed pro rata by
/// quantity; the opening side takes the remainder so the two portions always
/// sum to the execution's commission. Both portions carry the execution's
/// timestamp.
pub fn split_reversal(event: &FlowEvent<'_>) -> (MemberExecution, MemberExecution) {
    let exec = event.execution;
    let close_qty = event.closing_quantity();
    let open_qty = exec.quantity - close_qty;
    let close_commission =
        exec.commission * Decimal::from_qty(close_qty) / Decimal::from_qty(exec.quantity);
    let open_commission = exec.commission - close_commission;
    (
        MemberExecution::portion(exec, close_qty, close_commission),
        MemberExecution::portion(exec, open_qty, open_commission),
    )
}

/// Build positions for one partition from its flow events, starting flat.
pub fn build_positions(
    account: &Account,
    instrument: &Instrument,
    events: &[FlowEvent<'_>],
) -> Result<Vec<Position>, EngineError> {
    let mut builder = PositionBuilder::new(account.clone(), instrument.clone());
    builder.apply_all(events)?;
    Ok(builder.finish())
}
