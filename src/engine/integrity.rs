//! Invariant checks run on rebuilt positions before anything is persisted.

use crate::domain::{Decimal, Position, PositionStatus, PositionType};
use crate::engine::EngineError;

/// Verify a single position against the lifecycle invariants.
///
/// # Errors
/// Returns `EngineError::IntegrityViolation` naming the position's member
/// execution ids.
pub fn verify_position(position: &Position) -> Result<(), EngineError> {
    let fail = |reason: String| {
        Err(EngineError::integrity(
            &position.account,
            &position.instrument,
            position.execution_ids(),
            format!("position {}: {}", position.id, reason),
        ))
    };

    if position.executions.is_empty() {
        return fail("no member executions".to_string());
    }

    let net: i64 = position.executions.iter().map(|m| m.signed_quantity()).sum();
    if net != position.open_quantity {
        return fail(format!(
            "member quantities net to {} but residual is {}",
            net, position.open_quantity
        ));
    }

    match position.position_status {
        PositionStatus::Open => {
            if position.exit_time.is_some() {
                return fail("open with an exit time".to_string());
            }
            if position.open_quantity == 0 {
                return fail("open with zero residual quantity".to_string());
            }
            if position.average_exit_price.is_some() {
                return fail("open with an average exit price".to_string());
            }
        }
        PositionStatus::Closed => {
            if position.exit_time.is_none() {
                return fail("closed without an exit time".to_string());
            }
            if position.open_quantity != 0 {
                return fail(format!(
                    "closed with residual quantity {}",
                    position.open_quantity
                ));
            }
            if position.average_exit_price.is_none() {
                return fail("closed without an average exit price".to_string());
            }
        }
    }

    let direction_ok = match position.position_type {
        PositionType::Long => position.open_quantity >= 0,
        PositionType::Short => position.open_quantity <= 0,
    };
    if !direction_ok {
        return fail(format!(
            "{} position with residual {}",
            position.position_type.as_str(),
            position.open_quantity
        ));
    }

    if position.max_quantity < position.open_quantity.abs()
        || position.max_quantity < position.total_quantity
    {
        return fail(format!(
            "max quantity {} below observed size",
            position.max_quantity
        ));
    }

    let commission: Decimal = position.executions.iter().map(|m| m.commission).sum();
    if commission != position.total_commission {
        return fail(format!(
            "commission total {} differs from member sum {}",
            position.total_commission, commission
        ));
    }

    if let Some(exit) = position.exit_time {
        if exit < position.entry_time {
            return fail("exit precedes entry".to_string());
        }
    }

    Ok(())
}

/// Verify every position of a partition, stopping at the first violation.
pub fn verify_positions(positions: &[Position]) -> Result<(), EngineError> {
    let open = positions.iter().filter(|p| p.is_open()).count();
    if open > 1 {
        if let Some(p) = positions.iter().find(|p| p.is_open()) {
            return Err(EngineError::integrity(
                &p.account,
                &p.instrument,
                positions
                    .iter()
                    .filter(|p| p.is_open())
                    .map(|p| p.id.to_string())
                    .collect(),
                format!("{open} open positions in one partition"),
            ));
        }
    }
    positions.iter().try_for_each(verify_position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, Execution, Instrument, Side, TimeMs};
    use crate::engine::{analyze, build_positions, PnlCalculator};

    fn exec(id: &str, side: Side, qty: i64, ts: i64) -> Execution {
        Execution::new(
            Some(id.to_string()),
            Account::new("Sim101"),
            Instrument::new("ES 03-25"),
            side,
            qty,
            Decimal::from_qty(5000),
            Decimal::from_str_canonical("2.25").unwrap(),
            TimeMs::new(ts),
        )
    }

    fn built(execs: &[Execution]) -> Vec<Position> {
        let events = analyze(execs);
        let mut positions =
            build_positions(&Account::new("Sim101"), &Instrument::new("ES 03-25"), &events)
                .unwrap();
        for p in &mut positions {
            PnlCalculator::attach(p, None).unwrap();
        }
        positions
    }

    #[test]
    fn test_built_positions_pass() {
        let positions = built(&[
            exec("1", Side::Buy, 2, 1),
            exec("2", Side::Sell, 5, 2),
            exec("3", Side::BuyToCover, 1, 3),
        ]);
        assert!(verify_positions(&positions).is_ok());
    }

    #[test]
    fn test_closed_with_residual_is_rejected() {
        let mut positions = built(&[exec("1", Side::Buy, 2, 1), exec("2", Side::Sell, 2, 2)]);
        positions[0].open_quantity = 2;
        let err = verify_position(&positions[0]).unwrap_err();
        match err {
            EngineError::IntegrityViolation { execution_ids, .. } => {
                assert_eq!(execution_ids, vec!["1", "2"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_open_with_exit_time_is_rejected() {
        let mut positions = built(&[exec("1", Side::Buy, 2, 1)]);
        positions[0].exit_time = Some(TimeMs::new(9));
        assert!(verify_position(&positions[0]).is_err());
    }

    #[test]
    fn test_commission_mismatch_is_rejected() {
        let mut positions = built(&[exec("1", Side::Buy, 2, 1)]);
        positions[0].total_commission = Decimal::zero();
        assert!(verify_position(&positions[0]).is_err());
    }

    #[test]
    fn test_two_open_positions_are_rejected() {
        let mut a = built(&[exec("1", Side::Buy, 2, 1)]);
        let b = built(&[exec("2", Side::Buy, 1, 2)]);
        a.extend(b);
        assert!(verify_positions(&a).is_err());
    }
}
