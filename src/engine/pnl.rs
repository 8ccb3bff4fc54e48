//! FIFO profit/loss for a single position.

use crate::domain::{Decimal, LegRole, Position, PositionStatus, PositionType};
use crate::engine::EngineError;
use std::collections::VecDeque;

/// An entry lot waiting to be matched by exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Lot {
    remaining: i64,
    price: Decimal,
}

/// One matched slice of an entry lot against an exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchedLot {
    pub quantity: i64,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub points_pnl: Decimal,
}

/// P&L figures derived from a position's members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionPnl {
    pub average_entry_price: Decimal,
    /// None for open positions.
    pub average_exit_price: Option<Decimal>,
    pub total_points_pnl: Decimal,
    /// None when no multiplier is known for the instrument.
    pub total_dollars_pnl: Option<Decimal>,
    pub total_commission: Decimal,
    /// Entry contracts not yet matched by an exit.
    pub unmatched_quantity: i64,
    pub matches: Vec<MatchedLot>,
}

/// Quantity-weighted running mean.
#[derive(Debug, Default, Clone, Copy)]
struct WeightedMean {
    quantity: i64,
    notional: Decimal,
}

impl WeightedMean {
    fn add(&mut self, quantity: i64, price: Decimal) {
        self.quantity += quantity;
        self.notional += price * Decimal::from_qty(quantity);
    }

    fn mean(&self) -> Option<Decimal> {
        (self.quantity > 0).then(|| self.notional / Decimal::from_qty(self.quantity))
    }
}

pub struct PnlCalculator;

impl PnlCalculator {
    /// Compute FIFO P&L for `position` from its ordered members.
    ///
    /// `multiplier` is dollars per point for the instrument; pass None when
    /// the lookup failed and dollar P&L is reported as unavailable.
    pub fn calculate(
        position: &Position,
        multiplier: Option<Decimal>,
    ) -> Result<PositionPnl, EngineError> {
        let mut lots: VecDeque<Lot> = VecDeque::new();
        let mut entries = WeightedMean::default();
        let mut exits = WeightedMean::default();
        let mut points = Decimal::zero();
        let mut matches = Vec::new();

        for member in &position.executions {
            let exec = &member.execution;
            match exec.side.role_in(position.position_type) {
                LegRole::Entry => {
                    entries.add(member.quantity, exec.price);
                    lots.push_back(Lot {
                        remaining: member.quantity,
                        price: exec.price,
                    });
                }
                LegRole::Exit => {
                    exits.add(member.quantity, exec.price);
                    let mut to_match = member.quantity;
                    while to_match > 0 {
                        let Some(front) = lots.front_mut() else {
                            return Err(EngineError::integrity(
                                &position.account,
                                &position.instrument,
                                vec![exec.display_id().to_string()],
                                format!(
                                    "exit of {} contracts exceeds open entry lots by {}",
                                    member.quantity, to_match
                                ),
                            ));
                        };
                        let qty = to_match.min(front.remaining);
                        let per_contract = match position.position_type {
                            PositionType::Long => exec.price - front.price,
                            PositionType::Short => front.price - exec.price,
                        };
                        let slice = per_contract * Decimal::from_qty(qty);
                        points += slice;
                        matches.push(MatchedLot {
                            quantity: qty,
                            entry_price: front.price,
                            exit_price: exec.price,
                            points_pnl: slice,
                        });
                        front.remaining -= qty;
                        to_match -= qty;
                        if front.remaining == 0 {
                            lots.pop_front();
                        }
                    }
                }
            }
        }

        let average_entry_price = entries.mean().ok_or_else(|| {
            EngineError::integrity(
                &position.account,
                &position.instrument,
                position.execution_ids(),
                "position has no entry executions",
            )
        })?;

        let average_exit_price = match position.position_status {
            PositionStatus::Closed => exits.mean(),
            PositionStatus::Open => None,
        };

        Ok(PositionPnl {
            average_entry_price,
            average_exit_price,
            total_points_pnl: points,
            total_dollars_pnl: multiplier.map(|m| points * m),
            total_commission: position.executions.iter().map(|m| m.commission).sum(),
            unmatched_quantity: lots.iter().map(|l| l.remaining).sum(),
            matches,
        })
    }

    /// Compute and store P&L on the position.
    pub fn attach(position: &mut Position, multiplier: Option<Decimal>) -> Result<PositionPnl, EngineError> {
        let pnl = Self::calculate(position, multiplier)?;
        position.average_entry_price = pnl.average_entry_price;
        position.average_exit_price = pnl.average_exit_price;
        position.total_points_pnl = pnl.total_points_pnl;
        position.total_dollars_pnl = pnl.total_dollars_pnl;
        position.total_commission = pnl.total_commission;
        Ok(pnl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, Execution, Instrument, MemberExecution, Side, TimeMs};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn member(id: &str, side: Side, qty: i64, price: &str, commission: &str) -> MemberExecution {
        MemberExecution::whole(&Execution::new(
            Some(id.to_string()),
            Account::new("Sim101"),
            Instrument::new("ES 03-25"),
            side,
            qty,
            d(price),
            d(commission),
            TimeMs::new(id.len() as i64),
        ))
    }

    fn position(kind: PositionType, status: PositionStatus, members: Vec<MemberExecution>) -> Position {
        let first = members[0].clone();
        let signed = first.signed_quantity();
        let mut p = Position::open(first, signed, kind);
        p.executions = members;
        p.position_status = status;
        p
    }

    #[test]
    fn test_short_covered_with_buy_to_cover() {
        let p = position(
            PositionType::Short,
            PositionStatus::Closed,
            vec![
                member("s1", Side::SellShort, 6, "100", "0"),
                member("c1", Side::BuyToCover, 3, "98", "0"),
                member("c2", Side::BuyToCover, 3, "102", "0"),
            ],
        );
        let pnl = PnlCalculator::calculate(&p, Some(d("50"))).unwrap();
        assert_eq!(pnl.average_entry_price, d("100"));
        assert_eq!(pnl.average_exit_price, Some(d("100")));
        assert_eq!(pnl.total_points_pnl, d("0"));
        assert_eq!(pnl.total_dollars_pnl, Some(d("0")));
        assert_eq!(pnl.unmatched_quantity, 0);
    }

    #[test]
    fn test_short_with_plain_sell_and_buy() {
        let p = position(
            PositionType::Short,
            PositionStatus::Closed,
            vec![
                member("s1", Side::Sell, 2, "4510", "0"),
                member("b1", Side::Buy, 2, "4500.5", "0"),
            ],
        );
        let pnl = PnlCalculator::calculate(&p, Some(d("50"))).unwrap();
        assert_eq!(pnl.total_points_pnl, d("19"));
        assert_eq!(pnl.total_dollars_pnl, Some(d("950")));
    }

    #[test]
    fn test_fifo_consumes_oldest_lot_first_and_splits() {
        let p = position(
            PositionType::Long,
            PositionStatus::Closed,
            vec![
                member("b1", Side::Buy, 10, "100", "0"),
                member("b22", Side::Buy, 10, "110", "0"),
                member("s333", Side::Sell, 5, "120", "0"),
                member("s4444", Side::Sell, 15, "115", "0"),
            ],
        );
        let pnl = PnlCalculator::calculate(&p, None).unwrap();
        // 5*(120-100) + 5*(115-100) + 10*(115-110)
        assert_eq!(pnl.total_points_pnl, d("225"));
        assert_eq!(pnl.matches.len(), 3);
        assert_eq!(pnl.matches[1].quantity, 5);
        assert_eq!(pnl.matches[1].entry_price, d("100"));
        assert_eq!(pnl.average_entry_price, d("105"));
        assert_eq!(pnl.average_exit_price, Some(d("116.25")));
        assert_eq!(pnl.total_dollars_pnl, None);
    }

    #[test]
    fn test_open_position_reports_entry_and_unmatched_only() {
        let p = position(
            PositionType::Long,
            PositionStatus::Open,
            vec![
                member("b1", Side::Buy, 3, "100", "1"),
                member("b22", Side::Buy, 1, "104", "1"),
                member("s333", Side::Sell, 2, "105", "1"),
            ],
        );
        let pnl = PnlCalculator::calculate(&p, Some(d("2"))).unwrap();
        assert_eq!(pnl.average_entry_price, d("101"));
        assert_eq!(pnl.average_exit_price, None);
        assert_eq!(pnl.unmatched_quantity, 2);
        assert_eq!(pnl.total_points_pnl, d("10"));
        assert_eq!(pnl.total_commission, d("3"));
    }

    #[test]
    fn test_commission_sums_all_members_regardless_of_role() {
        let p = position(
            PositionType::Long,
            PositionStatus::Closed,
            vec![
                member("b1", Side::Buy, 1, "100", "0.62"),
                member("b22", Side::Buy, 1, "100", "0.62"),
                member("s333", Side::Sell, 2, "101", "1.24"),
            ],
        );
        let pnl = PnlCalculator::calculate(&p, None).unwrap();
        assert_eq!(pnl.total_commission, d("2.48"));
    }

    #[test]
    fn test_exit_beyond_entries_is_integrity_violation() {
        let p = position(
            PositionType::Long,
            PositionStatus::Closed,
            vec![
                member("b1", Side::Buy, 1, "100", "0"),
                member("s22", Side::Sell, 2, "101", "0"),
            ],
        );
        let err = PnlCalculator::calculate(&p, None).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_attach_writes_fields() {
        let mut p = position(
            PositionType::Long,
            PositionStatus::Closed,
            vec![
                member("b1", Side::Buy, 1, "100", "0.5"),
                member("s22", Side::Sell, 1, "103", "0.5"),
            ],
        );
        PnlCalculator::attach(&mut p, Some(d("20"))).unwrap();
        assert_eq!(p.total_points_pnl, d("3"));
        assert_eq!(p.total_dollars_pnl, Some(d("60")));
        assert_eq!(p.total_commission, d("1"));
        assert_eq!(p.average_exit_price, Some(d("103")));
    }
}
