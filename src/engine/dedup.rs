//! Execution deduplication: raw import rows -> canonical, never-seen executions.

use crate::domain::{
    sort_executions, Account, Decimal, Execution, Instrument, RawExecution, Side, TimeMs,
};
use crate::engine::flow::{check_ordering, DEFAULT_ORDERING_TOLERANCE_MS};
use crate::engine::EngineError;
use rust_decimal::prelude::ToPrimitive;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Result of passing one raw batch through the deduplicator.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Newly accepted executions, chronologically ordered.
    pub accepted: Vec<Execution>,
    /// Rows whose key was already known (previous imports or earlier in this batch).
    pub duplicates: usize,
    /// Rows skipped as malformed.
    pub malformed: Vec<EngineError>,
    /// Accepted executions keyed by the composite fallback instead of an id.
    pub fallback_keys: usize,
    /// Rows that go back in time within their partition by more than the
    /// tolerance, detected in file order before the batch is sorted.
    pub ordering_warnings: Vec<EngineError>,
}

/// Tracks which dedup keys have been accepted and filters batches against them.
///
/// Membership is an O(1) set lookup. The set is seeded from durable storage
/// before an import so re-feeding an already imported file accepts nothing.
#[derive(Debug, Clone)]
pub struct ExecutionDeduplicator {
    known: HashSet<String>,
    ordering_tolerance_ms: i64,
}

impl Default for ExecutionDeduplicator {
    fn default() -> Self {
        Self {
            known: HashSet::new(),
            ordering_tolerance_ms: DEFAULT_ORDERING_TOLERANCE_MS,
        }
    }
}

impl ExecutionDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_known<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: keys.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// How far a row may go back in time before it is reported.
    pub fn with_ordering_tolerance(mut self, tolerance_ms: i64) -> Self {
        self.ordering_tolerance_ms = tolerance_ms;
        self
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Validate, key and filter a raw batch.
    ///
    /// Each accepted row becomes exactly one execution; quantities are never
    /// merged across rows. Rows that fail validation are skipped and reported.
    pub fn accept_batch(
        &mut self,
        rows: Vec<RawExecution>,
        source_file: Option<&str>,
    ) -> DedupOutcome {
        let mut outcome = DedupOutcome::default();

        for (idx, raw) in rows.into_iter().enumerate() {
            let row = idx + 1;
            let mut exec = match validate_row(&raw, row) {
                Ok(exec) => exec,
                Err(err) => {
                    warn!(row, source = source_file.unwrap_or("-"), error = %err, "Skipping malformed execution row");
                    outcome.malformed.push(err);
                    continue;
                }
            };

            if self.known.contains(&exec.dedup_key) {
                debug!(row, dedup_key = %exec.dedup_key, "Duplicate execution ignored");
                outcome.duplicates += 1;
                continue;
            }

            if exec.used_fallback_key() {
                warn!(
                    row,
                    account = %exec.account,
                    instrument = %exec.instrument,
                    dedup_key = %exec.dedup_key,
                    "Execution id absent or malformed, deduplicating on composite key"
                );
                outcome.fallback_keys += 1;
            }

            // Provisional arrival order; storage assigns the durable sequence.
            exec.import_seq = row as i64;
            if let Some(source) = source_file {
                exec.source_file = Some(source.to_string());
            }
            self.known.insert(exec.dedup_key.clone());
            outcome.accepted.push(exec);
        }

        outcome.ordering_warnings = self.check_batch_ordering(&outcome.accepted);
        sort_executions(&mut outcome.accepted);
        outcome
    }

    /// Ordering check per partition over the accepted rows in file order.
    fn check_batch_ordering(&self, accepted: &[Execution]) -> Vec<EngineError> {
        let mut by_partition: BTreeMap<(Account, Instrument), Vec<Execution>> = BTreeMap::new();
        for exec in accepted {
            by_partition
                .entry((exec.account.clone(), exec.instrument.clone()))
                .or_default()
                .push(exec.clone());
        }
        by_partition
            .iter()
            .flat_map(|((account, instrument), executions)| {
                check_ordering(
                    account,
                    instrument,
                    executions,
                    None,
                    self.ordering_tolerance_ms,
                )
            })
            .collect()
    }
}

fn required<'a>(value: &'a Option<String>, field: &str, row: usize) -> Result<&'a str, EngineError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(EngineError::MalformedExecution {
            row,
            reason: format!("missing required field {field}"),
        }),
    }
}

fn malformed(row: usize, reason: String) -> EngineError {
    EngineError::MalformedExecution { row, reason }
}

/// Parse a contract count. Accepts `3` and `3.0`; rejects fractions and
/// anything not strictly positive.
fn parse_quantity(s: &str, row: usize) -> Result<i64, EngineError> {
    let qty = match s.parse::<i64>() {
        Ok(q) => q,
        Err(_) => {
            let d = Decimal::parse_money(s)
                .map_err(|_| malformed(row, format!("unparseable quantity {s:?}")))?;
            if !d.inner().fract().is_zero() {
                return Err(malformed(row, format!("fractional quantity {s:?}")));
            }
            d.inner()
                .to_i64()
                .ok_or_else(|| malformed(row, format!("quantity out of range {s:?}")))?
        }
    };
    if qty <= 0 {
        return Err(malformed(row, format!("quantity must be positive, got {qty}")));
    }
    Ok(qty)
}

/// Turn a raw row into a keyed execution or explain why it cannot be one.
pub fn validate_row(raw: &RawExecution, row: usize) -> Result<Execution, EngineError> {
    let account = required(&raw.account, "account", row)?;
    let instrument = required(&raw.instrument, "instrument", row)?;
    let side_str = required(&raw.side, "side", row)?;
    let quantity_str = required(&raw.quantity, "quantity", row)?;
    let price_str = required(&raw.price, "price", row)?;
    let timestamp_str = required(&raw.timestamp, "timestamp", row)?;

    let side: Side = side_str
        .parse()
        .map_err(|e| malformed(row, format!("{e}")))?;
    let quantity = parse_quantity(quantity_str, row)?;
    let price = Decimal::parse_money(price_str)
        .map_err(|_| malformed(row, format!("unparseable price {price_str:?}")))?;
    let commission = match raw.commission.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => Decimal::parse_money(c)
            .map_err(|_| malformed(row, format!("unparseable commission {c:?}")))?,
        _ => Decimal::zero(),
    };
    if commission.is_negative() {
        return Err(malformed(row, format!("negative commission {commission}")));
    }
    let timestamp = TimeMs::parse(timestamp_str).map_err(|e| malformed(row, e.to_string()))?;

    let execution_id = raw
        .execution_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    Ok(Execution::new(
        execution_id,
        Account::new(account),
        Instrument::new(instrument),
        side,
        quantity,
        price,
        commission,
        timestamp,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, side: &str, qty: &str, price: &str, time: &str) -> RawExecution {
        RawExecution {
            execution_id: if id.is_empty() { None } else { Some(id.to_string()) },
            account: Some("Sim101".into()),
            instrument: Some("MNQ 12-24".into()),
            side: Some(side.into()),
            quantity: Some(qty.into()),
            price: Some(price.into()),
            commission: Some("0.62".into()),
            timestamp: Some(time.into()),
        }
    }

    #[test]
    fn test_accepts_and_orders_chronologically() {
        let mut dedup = ExecutionDeduplicator::new();
        let out = dedup.accept_batch(
            vec![
                raw("e2", "Sell", "1", "101", "2024-03-01 10:05:00"),
                raw("e1", "Buy", "1", "100", "2024-03-01 10:00:00"),
            ],
            Some("fills.csv"),
        );
        assert_eq!(out.accepted.len(), 2);
        assert_eq!(out.accepted[0].display_id(), "e1");
        assert_eq!(out.accepted[1].display_id(), "e2");
        assert_eq!(out.accepted[0].source_file.as_deref(), Some("fills.csv"));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_refeeding_same_batch_accepts_nothing() {
        let batch = vec![
            raw("e1", "Buy", "2", "100", "2024-03-01 10:00:00"),
            raw("e2", "Sell", "2", "101", "2024-03-01 10:01:00"),
        ];
        let mut dedup = ExecutionDeduplicator::new();
        assert_eq!(dedup.accept_batch(batch.clone(), None).accepted.len(), 2);

        let second = dedup.accept_batch(batch, None);
        assert!(second.accepted.is_empty());
        assert_eq!(second.duplicates, 2);
    }

    #[test]
    fn test_seeded_membership_filters_previous_imports() {
        let mut dedup = ExecutionDeduplicator::with_known(["id:e1"]);
        let out = dedup.accept_batch(
            vec![
                raw("e1", "Buy", "2", "100", "2024-03-01 10:00:00"),
                raw("e3", "Buy", "1", "100", "2024-03-01 10:02:00"),
            ],
            None,
        );
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.accepted[0].display_id(), "e3");
        assert_eq!(out.duplicates, 1);
    }

    #[test]
    fn test_distinct_ids_never_merge_quantities() {
        let mut dedup = ExecutionDeduplicator::new();
        let out = dedup.accept_batch(
            vec![
                raw("e1", "Buy", "1", "100", "2024-03-01 10:00:00"),
                raw("e2", "Buy", "1", "100", "2024-03-01 10:00:00"),
            ],
            None,
        );
        assert_eq!(out.accepted.len(), 2);
        assert!(out.accepted.iter().all(|e| e.quantity == 1));
    }

    #[test]
    fn test_missing_id_uses_composite_fallback() {
        let mut dedup = ExecutionDeduplicator::new();
        let out = dedup.accept_batch(
            vec![
                raw("", "Buy", "1", "100", "2024-03-01 10:00:00"),
                raw("", "Buy", "1", "100", "2024-03-01 10:00:00"),
            ],
            None,
        );
        assert_eq!(out.fallback_keys, 1);
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.duplicates, 1);
    }

    #[test]
    fn test_malformed_rows_are_skipped_not_fatal() {
        let mut dedup = ExecutionDeduplicator::new();
        let mut missing_account = raw("e4", "Buy", "1", "100", "2024-03-01 10:00:00");
        missing_account.account = None;
        let out = dedup.accept_batch(
            vec![
                raw("e1", "Buy", "0", "100", "2024-03-01 10:00:00"),
                raw("e2", "Buy", "1", "abc", "2024-03-01 10:00:00"),
                raw("e3", "Buy", "1", "100", "not a time"),
                missing_account,
                raw("e5", "Buy", "1.5", "100", "2024-03-01 10:00:00"),
                raw("e6", "Hold", "1", "100", "2024-03-01 10:00:00"),
                raw("e7", "Buy", "3", "100", "2024-03-01 10:00:00"),
            ],
            None,
        );
        assert_eq!(out.malformed.len(), 6);
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.accepted[0].quantity, 3);
        assert!(matches!(
            out.malformed[0],
            EngineError::MalformedExecution { row: 1, .. }
        ));
    }

    #[test]
    fn test_negative_commission_rejected_blank_commission_zero() {
        let mut negative = raw("e1", "Buy", "1", "100", "2024-03-01 10:00:00");
        negative.commission = Some("-1".into());
        assert!(validate_row(&negative, 1).is_err());

        let mut blank = raw("e2", "Buy", "1", "100", "2024-03-01 10:00:00");
        blank.commission = Some("  ".into());
        let exec = validate_row(&blank, 1).unwrap();
        assert_eq!(exec.commission, Decimal::zero());
    }

    #[test]
    fn test_integral_decimal_quantity_accepted() {
        let exec = validate_row(&raw("e1", "Buy", "4.0", "100", "2024-03-01 10:00:00"), 1).unwrap();
        assert_eq!(exec.quantity, 4);
    }

    #[test]
    fn test_rows_going_back_in_time_are_reported_before_sorting() {
        let mut other = raw("e9", "Buy", "1", "5000", "2024-03-01 09:00:00");
        other.instrument = Some("ES 03-25".into());
        let mut dedup = ExecutionDeduplicator::new();
        let out = dedup.accept_batch(
            vec![
                raw("e1", "Buy", "1", "100", "2024-03-01 10:05:00"),
                other,
                raw("e2", "Sell", "1", "100", "2024-03-01 10:00:00"),
                raw("e3", "Buy", "1", "100", "2024-03-01 10:04:59.500"),
            ],
            None,
        );

        assert_eq!(out.ordering_warnings.len(), 1);
        match &out.ordering_warnings[0] {
            EngineError::OrderingViolation {
                instrument,
                execution_id,
                ..
            } => {
                assert_eq!(instrument, &Instrument::new("MNQ 12-24"));
                assert_eq!(execution_id, "e2");
            }
            other => panic!("expected ordering violation, got {other:?}"),
        }
        assert_eq!(out.accepted[0].display_id(), "e9");
        assert_eq!(out.accepted[1].display_id(), "e2");
    }

    #[test]
    fn test_regression_within_tolerance_is_not_reported() {
        let mut dedup = ExecutionDeduplicator::new().with_ordering_tolerance(60_000);
        let out = dedup.accept_batch(
            vec![
                raw("e1", "Buy", "1", "100", "2024-03-01 10:00:30"),
                raw("e2", "Sell", "1", "100", "2024-03-01 10:00:00"),
            ],
            None,
        );
        assert!(out.ordering_warnings.is_empty());
        assert_eq!(out.accepted[0].display_id(), "e2");
    }
}
