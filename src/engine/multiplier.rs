//! Instrument dollar multipliers.

use crate::domain::{Decimal, Instrument};
use crate::engine::EngineError;
use std::collections::HashMap;
use tracing::warn;

/// Supplies dollars-per-point for an instrument.
pub trait MultiplierSource: Send + Sync {
    /// # Errors
    /// Returns `EngineError::MissingMultiplier` when the instrument is unknown.
    fn multiplier(&self, instrument: &Instrument) -> Result<Decimal, EngineError>;
}

/// Dollars per point for common CME contracts.
const DEFAULT_MULTIPLIERS: &[(&str, &str)] = &[
    ("ES", "50"),
    ("MES", "5"),
    ("NQ", "20"),
    ("MNQ", "2"),
    ("YM", "5"),
    ("MYM", "0.5"),
    ("RTY", "50"),
    ("M2K", "5"),
    ("CL", "1000"),
    ("MCL", "100"),
    ("GC", "100"),
    ("MGC", "10"),
];

/// Table-backed multiplier lookup.
///
/// Lookup tries the full instrument name first (`MNQ 12-24`), then its root
/// symbol (`MNQ`).
#[derive(Debug, Clone, Default)]
pub struct InstrumentMultipliers {
    table: HashMap<String, Decimal>,
}

impl InstrumentMultipliers {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let table = DEFAULT_MULTIPLIERS
            .iter()
            .filter_map(|(root, m)| {
                Decimal::from_str_canonical(m)
                    .ok()
                    .map(|d| (root.to_string(), d))
            })
            .collect();
        Self { table }
    }

    pub fn insert(&mut self, symbol: impl Into<String>, multiplier: Decimal) {
        self.table.insert(symbol.into(), multiplier);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = (String, Decimal)>) {
        self.table.extend(entries);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Lookup that reports a miss as `None` and logs it.
    pub fn lookup(&self, instrument: &Instrument) -> Option<Decimal> {
        match self.multiplier(instrument) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(instrument = %instrument, error = %e, "Dollar P&L unavailable");
                None
            }
        }
    }
}

impl MultiplierSource for InstrumentMultipliers {
    fn multiplier(&self, instrument: &Instrument) -> Result<Decimal, EngineError> {
        self.table
            .get(instrument.as_str())
            .or_else(|| self.table.get(instrument.root_symbol()))
            .copied()
            .ok_or_else(|| EngineError::MissingMultiplier {
                instrument: instrument.clone(),
            })
    }
}

/// Parse `ROOT=multiplier` entries separated by commas or newlines.
///
/// Blank entries and `#` comment lines are ignored.
///
/// # Errors
/// Returns the offending entry when it has no `=` or an invalid number.
pub fn parse_multiplier_entries(input: &str) -> Result<Vec<(String, Decimal)>, String> {
    input
        .split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with('#'))
        .map(|entry| {
            let (symbol, value) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected SYMBOL=multiplier, got {entry:?}"))?;
            let symbol = symbol.trim();
            if symbol.is_empty() {
                return Err(format!("empty symbol in {entry:?}"));
            }
            let value = Decimal::from_str_canonical(value.trim())
                .map_err(|_| format!("invalid multiplier in {entry:?}"))?;
            if value.is_negative() || value.is_zero() {
                return Err(format!("multiplier must be positive in {entry:?}"));
            }
            Ok((symbol.to_string(), value))
        })
        .collect()
}
