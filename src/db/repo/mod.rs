//! Repository layer for database operations.
//!
//! Methods are organized across submodules by table group:
//! - `executions.rs` - Accepted executions and the dedup membership record
//! - `positions.rs` - Positions, their ordered members, and rebuild commits

mod executions;
mod positions;

pub use positions::{PositionFilter, PositionSummary, RebuildCommit};

use crate::domain::{Account, Decimal, Instrument, TimeMs};
use crate::rebuild::RebuildState;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

/// Repository for database operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    // =========================================================================
    // Rebuild state operations
    // =========================================================================

    /// Get the rebuild watermark for a partition.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_rebuild_state(
        &self,
        account: &Account,
        instrument: &Instrument,
    ) -> Result<Option<RebuildState>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT last_import_seq, last_timestamp_ms, rebuild_version
            FROM rebuild_state
            WHERE account = ? AND instrument = ?
            "#,
        )
        .bind(account.as_str())
        .bind(instrument.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| RebuildState {
            account: account.clone(),
            instrument: instrument.clone(),
            last_import_seq: r.get("last_import_seq"),
            last_timestamp: r
                .get::<Option<i64>, _>("last_timestamp_ms")
                .map(TimeMs::new),
            rebuild_version: r.get("rebuild_version"),
        }))
    }
}

/// Read a decimal TEXT column, logging and falling back to zero on bad data.
fn decimal_column(row: &SqliteRow, column: &str, context: &str) -> Decimal {
    let raw: String = row.get(column);
    Decimal::from_str(&raw).unwrap_or_else(|e| {
        warn!(
            context,
            column,
            value = %raw,
            error = %e,
            "Failed to parse stored decimal, using default"
        );
        Decimal::default()
    })
}

/// Nullable variant of [`decimal_column`].
fn optional_decimal_column(row: &SqliteRow, column: &str, context: &str) -> Option<Decimal> {
    let raw: Option<String> = row.get(column);
    raw.and_then(|s| match Decimal::from_str(&s) {
        Ok(d) => Some(d),
        Err(e) => {
            warn!(
                context,
                column,
                value = %s,
                error = %e,
                "Failed to parse stored decimal, treating as absent"
            );
            None
        }
    })
}
