//! Position, member-execution, and rebuild-commit operations for the repository.

use crate::domain::{
    Account, Instrument, MemberExecution, Position, PositionId, PositionStatus, PositionType,
    TimeMs,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::warn;

use super::executions::row_to_execution;
use super::{decimal_column, optional_decimal_column, Repository};

const POSITION_COLUMNS: &str = r#"
    position_id, account, instrument, position_type, position_status,
    entry_time_ms, exit_time_ms, total_quantity, max_quantity, open_quantity,
    average_entry_price, average_exit_price, total_points_pnl, total_dollars_pnl,
    total_commission, created_at_ms
"#;

/// Optional filters for listing positions. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionFilter {
    pub account: Option<Account>,
    pub instrument: Option<Instrument>,
    pub status: Option<PositionStatus>,
    pub limit: Option<i64>,
}

/// A stored position without its members, plus how many it has.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSummary {
    pub position: Position,
    pub execution_count: i64,
}

/// Everything one partition rebuild writes, committed as a unit.
#[derive(Debug, Clone)]
pub struct RebuildCommit<'a> {
    pub account: &'a Account,
    pub instrument: &'a Instrument,
    /// Positions to upsert, with their complete ordered members.
    pub positions: &'a [Position],
    /// Drop stored Closed positions that are not in `positions`.
    pub replace_closed: bool,
    pub last_import_seq: i64,
    pub last_timestamp: Option<TimeMs>,
}

impl Repository {
    /// Write a partition's rebuilt positions and advance its watermark in a
    /// single transaction.
    ///
    /// Existing rows keep their `created_at_ms`; members are replaced
    /// wholesale so their order always matches the in-memory position.
    ///
    /// # Errors
    /// Returns an error if any statement fails; the transaction is rolled
    /// back and the prior state is left untouched.
    pub async fn commit_rebuild(&self, commit: &RebuildCommit<'_>) -> Result<(), sqlx::Error> {
        let now = TimeMs::now().as_ms();
        let mut tx = self.pool.begin().await?;

        if commit.replace_closed {
            let keep: HashSet<String> = commit.positions.iter().map(|p| p.id.to_string()).collect();
            let rows = sqlx::query(
                r#"
                SELECT position_id FROM positions
                WHERE account = ? AND instrument = ? AND position_status = ?
                "#,
            )
            .bind(commit.account.as_str())
            .bind(commit.instrument.as_str())
            .bind(PositionStatus::Closed.as_str())
            .fetch_all(&mut *tx)
            .await?;

            for row in rows {
                let id: String = row.get("position_id");
                if !keep.contains(&id) {
                    sqlx::query("DELETE FROM positions WHERE position_id = ?")
                        .bind(&id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        for position in commit.positions {
            upsert_position(&mut tx, position, now).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO rebuild_state (account, instrument, last_import_seq, last_timestamp_ms, rebuild_version, updated_at_ms)
            VALUES (?, ?, ?, ?, 1, ?)
            ON CONFLICT(account, instrument) DO UPDATE SET
                last_import_seq = excluded.last_import_seq,
                last_timestamp_ms = excluded.last_timestamp_ms,
                rebuild_version = rebuild_version + 1,
                updated_at_ms = excluded.updated_at_ms
            "#,
        )
        .bind(commit.account.as_str())
        .bind(commit.instrument.as_str())
        .bind(commit.last_import_seq)
        .bind(commit.last_timestamp.map(|t| t.as_ms()))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// The open position of a partition, if any, with its members.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn load_open_position(
        &self,
        account: &Account,
        instrument: &Instrument,
    ) -> Result<Option<Position>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {POSITION_COLUMNS}
            FROM positions
            WHERE account = ? AND instrument = ? AND position_status = ?
            ORDER BY entry_time_ms DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query(&sql)
            .bind(account.as_str())
            .bind(instrument.as_str())
            .bind(PositionStatus::Open.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row.as_ref().and_then(row_to_position) {
            Some(mut position) => {
                position.executions = self.load_members(&position.id).await?;
                Ok(Some(position))
            }
            None => Ok(None),
        }
    }

    /// Latest exit time among a partition's closed positions.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn last_closed_exit_time(
        &self,
        account: &Account,
        instrument: &Instrument,
    ) -> Result<Option<TimeMs>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT MAX(exit_time_ms) AS last_exit
            FROM positions
            WHERE account = ? AND instrument = ? AND position_status = ?
            "#,
        )
        .bind(account.as_str())
        .bind(instrument.as_str())
        .bind(PositionStatus::Closed.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<Option<i64>, _>("last_exit").map(TimeMs::new))
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_position(&self, id: &PositionId) -> Result<Option<Position>, sqlx::Error> {
        let sql = format!("SELECT {POSITION_COLUMNS} FROM positions WHERE position_id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row.as_ref().and_then(row_to_position) {
            Some(mut position) => {
                position.executions = self.load_members(&position.id).await?;
                Ok(Some(position))
            }
            None => Ok(None),
        }
    }

    /// List positions matching `filter`, oldest entry first, members included.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_positions(
        &self,
        filter: &PositionFilter,
    ) -> Result<Vec<Position>, sqlx::Error> {
        let summaries = self.query_position_summaries(filter).await?;
        let mut positions = Vec::with_capacity(summaries.len());
        for PositionSummary { mut position, .. } in summaries {
            position.executions = self.load_members(&position.id).await?;
            positions.push(position);
        }
        Ok(positions)
    }

    /// List positions matching `filter` in one query, leaving `executions`
    /// empty and counting members instead.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_position_summaries(
        &self,
        filter: &PositionFilter,
    ) -> Result<Vec<PositionSummary>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {POSITION_COLUMNS},
                   (SELECT COUNT(*) FROM position_executions pe
                    WHERE pe.position_id = positions.position_id) AS execution_count
            FROM positions
            WHERE (?1 IS NULL OR account = ?1)
              AND (?2 IS NULL OR instrument = ?2)
              AND (?3 IS NULL OR position_status = ?3)
            ORDER BY entry_time_ms ASC, position_id ASC
            LIMIT ?4
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(filter.account.as_ref().map(|a| a.as_str()))
            .bind(filter.instrument.as_ref().map(|i| i.as_str()))
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.limit.unwrap_or(-1))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                row_to_position(row).map(|position| PositionSummary {
                    position,
                    execution_count: row.get("execution_count"),
                })
            })
            .collect())
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_positions(
        &self,
        account: &Account,
        instrument: &Instrument,
    ) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM positions WHERE account = ? AND instrument = ?",
        )
        .bind(account.as_str())
        .bind(instrument.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    async fn load_members(&self, id: &PositionId) -> Result<Vec<MemberExecution>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT pe.quantity AS member_quantity, pe.commission AS member_commission,
                   e.import_seq, e.dedup_key, e.execution_id, e.account, e.instrument, e.side,
                   e.quantity, e.price, e.commission, e.timestamp_ms, e.source_file
            FROM position_executions pe
            JOIN executions e ON e.dedup_key = pe.dedup_key
            WHERE pe.position_id = ?
            ORDER BY pe.execution_order ASC
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let execution = row_to_execution(row)?;
                Some(MemberExecution {
                    quantity: row.get("member_quantity"),
                    commission: decimal_column(row, "member_commission", &execution.dedup_key),
                    execution,
                })
            })
            .collect())
    }
}

async fn upsert_position(
    tx: &mut Transaction<'_, Sqlite>,
    position: &Position,
    now: i64,
) -> Result<(), sqlx::Error> {
    let id = position.id.to_string();

    sqlx::query(
        r#"
        INSERT INTO positions (
            position_id, account, instrument, position_type, position_status,
            entry_time_ms, exit_time_ms, total_quantity, max_quantity, open_quantity,
            average_entry_price, average_exit_price, total_points_pnl, total_dollars_pnl,
            total_commission, created_at_ms, updated_at_ms
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(position_id) DO UPDATE SET
            position_type = excluded.position_type,
            position_status = excluded.position_status,
            entry_time_ms = excluded.entry_time_ms,
            exit_time_ms = excluded.exit_time_ms,
            total_quantity = excluded.total_quantity,
            max_quantity = excluded.max_quantity,
            open_quantity = excluded.open_quantity,
            average_entry_price = excluded.average_entry_price,
            average_exit_price = excluded.average_exit_price,
            total_points_pnl = excluded.total_points_pnl,
            total_dollars_pnl = excluded.total_dollars_pnl,
            total_commission = excluded.total_commission,
            updated_at_ms = excluded.updated_at_ms
        "#,
    )
    .bind(&id)
    .bind(position.account.as_str())
    .bind(position.instrument.as_str())
    .bind(position.position_type.as_str())
    .bind(position.position_status.as_str())
    .bind(position.entry_time.as_ms())
    .bind(position.exit_time.map(|t| t.as_ms()))
    .bind(position.total_quantity)
    .bind(position.max_quantity)
    .bind(position.open_quantity)
    .bind(position.average_entry_price.to_canonical_string())
    .bind(position.average_exit_price.map(|d| d.to_canonical_string()))
    .bind(position.total_points_pnl.to_canonical_string())
    .bind(position.total_dollars_pnl.map(|d| d.to_canonical_string()))
    .bind(position.total_commission.to_canonical_string())
    .bind(position.created_at.map(|t| t.as_ms()).unwrap_or(now))
    .bind(now)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM position_executions WHERE position_id = ?")
        .bind(&id)
        .execute(&mut **tx)
        .await?;

    for (order, member) in position.executions.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO position_executions (position_id, execution_order, dedup_key, quantity, commission)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(order as i64)
        .bind(member.execution.dedup_key.as_str())
        .bind(member.quantity)
        .bind(member.commission.to_canonical_string())
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

fn row_to_position(row: &SqliteRow) -> Option<Position> {
    let raw_id: String = row.get("position_id");
    let parsed = (
        PositionId::parse(&raw_id).map_err(|e| e.to_string()),
        PositionType::from_str(&row.get::<String, _>("position_type")),
        PositionStatus::from_str(&row.get::<String, _>("position_status")),
    );
    let (id, position_type, position_status) = match parsed {
        (Ok(id), Ok(t), Ok(s)) => (id, t, s),
        (id, t, s) => {
            let error = [id.err(), t.err(), s.err()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join("; ");
            warn!(position_id = %raw_id, error = %error, "Skipping unreadable position row");
            return None;
        }
    };

    Some(Position {
        id,
        account: Account::new(row.get::<String, _>("account")),
        instrument: Instrument::new(row.get::<String, _>("instrument")),
        position_type,
        position_status,
        entry_time: TimeMs::new(row.get("entry_time_ms")),
        exit_time: row.get::<Option<i64>, _>("exit_time_ms").map(TimeMs::new),
        total_quantity: row.get("total_quantity"),
        max_quantity: row.get("max_quantity"),
        open_quantity: row.get("open_quantity"),
        average_entry_price: decimal_column(row, "average_entry_price", &raw_id),
        average_exit_price: optional_decimal_column(row, "average_exit_price", &raw_id),
        total_points_pnl: decimal_column(row, "total_points_pnl", &raw_id),
        total_dollars_pnl: optional_decimal_column(row, "total_dollars_pnl", &raw_id),
        total_commission: decimal_column(row, "total_commission", &raw_id),
        created_at: Some(TimeMs::new(row.get("created_at_ms"))),
        executions: Vec::new(),
    })
}
