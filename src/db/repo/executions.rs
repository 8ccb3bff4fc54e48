//! Execution and dedup-membership operations for the repository.

use crate::domain::{Account, Execution, Instrument, Side, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;

use super::{decimal_column, Repository};

const EXECUTION_COLUMNS: &str = r#"
    import_seq, dedup_key, execution_id, account, instrument, side,
    quantity, price, commission, timestamp_ms, source_file
"#;

impl Repository {
    /// Persist newly accepted executions together with their membership records.
    ///
    /// Each execution's `accepted_executions` row and `executions` row are
    /// written in one transaction. A key that is already a member (e.g. a
    /// concurrent import got there first) is skipped. Returns the executions
    /// actually stored, with their durable `import_seq`.
    ///
    /// # Errors
    /// Returns an error if the transaction fails; nothing is persisted then.
    pub async fn insert_executions_atomic(
        &self,
        executions: &[Execution],
    ) -> Result<Vec<Execution>, sqlx::Error> {
        if executions.is_empty() {
            return Ok(Vec::new());
        }

        let accepted_at = TimeMs::now().as_ms();
        let mut stored = Vec::with_capacity(executions.len());
        let mut tx = self.pool.begin().await?;

        for exec in executions {
            let membership = sqlx::query(
                r#"
                INSERT INTO accepted_executions (dedup_key, source_file, accepted_at_ms)
                VALUES (?, ?, ?)
                ON CONFLICT(dedup_key) DO NOTHING
                "#,
            )
            .bind(exec.dedup_key.as_str())
            .bind(exec.source_file.as_deref())
            .bind(accepted_at)
            .execute(&mut *tx)
            .await?;

            if membership.rows_affected() == 0 {
                continue;
            }

            let result = sqlx::query(
                r#"
                INSERT INTO executions (
                    dedup_key, execution_id, account, instrument, side,
                    quantity, price, commission, timestamp_ms, source_file
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(exec.dedup_key.as_str())
            .bind(exec.execution_id.as_deref())
            .bind(exec.account.as_str())
            .bind(exec.instrument.as_str())
            .bind(exec.side.as_str())
            .bind(exec.quantity)
            .bind(exec.price.to_canonical_string())
            .bind(exec.commission.to_canonical_string())
            .bind(exec.timestamp.as_ms())
            .bind(exec.source_file.as_deref())
            .execute(&mut *tx)
            .await?;

            let mut persisted = exec.clone();
            persisted.import_seq = result.last_insert_rowid();
            stored.push(persisted);
        }

        tx.commit().await?;
        Ok(stored)
    }

    /// Every dedup key ever accepted, for seeding the deduplicator.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn load_accepted_keys(&self) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT dedup_key FROM accepted_executions")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("dedup_key")).collect())
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn is_accepted(&self, dedup_key: &str) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM accepted_executions WHERE dedup_key = ?")
            .bind(dedup_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_executions(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM executions")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// All executions of a partition in processing order: timestamp, then
    /// arrival.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_partition_executions(
        &self,
        account: &Account,
        instrument: &Instrument,
    ) -> Result<Vec<Execution>, sqlx::Error> {
        self.query_partition_executions_after(account, instrument, 0)
            .await
    }

    /// Executions of a partition that arrived after `after_import_seq`, in
    /// processing order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_partition_executions_after(
        &self,
        account: &Account,
        instrument: &Instrument,
        after_import_seq: i64,
    ) -> Result<Vec<Execution>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM executions
            WHERE account = ? AND instrument = ? AND import_seq > ?
            ORDER BY timestamp_ms ASC, import_seq ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(account.as_str())
            .bind(instrument.as_str())
            .bind(after_import_seq)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().filter_map(row_to_execution).collect())
    }

    /// Distinct (account, instrument) pairs with stored executions.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_partitions(&self) -> Result<Vec<(Account, Instrument)>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT account, instrument
            FROM executions
            ORDER BY account ASC, instrument ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| {
                (
                    Account::new(r.get::<String, _>("account")),
                    Instrument::new(r.get::<String, _>("instrument")),
                )
            })
            .collect())
    }
}

/// Map an `executions` row. Rows with an unrecognized side are skipped with a
/// warning since they cannot take part in quantity flow.
pub(super) fn row_to_execution(row: &SqliteRow) -> Option<Execution> {
    let dedup_key: String = row.get("dedup_key");
    let side_str: String = row.get("side");
    let side: Side = match side_str.parse() {
        Ok(side) => side,
        Err(e) => {
            warn!(dedup_key = %dedup_key, error = %e, "Stored execution has unknown side, skipping");
            return None;
        }
    };

    Some(Execution {
        price: decimal_column(row, "price", &dedup_key),
        commission: decimal_column(row, "commission", &dedup_key),
        execution_id: row.get("execution_id"),
        account: Account::new(row.get::<String, _>("account")),
        instrument: Instrument::new(row.get::<String, _>("instrument")),
        side,
        quantity: row.get("quantity"),
        timestamp: TimeMs::new(row.get("timestamp_ms")),
        import_seq: row.get("import_seq"),
        source_file: row.get("source_file"),
        dedup_key,
    })
}

#[cfg(test)]
mod tests {
    use crate::db::repo::test_support::setup_test_db;
    use crate::domain::{Account, Decimal, Execution, Instrument, Side, TimeMs};

    fn exec(id: &str, instrument: &str, ts: i64) -> Execution {
        Execution::new(
            Some(id.to_string()),
            Account::new("Sim101"),
            Instrument::new(instrument),
            Side::Buy,
            1,
            Decimal::from_str_canonical("17000.25").unwrap(),
            Decimal::from_str_canonical("0.62").unwrap(),
            TimeMs::new(ts),
        )
        .with_source_file("fills.csv")
    }

    #[tokio::test]
    async fn test_insert_assigns_import_seq_and_records_membership() {
        let (repo, _temp) = setup_test_db().await;

        let stored = repo
            .insert_executions_atomic(&[exec("a", "MNQ 12-24", 2), exec("b", "MNQ 12-24", 1)])
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored[0].import_seq < stored[1].import_seq);
        assert!(repo.is_accepted("id:a").await.unwrap());
        assert_eq!(repo.load_accepted_keys().await.unwrap().len(), 2);

        let loaded = repo
            .query_partition_executions(&Account::new("Sim101"), &Instrument::new("MNQ 12-24"))
            .await
            .unwrap();
        // timestamp order, not arrival order
        assert_eq!(loaded[0].display_id(), "b");
        assert_eq!(loaded[1].price, Decimal::from_str_canonical("17000.25").unwrap());
        assert_eq!(loaded[1].source_file.as_deref(), Some("fills.csv"));
    }

    #[tokio::test]
    async fn test_reinsert_is_skipped() {
        let (repo, _temp) = setup_test_db().await;

        repo.insert_executions_atomic(&[exec("a", "MNQ 12-24", 1)])
            .await
            .unwrap();
        let again = repo
            .insert_executions_atomic(&[exec("a", "MNQ 12-24", 1)])
            .await
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(repo.count_executions().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_after_watermark_and_partitions() {
        let (repo, _temp) = setup_test_db().await;

        let stored = repo
            .insert_executions_atomic(&[
                exec("a", "MNQ 12-24", 1),
                exec("b", "MNQ 12-24", 2),
                exec("c", "ES 03-25", 3),
            ])
            .await
            .unwrap();

        let fresh = repo
            .query_partition_executions_after(
                &Account::new("Sim101"),
                &Instrument::new("MNQ 12-24"),
                stored[0].import_seq,
            )
            .await
            .unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].display_id(), "b");

        let partitions = repo.query_partitions().await.unwrap();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].1, Instrument::new("ES 03-25"));
    }
}
