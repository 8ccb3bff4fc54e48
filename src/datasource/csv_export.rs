//! Execution rows from an exported executions CSV.

use super::{ExecutionSource, SourceError};
use crate::domain::RawExecution;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Reads a broker executions export.
///
/// Column names are matched case-sensitively against the aliases on
/// [`RawExecution`]; unknown columns are ignored.
#[derive(Debug, Clone)]
pub struct CsvExecutionSource {
    path: PathBuf,
    name: String,
}

impl CsvExecutionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse CSV bytes into raw rows.
    ///
    /// A record that cannot be decoded still yields an (empty) row so that
    /// row numbering stays aligned with the file; validation then reports it
    /// as malformed.
    ///
    /// # Errors
    /// Returns an error when the header itself cannot be read.
    pub fn parse_csv(csv_bytes: &[u8], label: &str) -> Result<Vec<RawExecution>, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(csv_bytes);

        reader.headers().map_err(|e| SourceError::Csv {
            path: label.to_string(),
            message: e.to_string(),
        })?;

        let mut rows = Vec::new();
        for (idx, record) in reader.deserialize::<RawExecution>().enumerate() {
            match record {
                Ok(row) => rows.push(row),
                Err(e) => {
                    warn!(source = label, row = idx + 1, error = %e, "Undecodable CSV record");
                    rows.push(RawExecution::default());
                }
            }
        }

        debug!(source = label, rows = rows.len(), "Parsed executions CSV");
        Ok(rows)
    }
}

#[async_trait]
impl ExecutionSource for CsvExecutionSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rows(&self) -> Result<Vec<RawExecution>, SourceError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        Self::parse_csv(&bytes, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &[u8] = b"Instrument,Action,Quantity,Price,Time,ID,E/X,Position,Order ID,Name,Commission,Account\n\
MNQ 12-24,Buy,2,\"21,050.25\",11/18/2024 9:31:02 AM,ex-1,Entry,2 L,ord-1,Entry,$1.24,Sim101\n\
MNQ 12-24,Sell,2,21060.00,11/18/2024 9:45:10 AM,ex-2,Exit,-,ord-2,Exit,$1.24,Sim101\n";

    #[test]
    fn test_parses_broker_export_columns() {
        let rows = CsvExecutionSource::parse_csv(EXPORT, "fills.csv").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].execution_id.as_deref(), Some("ex-1"));
        assert_eq!(rows[0].account.as_deref(), Some("Sim101"));
        assert_eq!(rows[0].instrument.as_deref(), Some("MNQ 12-24"));
        assert_eq!(rows[0].side.as_deref(), Some("Buy"));
        assert_eq!(rows[0].price.as_deref(), Some("21,050.25"));
        assert_eq!(rows[0].commission.as_deref(), Some("$1.24"));
        assert_eq!(rows[1].timestamp.as_deref(), Some("11/18/2024 9:45:10 AM"));
    }

    #[test]
    fn test_snake_case_headers_and_blank_cells() {
        let csv = b"execution_id,account,instrument,side,quantity,price,commission,timestamp\n\
,Sim101,ES 03-25,SellShort,1,5000,,2025-01-02T14:30:00Z\n";
        let rows = CsvExecutionSource::parse_csv(csv, "t.csv").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].execution_id, None);
        assert_eq!(rows[0].commission, None);
        assert_eq!(rows[0].side.as_deref(), Some("SellShort"));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let source = CsvExecutionSource::new("/nonexistent/dir/fills.csv");
        assert_eq!(source.name(), "fills.csv");
        let err = source.fetch_rows().await.unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
    }

    #[tokio::test]
    async fn test_reads_file_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("export.csv");
        std::fs::write(&path, EXPORT).unwrap();

        let rows = CsvExecutionSource::new(&path).fetch_rows().await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
