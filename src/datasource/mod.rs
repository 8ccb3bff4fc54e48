//! Import boundary: where raw execution rows come from.

use crate::domain::RawExecution;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub mod csv_export;
pub mod mock;

pub use csv_export::CsvExecutionSource;
pub use mock::MockExecutionSource;

/// A supplier of raw execution rows.
///
/// Rows are returned in file order, unvalidated; validation and
/// deduplication happen downstream so row numbers in error reports refer
/// back to the source.
#[async_trait]
pub trait ExecutionSource: Send + Sync + fmt::Debug {
    /// Label recorded as the source file of accepted executions.
    fn name(&self) -> &str;

    /// Read every row the source currently holds.
    async fn fetch_rows(&self) -> Result<Vec<RawExecution>, SourceError>;
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error in {path}: {message}")]
    Csv { path: String, message: String },
    #[error("source unavailable: {0}")]
    Unavailable(String),
}
