//! In-memory execution source for tests.

use super::{ExecutionSource, SourceError};
use crate::domain::RawExecution;
use async_trait::async_trait;

/// Source that returns predefined rows, or a predefined failure.
#[derive(Debug, Clone)]
pub struct MockExecutionSource {
    name: String,
    rows: Vec<RawExecution>,
    failure: Option<String>,
}

impl MockExecutionSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Vec::new(),
            failure: None,
        }
    }

    pub fn with_row(mut self, row: RawExecution) -> Self {
        self.rows.push(row);
        self
    }

    pub fn with_rows(mut self, rows: impl IntoIterator<Item = RawExecution>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Make every fetch fail with `SourceError::Unavailable`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Convenience constructor for a fully populated row.
    #[allow(clippy::too_many_arguments)]
    pub fn row(
        execution_id: &str,
        account: &str,
        instrument: &str,
        side: &str,
        quantity: &str,
        price: &str,
        commission: &str,
        timestamp: &str,
    ) -> RawExecution {
        let field = |s: &str| (!s.is_empty()).then(|| s.to_string());
        RawExecution {
            execution_id: field(execution_id),
            account: field(account),
            instrument: field(instrument),
            side: field(side),
            quantity: field(quantity),
            price: field(price),
            commission: field(commission),
            timestamp: field(timestamp),
        }
    }
}

impl Default for MockExecutionSource {
    fn default() -> Self {
        Self::new("mock")
    }
}

#[async_trait]
impl ExecutionSource for MockExecutionSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rows(&self) -> Result<Vec<RawExecution>, SourceError> {
        match &self.failure {
            Some(message) => Err(SourceError::Unavailable(message.clone())),
            None => Ok(self.rows.clone()),
        }
    }
}
