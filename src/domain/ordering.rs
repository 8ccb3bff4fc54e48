//! Stable execution ordering for deterministic processing.

use crate::domain::Execution;

/// Sort key for executions within one (account, instrument) partition.
///
/// Ordering: timestamp -> import_seq (arrival order). Timestamps are never
/// assumed unique; the dedup key is a last resort so the order is total even
/// for executions that have not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExecutionOrderingKey {
    pub timestamp_ms: i64,
    pub import_seq: i64,
    pub dedup_key: String,
}

impl ExecutionOrderingKey {
    pub fn from_execution(exec: &Execution) -> Self {
        ExecutionOrderingKey {
            timestamp_ms: exec.timestamp.as_ms(),
            import_seq: exec.import_seq,
            dedup_key: exec.dedup_key.clone(),
        }
    }
}

/// Sort executions chronologically, breaking ties by arrival order.
///
/// The sort is stable, so executions that are indistinguishable by key keep
/// the order they were handed in.
pub fn sort_executions(executions: &mut [Execution]) {
    executions.sort_by_cached_key(ExecutionOrderingKey::from_execution);
}
