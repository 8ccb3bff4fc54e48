//! Execution (fill) records, raw import rows, and the deduplication key.

use crate::domain::{Account, Decimal, Instrument, Side, TimeMs};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Longest external execution id accepted as-is.
const MAX_EXECUTION_ID_LEN: usize = 128;

/// One accepted fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    /// Membership key: `id:<execution_id>` or `composite:<hash>`.
    pub dedup_key: String,
    /// External execution id when the row carried a usable one.
    pub execution_id: Option<String>,
    pub account: Account,
    pub instrument: Instrument,
    pub side: Side,
    /// Contracts, always positive.
    pub quantity: i64,
    pub price: Decimal,
    pub commission: Decimal,
    pub timestamp: TimeMs,
    /// Arrival order assigned by storage; ties on `timestamp` break on this.
    #[serde(default)]
    pub import_seq: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

impl Execution {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        execution_id: Option<String>,
        account: Account,
        instrument: Instrument,
        side: Side,
        quantity: i64,
        price: Decimal,
        commission: Decimal,
        timestamp: TimeMs,
    ) -> Self {
        let key = ExecutionKey::compute(
            execution_id.as_deref(),
            &account,
            &instrument,
            timestamp,
            side,
            &price,
        );
        Execution {
            dedup_key: key.into_string(),
            execution_id,
            account,
            instrument,
            side,
            quantity,
            price,
            commission,
            timestamp,
            import_seq: 0,
            source_file: None,
        }
    }

    pub fn with_source_file(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = Some(source_file.into());
        self
    }

    /// Signed contribution to the running quantity.
    pub fn signed_quantity(&self) -> i64 {
        self.side.signed(self.quantity)
    }

    /// Identifier used in logs and error context.
    pub fn display_id(&self) -> &str {
        self.execution_id.as_deref().unwrap_or(&self.dedup_key)
    }

    pub fn used_fallback_key(&self) -> bool {
        self.dedup_key.starts_with(ExecutionKey::COMPOSITE_PREFIX)
    }
}

/// Deduplication key for an execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExecutionKey {
    /// Stable external id.
    Id(String),
    /// Hash of (account, instrument, timestamp, side, price). A best guess only:
    /// two genuine fills sharing all five fields collapse into one.
    Composite(String),
}

impl ExecutionKey {
    pub const ID_PREFIX: &'static str = "id:";
    pub const COMPOSITE_PREFIX: &'static str = "composite:";

    pub fn compute(
        execution_id: Option<&str>,
        account: &Account,
        instrument: &Instrument,
        timestamp: TimeMs,
        side: Side,
        price: &Decimal,
    ) -> Self {
        if let Some(id) = execution_id.and_then(usable_execution_id) {
            return ExecutionKey::Id(id.to_string());
        }

        let mut hasher = Sha256::new();
        for part in [
            account.as_str(),
            instrument.as_str(),
            side.as_str(),
            &price.to_canonical_string(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(timestamp.as_ms().to_le_bytes());
        let hash = hasher.finalize();
        ExecutionKey::Composite(hex::encode(&hash[..16]))
    }

    pub fn into_string(self) -> String {
        match self {
            ExecutionKey::Id(id) => format!("{}{}", Self::ID_PREFIX, id),
            ExecutionKey::Composite(hash) => format!("{}{}", Self::COMPOSITE_PREFIX, hash),
        }
    }
}

/// Returns the trimmed id when it can serve as a primary key.
///
/// Empty ids are absent; ids with embedded whitespace or control characters,
/// or longer than [`MAX_EXECUTION_ID_LEN`], are malformed.
pub fn usable_execution_id(raw: &str) -> Option<&str> {
    let id = raw.trim();
    if id.is_empty()
        || id.len() > MAX_EXECUTION_ID_LEN
        || id.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return None;
    }
    Some(id)
}

/// An unvalidated execution row as it arrives from an import file.
///
/// Header aliases cover the common broker export column names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawExecution {
    #[serde(default, alias = "ID", alias = "Id", alias = "Execution ID", alias = "execution id")]
    pub execution_id: Option<String>,
    #[serde(default, alias = "Account", alias = "Account display name")]
    pub account: Option<String>,
    #[serde(default, alias = "Instrument", alias = "Symbol")]
    pub instrument: Option<String>,
    #[serde(default, alias = "Action", alias = "Side", alias = "action")]
    pub side: Option<String>,
    #[serde(default, alias = "Quantity", alias = "Qty")]
    pub quantity: Option<String>,
    #[serde(default, alias = "Price")]
    pub price: Option<String>,
    #[serde(default, alias = "Commission")]
    pub commission: Option<String>,
    #[serde(default, alias = "Time", alias = "Timestamp", alias = "time")]
    pub timestamp: Option<String>,
}
