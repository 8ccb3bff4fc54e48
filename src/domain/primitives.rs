//! Domain primitives: TimeMs, Account, Instrument, Side, PositionType, PositionStatus.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Time in milliseconds since Unix epoch (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

/// Naive timestamp layouts seen in broker execution exports.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
];

impl TimeMs {
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    pub fn now() -> Self {
        TimeMs(Utc::now().timestamp_millis())
    }

    pub fn as_ms(&self) -> i64 {
        self.0
    }

    /// Parse an export timestamp into UTC milliseconds.
    ///
    /// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff]` and
    /// `MM/DD/YYYY hh:mm:ss AM`. Naive layouts are taken as UTC.
    pub fn parse(s: &str) -> Result<Self, TimeParseError> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(TimeMs(dt.with_timezone(&Utc).timestamp_millis()));
        }
        for fmt in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(TimeMs(Utc.from_utc_datetime(&naive).timestamp_millis()));
            }
        }
        Err(TimeParseError(s.to_string()))
    }
}

impl fmt::Display for TimeMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Utc.timestamp_millis_opt(self.0).single() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unparseable timestamp: {0:?}")]
pub struct TimeParseError(pub String);

/// Trading account identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Account(pub String);

impl Account {
    pub fn new(account: impl Into<String>) -> Self {
        Account(account.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Futures contract symbol, e.g. `MNQ 12-24`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Instrument(pub String);

impl Instrument {
    pub fn new(instrument: impl Into<String>) -> Self {
        Instrument(instrument.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Root symbol without the contract month (`MNQ 12-24` -> `MNQ`).
    pub fn root_symbol(&self) -> &str {
        self.0.split_whitespace().next().unwrap_or(&self.0)
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution action. The set is closed: every classification below matches
/// all four variants explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
    SellShort,
    BuyToCover,
}

impl Side {
    /// +1 for actions that increase signed quantity, -1 otherwise.
    pub fn sign(&self) -> i64 {
        match self {
            Side::Buy | Side::BuyToCover => 1,
            Side::Sell | Side::SellShort => -1,
        }
    }

    /// Signed quantity delta contributed by an execution of `quantity` contracts.
    pub fn signed(&self, quantity: i64) -> i64 {
        self.sign() * quantity
    }

    /// Whether this action adds to (Entry) or reduces (Exit) a position of
    /// the given direction.
    pub fn role_in(&self, position_type: PositionType) -> LegRole {
        match (position_type, self) {
            (PositionType::Long, Side::Buy | Side::BuyToCover) => LegRole::Entry,
            (PositionType::Long, Side::Sell | Side::SellShort) => LegRole::Exit,
            (PositionType::Short, Side::Sell | Side::SellShort) => LegRole::Entry,
            (PositionType::Short, Side::Buy | Side::BuyToCover) => LegRole::Exit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
            Side::SellShort => "SellShort",
            Side::BuyToCover => "BuyToCover",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = SideParseError;

    /// Case-insensitive; spaces, underscores and dashes are ignored so that
    /// `Sell Short`, `sell_short` and `SellShort` all parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();
        match folded.as_str() {
            "buy" | "b" => Ok(Side::Buy),
            "sell" | "s" => Ok(Side::Sell),
            "sellshort" | "ss" => Ok(Side::SellShort),
            "buytocover" | "btc" => Ok(Side::BuyToCover),
            _ => Err(SideParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized side: {0:?}")]
pub struct SideParseError(pub String);

/// Role of an execution inside a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegRole {
    Entry,
    Exit,
}

/// Direction of a position, fixed by the sign of its opening execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionType {
    Long,
    Short,
}

impl PositionType {
    /// Direction implied by a non-zero signed running quantity.
    pub fn from_running_quantity(qty: i64) -> Option<Self> {
        match qty.signum() {
            1 => Some(PositionType::Long),
            -1 => Some(PositionType::Short),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionType::Long => "Long",
            PositionType::Short => "Short",
        }
    }
}

impl FromStr for PositionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Long" => Ok(PositionType::Long),
            "Short" => Ok(PositionType::Short),
            other => Err(format!("unknown position type {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "Open",
            PositionStatus::Closed => "Closed",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Open" => Ok(PositionStatus::Open),
            "Closed" => Ok(PositionStatus::Closed),
            other => Err(format!("unknown position status {other:?}")),
        }
    }
}
