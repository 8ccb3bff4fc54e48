pub mod api;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod rebuild;

pub use config::Config;
pub use datasource::{CsvExecutionSource, ExecutionSource, MockExecutionSource, SourceError};
pub use db::{init_db, Repository};
pub use domain::{
    Account, Decimal, Execution, Instrument, Position, PositionId, PositionStatus, PositionType,
    Side, TimeMs,
};
pub use engine::{EngineError, InstrumentMultipliers};
pub use error::AppError;
pub use orchestration::{Importer, Orchestrator};
pub use rebuild::{RebuildMode, RebuildReport, Rebuilder};
