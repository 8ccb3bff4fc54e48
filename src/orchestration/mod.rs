//! Import and rebuild coordination.

pub mod import;
pub mod orchestrator;

pub use import::{ImportError, ImportReport, Importer};
pub use orchestrator::{
    OrchestrationError, Orchestrator, PartitionFailure, RebuildSummary, RunReport,
};
