//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//! - Repository layer for executions, positions and rebuild watermarks

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{PositionFilter, PositionSummary, RebuildCommit, Repository};
