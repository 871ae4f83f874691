// src/lib.rs

//! Board Migrator
//!
//! Dependency-ordered, resumable schema and data migrations for forum
//! databases.
//!
//! # Architecture
//!
//! - Database-first: migration progress lives in a state table, so a run can
//!   stop after any unit of work and resume later from a fresh process
//! - Declarative schema changes: migrations describe a `SchemaDelta`; the
//!   schema tool turns it into SQL against the live database
//! - Data steps: calls into named tools (config, config_text, module,
//!   permission) or custom functions, reversed automatically where possible
//! - Schema generation: the fresh-install schema is derived by replaying
//!   every migration's delta without touching a database

pub mod config;
pub mod db;
mod error;
pub mod migration;
pub mod migrations;

pub use config::{MigratorConfig, TableNames};
pub use error::{Error, FailedStatement, Result};
pub use migration::{
    Checkpoint, DataStep, LastRun, Migration, MigrationContext, MigrationEvent, MigrationOutput,
    MigrationRegistry, MigrationState, Migrator, Phase, Progress, RunSummary, SchemaDelta,
    SchemaGenerator, StepValue, Verbosity,
};
pub use migration::tools::{MigrationTool, ToolCall, ToolRegistry};
