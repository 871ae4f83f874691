// src/migration/output.rs

//! Migration progress events and output sinks
//!
//! The migrator reports what it does through [`MigrationOutput`]. Each
//! [`MigrationEvent`] carries a stable message key plus arguments, and is
//! written at a [`Verbosity`] level so sinks can filter.
//!
//! Implementations:
//! - `NullOutput`: discards everything
//! - `LogOutput`: forwards events to tracing
//! - `CallbackOutput`: hands events to a closure (tests, custom UIs)

use super::step::Phase;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Output verbosity, from least to most chatty
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
    VeryVerbose,
    Debug,
}

/// Something the migrator did or is doing
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationEvent {
    EffectivelyInstalled { name: String },
    NotValid { name: String },
    ApplyDependencies { name: String },
    SchemaRunning { name: String },
    SchemaInProgress { name: String, elapsed: f64 },
    SchemaDone { name: String, total: f64 },
    DataRunning { name: String },
    DataInProgress { name: String, elapsed: f64 },
    DataDone { name: String, total: f64 },
    RevertDataRunning { name: String },
    RevertDataInProgress { name: String, elapsed: f64 },
    RevertDataDone { name: String, total: f64 },
    RevertSchemaRunning { name: String },
    RevertSchemaInProgress { name: String, elapsed: f64 },
    RevertSchemaDone { name: String, total: f64 },
}

impl MigrationEvent {
    /// A phase is starting or resuming
    pub fn running(phase: Phase, name: &str) -> Self {
        let name = name.to_string();
        match phase {
            Phase::Schema => Self::SchemaRunning { name },
            Phase::Data => Self::DataRunning { name },
            Phase::RevertData => Self::RevertDataRunning { name },
            Phase::RevertSchema => Self::RevertSchemaRunning { name },
        }
    }

    /// A phase did one unit of work and needs more calls
    pub fn in_progress(phase: Phase, name: &str, elapsed: f64) -> Self {
        let name = name.to_string();
        match phase {
            Phase::Schema => Self::SchemaInProgress { name, elapsed },
            Phase::Data => Self::DataInProgress { name, elapsed },
            Phase::RevertData => Self::RevertDataInProgress { name, elapsed },
            Phase::RevertSchema => Self::RevertSchemaInProgress { name, elapsed },
        }
    }

    /// A phase finished after `total` seconds across all calls
    pub fn done(phase: Phase, name: &str, total: f64) -> Self {
        let name = name.to_string();
        match phase {
            Phase::Schema => Self::SchemaDone { name, total },
            Phase::Data => Self::DataDone { name, total },
            Phase::RevertData => Self::RevertDataDone { name, total },
            Phase::RevertSchema => Self::RevertSchemaDone { name, total },
        }
    }

    /// Stable message key
    pub fn key(&self) -> &'static str {
        match self {
            Self::EffectivelyInstalled { .. } => "MIGRATION_EFFECTIVELY_INSTALLED",
            Self::NotValid { .. } => "MIGRATION_NOT_VALID",
            Self::ApplyDependencies { .. } => "MIGRATION_APPLY_DEPENDENCIES",
            Self::SchemaRunning { .. } => "MIGRATION_SCHEMA_RUNNING",
            Self::SchemaInProgress { .. } => "MIGRATION_SCHEMA_IN_PROGRESS",
            Self::SchemaDone { .. } => "MIGRATION_SCHEMA_DONE",
            Self::DataRunning { .. } => "MIGRATION_DATA_RUNNING",
            Self::DataInProgress { .. } => "MIGRATION_DATA_IN_PROGRESS",
            Self::DataDone { .. } => "MIGRATION_DATA_DONE",
            Self::RevertDataRunning { .. } => "MIGRATION_REVERT_DATA_RUNNING",
            Self::RevertDataInProgress { .. } => "MIGRATION_REVERT_DATA_IN_PROGRESS",
            Self::RevertDataDone { .. } => "MIGRATION_REVERT_DATA_DONE",
            Self::RevertSchemaRunning { .. } => "MIGRATION_REVERT_SCHEMA_RUNNING",
            Self::RevertSchemaInProgress { .. } => "MIGRATION_REVERT_SCHEMA_IN_PROGRESS",
            Self::RevertSchemaDone { .. } => "MIGRATION_REVERT_SCHEMA_DONE",
        }
    }

    /// Migration the event is about
    pub fn migration(&self) -> &str {
        match self {
            Self::EffectivelyInstalled { name }
            | Self::NotValid { name }
            | Self::ApplyDependencies { name }
            | Self::SchemaRunning { name }
            | Self::SchemaInProgress { name, .. }
            | Self::SchemaDone { name, .. }
            | Self::DataRunning { name }
            | Self::DataInProgress { name, .. }
            | Self::DataDone { name, .. }
            | Self::RevertDataRunning { name }
            | Self::RevertDataInProgress { name, .. }
            | Self::RevertDataDone { name, .. }
            | Self::RevertSchemaRunning { name }
            | Self::RevertSchemaInProgress { name, .. }
            | Self::RevertSchemaDone { name, .. } => name,
        }
    }

    /// Message arguments: the migration name, then any timing
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.migration().to_string()];
        match self {
            Self::SchemaInProgress { elapsed, .. }
            | Self::DataInProgress { elapsed, .. }
            | Self::RevertDataInProgress { elapsed, .. }
            | Self::RevertSchemaInProgress { elapsed, .. } => args.push(format!("{elapsed:.2}")),
            Self::SchemaDone { total, .. }
            | Self::DataDone { total, .. }
            | Self::RevertDataDone { total, .. }
            | Self::RevertSchemaDone { total, .. } => args.push(format!("{total:.2}")),
            _ => {}
        }
        args
    }
}

impl fmt::Display for MigrationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key(), self.args().join(", "))
    }
}

/// Sink for migration events
pub trait MigrationOutput {
    fn write(&self, event: &MigrationEvent, verbosity: Verbosity);
}

/// Discards all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl MigrationOutput for NullOutput {
    fn write(&self, _event: &MigrationEvent, _verbosity: Verbosity) {}
}

/// Writes events to tracing, up to a maximum verbosity
#[derive(Debug, Clone, Copy)]
pub struct LogOutput {
    max: Verbosity,
}

impl LogOutput {
    pub fn new(max: Verbosity) -> Self {
        Self { max }
    }
}

impl Default for LogOutput {
    fn default() -> Self {
        Self::new(Verbosity::Normal)
    }
}

impl MigrationOutput for LogOutput {
    fn write(&self, event: &MigrationEvent, verbosity: Verbosity) {
        if verbosity > self.max {
            return;
        }
        if verbosity <= Verbosity::Verbose {
            info!(key = event.key(), "{}", event);
        } else {
            debug!(key = event.key(), "{}", event);
        }
    }
}

/// Hands every event to a closure
pub struct CallbackOutput<F>
where
    F: Fn(&MigrationEvent, Verbosity),
{
    callback: F,
}

impl<F> CallbackOutput<F>
where
    F: Fn(&MigrationEvent, Verbosity),
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> MigrationOutput for CallbackOutput<F>
where
    F: Fn(&MigrationEvent, Verbosity),
{
    fn write(&self, event: &MigrationEvent, verbosity: Verbosity) {
        (self.callback)(event, verbosity);
    }
}
