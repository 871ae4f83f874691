// src/migration/mod.rs

//! Schema and data migration engine
//!
//! A [`Migration`] describes one versioned change: the migrations it depends
//! on, a [`SchemaDelta`] and ordered lists of [`DataStep`]s. The
//! [`Migrator`] applies and reverts registered migrations one atomic unit at
//! a time, persisting progress in the migrations table so any run can be
//! interrupted and resumed later.

pub mod delta;
pub mod executor;
pub mod graph;
pub mod migrator;
pub mod output;
pub mod schema_generator;
pub mod state;
pub mod step;
pub mod tools;

pub use delta::{ColumnDef, ColumnKind, ColumnType, SchemaDelta, TableDef};
pub use executor::{StepExecutor, StepOutcome};
pub use graph::MigrationGraph;
pub use migrator::{LastRun, Migrator, RunSummary};
pub use output::{CallbackOutput, LogOutput, MigrationEvent, MigrationOutput, NullOutput, Verbosity};
pub use schema_generator::SchemaGenerator;
pub use state::{MigrationState, MigrationStateStore};
pub use step::{Checkpoint, Condition, DataStep, Phase, Progress, StepValue};

use crate::config::TableNames;
use crate::error::{Error, Result};
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::Arc;

/// Separator between the segments of a migration name
pub const NAMESPACE_SEPARATOR: &str = "::";

/// Canonical form of a migration name, without a leading separator
pub fn normalize_name(name: &str) -> &str {
    name.trim_start_matches(NAMESPACE_SEPARATOR)
}

/// Everything a migration may touch while it runs
#[derive(Debug, Clone, Copy)]
pub struct MigrationContext<'a> {
    pub conn: &'a Connection,
    pub tables: &'a TableNames,
}

impl<'a> MigrationContext<'a> {
    pub fn new(conn: &'a Connection, tables: &'a TableNames) -> Self {
        Self { conn, tables }
    }
}

/// A named, versioned schema and data change
///
/// Implementations are stateless; anything they need (such as table names)
/// is passed to their constructor.
pub trait Migration: Send + Sync {
    /// Unique name, segments joined by [`NAMESPACE_SEPARATOR`]
    fn name(&self) -> &str;

    /// Migrations that must be complete before this one starts
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether the target state is already present
    ///
    /// Consulted once, before the first unit of work. Returning true marks
    /// the migration complete without running it.
    fn effectively_installed(&self, _ctx: &MigrationContext<'_>) -> Result<bool> {
        Ok(false)
    }

    fn update_schema(&self) -> SchemaDelta {
        SchemaDelta::new()
    }

    /// Defaults to dropping whatever `update_schema` adds
    fn revert_schema(&self) -> SchemaDelta {
        self.update_schema().inverse().unwrap_or_default()
    }

    fn update_data(&self) -> Vec<DataStep> {
        Vec::new()
    }

    /// Extra steps run after the reversed `update_data` steps
    fn revert_data(&self) -> Vec<DataStep> {
        Vec::new()
    }
}

/// Static list of known migrations, in registration order
#[derive(Default, Clone)]
pub struct MigrationRegistry {
    migrations: Vec<Arc<dyn Migration>>,
    index: HashMap<String, usize>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, migration: impl Migration + 'static) -> Result<()> {
        self.register_arc(Arc::new(migration))
    }

    pub fn register_arc(&mut self, migration: Arc<dyn Migration>) -> Result<()> {
        let name = normalize_name(migration.name()).to_string();
        if self.index.contains_key(&name) {
            return Err(Error::DuplicateMigration(name));
        }
        self.index.insert(name, self.migrations.len());
        self.migrations.push(migration);
        Ok(())
    }

    /// Look a migration up, ignoring a leading namespace separator
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Migration>> {
        self.index
            .get(normalize_name(name))
            .map(|&i| &self.migrations[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(normalize_name(name))
    }

    /// Canonical names in registration order
    pub fn names(&self) -> Vec<String> {
        self.iter()
            .map(|m| normalize_name(m.name()).to_string())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Migration>> {
        self.migrations.iter()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Dependency graph over canonical names
    pub fn graph(&self) -> MigrationGraph {
        let mut graph = MigrationGraph::new();
        for migration in &self.migrations {
            let name = normalize_name(migration.name());
            graph.add_node(name);
            for dep in migration.depends_on() {
                graph.add_edge(name, normalize_name(&dep));
            }
        }
        graph
    }

    /// Reject dependency cycles among registered migrations
    pub fn validate(&self) -> Result<()> {
        match self.graph().detect_cycle() {
            Some(cycle) => Err(Error::CircularDependency(cycle)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("migrations", &self.names())
            .finish()
    }
}
