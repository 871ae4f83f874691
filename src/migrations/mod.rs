// src/migrations/mod.rs

//! Built-in board migrations
//!
//! The `core` set brings an empty database (as left by [`crate::db::init`])
//! up to the current board layout.

mod v100;
mod v110;

pub use v100::{InstallData, InstallSchema};
pub use v110::{UsernameClean, clean_username};

use crate::config::TableNames;
use crate::error::Result;
use crate::migration::MigrationRegistry;

/// Registry holding every core migration, oldest first
pub fn core_migrations(tables: &TableNames) -> Result<MigrationRegistry> {
    let mut registry = MigrationRegistry::new();
    registry.register(InstallSchema::new(tables.clone()))?;
    registry.register(InstallData::new(tables.clone()))?;
    registry.register(UsernameClean::new(tables.clone()))?;
    Ok(registry)
}
