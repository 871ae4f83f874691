// src/db/mod.rs

//! Database connection handling
//!
//! Board data lives in a single SQLite database. [`init`] creates the tables
//! the migration tools operate on together with the migration state table;
//! everything past that is the job of migrations.

pub mod schema;

use crate::config::TableNames;
use crate::error::Result;
use crate::migration::state::MigrationStateStore;
use crate::migration::tools::SchemaTool;
use rusqlite::{Connection, Transaction};
use std::path::Path;
use tracing::{debug, info};

/// Open an existing board database
pub fn open(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    debug!("Opening database at {}", path.display());

    let conn = Connection::open(path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // journal_mode reports the resulting mode as a row
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    Ok(conn)
}

/// In-memory database, used by tests and schema generation
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    Ok(conn)
}

/// Create the board database at `path` if needed and return a connection
pub fn init(path: impl AsRef<Path>, tables: &TableNames) -> Result<Connection> {
    let conn = open(path)?;
    create_schema(&conn, tables)?;
    Ok(conn)
}

/// Create any missing collaborator table and the migration state table
///
/// Existing tables are left untouched, so this is safe to call on every
/// start. Returns true if the migration state table was created.
pub fn create_schema(conn: &Connection, tables: &TableNames) -> Result<bool> {
    SchemaTool::new(conn)?.apply(&schema::core_schema(tables))?;

    let created = MigrationStateStore::new(&tables.migrations).create_table(conn)?;
    if created {
        info!("Created migration state table {}", tables.migrations);
    }
    Ok(created)
}

/// Run `f` inside a transaction, committing only if it succeeds
pub fn transaction<T, F>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = conn.transaction()?;
    let result = f(&tx)?;
    tx.commit()?;
    Ok(result)
}
