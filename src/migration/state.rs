// src/migration/state.rs

//! Persisted per-migration progress
//!
//! One row per migration in the migrations table. The dependency list is
//! frozen when the row is first written; later edits to a migration's
//! declared dependencies are not picked up for partially applied migrations.

use super::delta::{ColumnDef, ColumnKind, SchemaDelta, TableDef};
use super::step::Checkpoint;
use super::tools::{SchemaTool, quote_ident};
use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::collections::HashMap;

const COLUMNS: &str = "migration_name, migration_depends_on, migration_schema_done, \
     migration_data_done, migration_data_state, migration_start_time, migration_end_time";

/// Recorded progress of one migration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationState {
    pub name: String,
    pub depends_on: Vec<String>,
    pub schema_done: bool,
    pub data_done: bool,
    /// Resume point of the phase in progress, if any
    pub data_state: Option<Checkpoint>,
    /// Unix timestamps; zero when recorded without running
    pub start_time: i64,
    pub end_time: i64,
}

impl MigrationState {
    /// Fresh state for a migration about to start
    pub fn new(name: impl Into<String>, depends_on: Vec<String>) -> Self {
        Self {
            name: name.into(),
            depends_on,
            schema_done: false,
            data_done: false,
            data_state: None,
            start_time: 0,
            end_time: 0,
        }
    }

    /// State of a migration recorded as installed without running it
    pub fn completed(name: impl Into<String>, depends_on: Vec<String>) -> Self {
        Self {
            schema_done: true,
            data_done: true,
            ..Self::new(name, depends_on)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.schema_done && self.data_done
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let depends_on: String = row.get(1)?;
        let depends_on = if depends_on.is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&depends_on).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
            })?
        };

        let data_state: String = row.get(4)?;
        let data_state = if data_state.is_empty() {
            None
        } else {
            Some(serde_json::from_str(&data_state).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
            })?)
        };

        Ok(Self {
            name: row.get(0)?,
            depends_on,
            schema_done: row.get(2)?,
            data_done: row.get(3)?,
            data_state,
            start_time: row.get(5)?,
            end_time: row.get(6)?,
        })
    }
}

/// Table definition of the migrations table
pub fn migrations_table_def() -> TableDef {
    TableDef::new()
        .column("migration_name", ColumnDef::new(ColumnKind::VChar, ""))
        .column("migration_depends_on", ColumnDef::new(ColumnKind::Text, ""))
        .column("migration_schema_done", ColumnDef::new(ColumnKind::Bool, 0))
        .column("migration_data_done", ColumnDef::new(ColumnKind::Bool, 0))
        .column("migration_data_state", ColumnDef::new(ColumnKind::Text, ""))
        .column("migration_start_time", ColumnDef::new(ColumnKind::Timestamp, 0))
        .column("migration_end_time", ColumnDef::new(ColumnKind::Timestamp, 0))
        .primary_key(["migration_name"])
}

/// Reads and writes rows of the migrations table
#[derive(Debug, Clone)]
pub struct MigrationStateStore {
    table: String,
}

impl MigrationStateStore {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the table if it is missing
    ///
    /// Returns whether it had to be created.
    pub fn create_table(&self, conn: &Connection) -> Result<bool> {
        let mut tool = SchemaTool::new(conn)?;
        if tool.table_exists(&self.table) {
            return Ok(false);
        }
        tool.apply(&SchemaDelta::new().add_table(self.table.clone(), migrations_table_def()))?;
        Ok(true)
    }

    pub fn table_exists(&self, conn: &Connection) -> Result<bool> {
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [&self.table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Every recorded state keyed by migration name
    pub fn load_all(&self, conn: &Connection) -> Result<HashMap<String, MigrationState>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM {}",
            quote_ident(&self.table)
        ))?;
        let states = stmt
            .query_map([], MigrationState::from_row)?
            .map(|state| state.map(|s| (s.name.clone(), s)))
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(states)
    }

    pub fn find(&self, conn: &Connection, name: &str) -> Result<Option<MigrationState>> {
        let state = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM {} WHERE migration_name = ?1",
                    quote_ident(&self.table)
                ),
                [name],
                MigrationState::from_row,
            )
            .optional()?;
        Ok(state)
    }

    /// Insert or replace the row for this migration
    pub fn save(&self, conn: &Connection, state: &MigrationState) -> Result<()> {
        if state.data_done && !state.schema_done {
            return Err(Error::CorruptState {
                migration: state.name.clone(),
                reason: "data phase done before schema phase".to_string(),
            });
        }

        let depends_on = serde_json::to_string(&state.depends_on)?;
        let data_state = match &state.data_state {
            Some(checkpoint) => serde_json::to_string(checkpoint)?,
            None => String::new(),
        };
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                quote_ident(&self.table)
            ),
            params![
                state.name,
                depends_on,
                state.schema_done,
                state.data_done,
                data_state,
                state.start_time,
                state.end_time,
            ],
        )?;
        Ok(())
    }

    pub fn delete(&self, conn: &Connection, name: &str) -> Result<()> {
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE migration_name = ?1",
                quote_ident(&self.table)
            ),
            [name],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::step::{Phase, Progress};

    fn store() -> (Connection, MigrationStateStore) {
        let conn = Connection::open_in_memory().unwrap();
        let store = MigrationStateStore::new("migrations");
        assert!(store.create_table(&conn).unwrap());
        assert!(!store.create_table(&conn).unwrap());
        (conn, store)
    }

    #[test]
    fn test_save_and_load_with_checkpoint() {
        let (conn, store) = store();
        let mut state = MigrationState::new("core::v100::install", vec!["core::base".to_string()]);
        state.schema_done = true;
        state.start_time = 1_700_000_000;
        state.data_state = Some(Checkpoint {
            phase: Phase::Data,
            step: 2,
            last: Some(Progress::Cursor { position: 500 }),
            total_time: 1.5,
        });
        store.save(&conn, &state).unwrap();

        let loaded = store.find(&conn, "core::v100::install").unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(!loaded.is_complete());

        let all = store.load_all(&conn).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["core::v100::install"].depends_on, vec!["core::base"]);
    }

    #[test]
    fn test_upsert_and_delete() {
        let (conn, store) = store();
        let mut state = MigrationState::new("a", Vec::new());
        store.save(&conn, &state).unwrap();
        state.schema_done = true;
        state.data_done = true;
        store.save(&conn, &state).unwrap();

        assert!(store.find(&conn, "a").unwrap().unwrap().is_complete());
        store.delete(&conn, "a").unwrap();
        assert!(store.find(&conn, "a").unwrap().is_none());
    }

    #[test]
    fn test_data_done_requires_schema_done() {
        let (conn, store) = store();
        let mut state = MigrationState::new("a", Vec::new());
        state.data_done = true;
        let err = store.save(&conn, &state).unwrap_err();
        assert_eq!(err.message_key(), "MIGRATION_STATE_CORRUPT");
    }

    #[test]
    fn test_corrupt_checkpoint_is_reported() {
        let (conn, store) = store();
        conn.execute(
            "INSERT INTO migrations (migration_name, migration_data_state) VALUES ('a', '{broken')",
            [],
        )
        .unwrap();
        assert!(store.find(&conn, "a").is_err());
    }
}
