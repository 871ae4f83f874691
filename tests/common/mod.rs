// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use board_migrator::migration::MigrationEvent;
use board_migrator::migration::output::CallbackOutput;
use board_migrator::migrations::core_migrations;
use board_migrator::{MigrationRegistry, Migrator, TableNames, ToolRegistry, db};
use rusqlite::Connection;
use rusqlite::types::Value;
use std::cell::RefCell;
use std::rc::Rc;
use tempfile::TempDir;

/// Create an initialized board database.
///
/// Returns (TempDir, db_path) - keep the TempDir alive to prevent cleanup.
pub fn setup_board_db() -> (TempDir, String) {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir
        .path()
        .join("board.db")
        .to_str()
        .unwrap()
        .to_string();

    db::init(&db_path, &TableNames::default()).unwrap();
    (temp_dir, db_path)
}

/// Migrator over the core migrations
pub fn core_migrator(conn: &Connection) -> Migrator<'_> {
    let tables = TableNames::default();
    let registry = core_migrations(&tables).unwrap();
    migrator_with(conn, registry)
}

/// Migrator over an arbitrary registry
pub fn migrator_with(conn: &Connection, registry: MigrationRegistry) -> Migrator<'_> {
    let tables = TableNames::default();
    let tools = ToolRegistry::with_defaults(&tables);
    Migrator::new(conn, tables, registry, tools).unwrap()
}

/// Attach a recorder to a migrator; the returned handle sees every event
pub fn record_events(migrator: Migrator<'_>) -> (Migrator<'_>, Rc<RefCell<Vec<MigrationEvent>>>) {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    let migrator = migrator.with_output(CallbackOutput::new(move |event: &MigrationEvent, _| {
        sink.borrow_mut().push(event.clone())
    }));
    (migrator, events)
}

/// Advance until nothing is left, returning the number of units run
pub fn migrate_all(migrator: &mut Migrator<'_>) -> usize {
    let mut steps = 0;
    while !migrator.finished() {
        assert!(migrator.advance_one_step().unwrap(), "advance made no progress");
        steps += 1;
        assert!(steps < 1000, "migration did not converge");
    }
    steps
}

pub fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

pub fn config_value(conn: &Connection, name: &str) -> Option<String> {
    conn.query_row(
        "SELECT config_value FROM phpbb_config WHERE config_name = ?1",
        [name],
        |row| row.get(0),
    )
    .ok()
}

pub fn table_exists(conn: &Connection, table: &str) -> bool {
    count(
        conn,
        &format!("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '{table}'"),
    ) > 0
}

pub fn insert_users(conn: &Connection, count: usize) {
    let tx = conn.unchecked_transaction().unwrap();
    for i in 0..count {
        tx.execute(
            "INSERT INTO phpbb_users (username, user_email) VALUES (?1, ?2)",
            [format!("  Member {i}  "), format!("member{i}@example.com")],
        )
        .unwrap();
    }
    tx.commit().unwrap();
}

/// Schema and contents of every board table, in a comparable form
///
/// The migration state table and SQLite internals are left out.
pub fn snapshot(conn: &Connection) -> Vec<(String, String, Vec<String>)> {
    let mut stmt = conn
        .prepare(
            "SELECT name, sql FROM sqlite_master
             WHERE type IN ('table', 'index') AND name NOT LIKE 'sqlite_%'
               AND tbl_name != 'phpbb_migrations'
             ORDER BY name",
        )
        .unwrap();
    let objects: Vec<(String, Option<String>)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();

    objects
        .into_iter()
        .map(|(name, sql)| {
            let rows = if sql.as_deref().is_some_and(|s| s.starts_with("CREATE TABLE")) {
                table_rows(conn, &name)
            } else {
                Vec::new()
            };
            (name, sql.unwrap_or_default(), rows)
        })
        .collect()
}

fn table_rows(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM \"{table}\"")).unwrap();
    let columns = stmt.column_count();
    let mut rows: Vec<String> = stmt
        .query_map([], |row| {
            let values = (0..columns)
                .map(|i| row.get::<_, Value>(i).map(|v| format!("{v:?}")))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(values.join("|"))
        })
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();
    rows.sort();
    rows
}
