// tests/revert.rs

//! Reverting migrations: dependents go first and a full round trip leaves
//! the board exactly as it was.

mod common;

use board_migrator::migration::{MigrationEvent, Phase};
use board_migrator::db;
use common::{
    config_value, core_migrator, count, insert_users, migrate_all, record_events,
    setup_board_db, snapshot, table_exists,
};
use std::time::Duration;

#[test]
fn test_round_trip_restores_the_board() {
    let (_temp_dir, db_path) = setup_board_db();
    let conn = db::open(&db_path).unwrap();
    let before = snapshot(&conn);

    let mut migrator = core_migrator(&conn);
    migrate_all(&mut migrator);
    assert_ne!(snapshot(&conn), before);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM phpbb_acl_options"), 4);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM phpbb_acl_roles_data"), 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM phpbb_acl_groups"), 1);

    let summary = migrator
        .revert("core::v100::install_schema", Duration::from_secs(3600))
        .unwrap();
    assert!(summary.finished);

    assert_eq!(snapshot(&conn), before);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM phpbb_migrations"), 0);
    assert_eq!(migrator.installable_migrations().len(), 3);
}

#[test]
fn test_dependents_are_reverted_first() {
    let (_temp_dir, db_path) = setup_board_db();
    let conn = db::open(&db_path).unwrap();

    let mut migrator = core_migrator(&conn);
    migrate_all(&mut migrator);
    let (mut migrator, events) = record_events(migrator);

    // the first unit of work belongs to the newest dependent
    assert!(migrator.revert_one_step("core::v100::install_schema").unwrap());
    let last = migrator.last_run_migration().unwrap();
    assert_eq!(last.name, "core::v110::username_clean");
    assert_eq!(last.task, Phase::RevertData);
    assert!(table_exists(&conn, "phpbb_users"));

    while migrator.revert_one_step("core::v100::install_schema").unwrap() {}

    let reverted: Vec<String> = events
        .borrow()
        .iter()
        .filter(|e| matches!(e, MigrationEvent::RevertSchemaDone { .. }))
        .map(|e| e.migration().to_string())
        .collect();
    assert_eq!(
        reverted,
        vec![
            "core::v110::username_clean",
            "core::v100::install_data",
            "core::v100::install_schema",
        ]
    );
    assert!(!table_exists(&conn, "phpbb_users"));
}

#[test]
fn test_revert_leaf_keeps_dependencies() {
    let (_temp_dir, db_path) = setup_board_db();
    let conn = db::open(&db_path).unwrap();

    let mut migrator = core_migrator(&conn);
    migrate_all(&mut migrator);
    insert_users(&conn, 3);

    migrator
        .revert("core::v110::username_clean", Duration::from_secs(3600))
        .unwrap();

    assert!(migrator.migration_state("core::v110::username_clean").is_none());
    assert!(migrator.migration_state("core::v100::install_data").unwrap().is_complete());
    assert_eq!(config_value(&conn, "version").as_deref(), Some("1.0.0"));

    let columns: Vec<String> = {
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('phpbb_users')").unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap()
    };
    assert!(!columns.contains(&"username_clean".to_string()));
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM phpbb_users"), 3);

    // and it applies again cleanly
    migrate_all(&mut migrator);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM phpbb_users WHERE username_clean = ''"),
        0
    );
}

#[test]
fn test_revert_unknown_migration_does_nothing() {
    let (_temp_dir, db_path) = setup_board_db();
    let conn = db::open(&db_path).unwrap();
    let mut migrator = core_migrator(&conn);

    assert!(!migrator.revert_one_step("core::v100::install_data").unwrap());
    assert!(migrator.last_run_migration().is_none());
}
