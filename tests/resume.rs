// tests/resume.rs

//! Staggered data steps resumed across separate migrator instances must end
//! in the same state as one uninterrupted run.

mod common;

use board_migrator::migration::{Phase, Progress};
use board_migrator::migrations::clean_username;
use board_migrator::db;
use common::{config_value, core_migrator, count, insert_users, setup_board_db};
use rusqlite::Connection;
use std::time::Duration;

const USERS: usize = 1000;

/// Board with the 1.0.0 migrations applied and a populated users table
fn board_with_users() -> (tempfile::TempDir, String) {
    let (temp_dir, db_path) = setup_board_db();
    let conn = db::open(&db_path).unwrap();
    let mut migrator = core_migrator(&conn);
    migrator.set_migrations(["core::v100::install_data"]);
    migrator.run(Duration::from_secs(3600), None).unwrap();
    insert_users(&conn, USERS);
    (temp_dir, db_path)
}

fn clean_names(conn: &Connection) -> Vec<(i64, String)> {
    let mut stmt = conn
        .prepare("SELECT user_id, username_clean FROM phpbb_users ORDER BY user_id")
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap()
}

#[test]
fn test_chunked_conversion_resumes_from_persisted_state() {
    let (_interrupted_dir, interrupted_path) = board_with_users();
    let mut cursors = Vec::new();
    let mut calls = 0;

    // every unit of work runs in a fresh process
    loop {
        let conn = db::open(&interrupted_path).unwrap();
        let mut migrator = core_migrator(&conn);
        if migrator.finished() {
            break;
        }
        assert!(migrator.advance_one_step().unwrap());
        calls += 1;
        assert!(calls < 100, "conversion did not converge");

        if let Some(Progress::Cursor { position }) = migrator
            .migration_state("core::v110::username_clean")
            .and_then(|state| state.data_state.as_ref())
            .filter(|checkpoint| checkpoint.phase == Phase::Data)
            .and_then(|checkpoint| checkpoint.last.clone())
        {
            cursors.push(position);
        }
    }
    assert_eq!(cursors, vec![250, 500, 750, 1000]);

    let (_straight_dir, straight_path) = board_with_users();
    let straight = db::open(&straight_path).unwrap();
    let summary = core_migrator(&straight)
        .run(Duration::from_secs(3600), None)
        .unwrap();
    assert!(summary.finished);
    assert_eq!(summary.steps, calls);

    let interrupted = db::open(&interrupted_path).unwrap();
    assert_eq!(clean_names(&interrupted), clean_names(&straight));
    assert_eq!(config_value(&interrupted, "version").as_deref(), Some("1.1.0"));
    assert_eq!(
        count(&interrupted, "SELECT COUNT(*) FROM phpbb_users WHERE username_clean = ''"),
        0
    );
    assert_eq!(clean_names(&interrupted)[7].1, clean_username("  Member 7  "));
}

#[test]
fn test_step_limit_leaves_resumable_state() {
    let (_temp_dir, db_path) = board_with_users();
    {
        let conn = db::open(&db_path).unwrap();
        let summary = core_migrator(&conn)
            .run(Duration::from_secs(3600), Some(3))
            .unwrap();
        assert_eq!(summary.steps, 3);
        assert!(!summary.finished);
    }

    let conn = db::open(&db_path).unwrap();
    let mut migrator = core_migrator(&conn);
    let checkpoint = migrator
        .migration_state("core::v110::username_clean")
        .and_then(|state| state.data_state.clone())
        .unwrap();
    // two schema kinds, then the first batch
    assert_eq!(checkpoint.phase, Phase::Data);
    assert_eq!(checkpoint.step, 0);
    assert_eq!(checkpoint.last, Some(Progress::Cursor { position: 250 }));
    assert!(checkpoint.total_time >= 0.0);

    let summary = migrator.run(Duration::from_secs(3600), None).unwrap();
    assert!(summary.finished);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM phpbb_users WHERE username_clean = ''"),
        0
    );
}
