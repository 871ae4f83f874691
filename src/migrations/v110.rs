// src/migrations/v110.rs

//! Searchable, normalised usernames
//!
//! Adds `username_clean` to the users table and fills it in batches, so
//! boards with many users convert across several calls.

use crate::config::TableNames;
use crate::error::Result;
use crate::migration::step::{DataStep, Progress, StepValue};
use crate::migration::tools::{ConfigCall, quote_ident};
use crate::migration::{ColumnDef, ColumnKind, Migration, MigrationContext, SchemaDelta};
use rusqlite::params;
use serde_json::json;
use tracing::debug;

/// Users converted per call
pub const BATCH_SIZE: i64 = 250;

/// Normalised form of a username used for lookups and uniqueness checks
pub fn clean_username(username: &str) -> String {
    username
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone)]
pub struct UsernameClean {
    tables: TableNames,
}

impl UsernameClean {
    pub fn new(tables: TableNames) -> Self {
        Self { tables }
    }
}

impl Migration for UsernameClean {
    fn name(&self) -> &str {
        "core::v110::username_clean"
    }

    fn depends_on(&self) -> Vec<String> {
        vec!["core::v100::install_data".to_string()]
    }

    fn update_schema(&self) -> SchemaDelta {
        SchemaDelta::new()
            .add_column(
                &self.tables.users,
                "username_clean",
                ColumnDef::new(ColumnKind::VCharCi, "").after("username"),
            )
            .add_index(&self.tables.users, "username_clean", ["username_clean"])
    }

    fn update_data(&self) -> Vec<DataStep> {
        vec![
            DataStep::custom_with_args("convert_username_clean", vec![json!(BATCH_SIZE)], |ctx, args, last| {
                let batch = args.first().and_then(|v| v.as_i64()).unwrap_or(BATCH_SIZE);
                convert_batch(ctx, batch, last)
            }),
            ConfigCall::update_from("version", "1.0.0", "1.1.0").into(),
        ]
    }
}

/// Convert the next batch of users after the last processed id
fn convert_batch(ctx: &MigrationContext<'_>, batch: i64, last: Option<&Progress>) -> Result<StepValue> {
    let after = match last {
        Some(Progress::Cursor { position }) => *position,
        _ => 0,
    };
    let users = quote_ident(&ctx.tables.users);

    let mut stmt = ctx.conn.prepare(&format!(
        "SELECT user_id, username FROM {users} WHERE user_id > ?1 ORDER BY user_id LIMIT ?2"
    ))?;
    let rows = stmt
        .query_map(params![after, batch], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let Some(&(position, _)) = rows.last() else {
        return Ok(StepValue::Unit);
    };

    let mut update = ctx.conn.prepare(&format!(
        "UPDATE {users} SET username_clean = ?2 WHERE user_id = ?1"
    ))?;
    for (user_id, username) in &rows {
        update.execute(params![user_id, clean_username(username)])?;
    }
    debug!("Cleaned {} usernames up to user {}", rows.len(), position);

    if (rows.len() as i64) < batch {
        Ok(StepValue::Unit)
    } else {
        Ok(StepValue::Continue(Progress::Cursor { position }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup(users: usize) -> (Connection, TableNames) {
        let conn = Connection::open_in_memory().unwrap();
        let tables = TableNames::with_prefix("");
        conn.execute_batch(
            "CREATE TABLE users (
                user_id INTEGER PRIMARY KEY AUTOINCREMENT,
                username VARCHAR(255) NOT NULL DEFAULT '',
                username_clean VARCHAR(255) NOT NULL DEFAULT ''
            )",
        )
        .unwrap();
        for i in 0..users {
            conn.execute(
                "INSERT INTO users (username) VALUES (?1)",
                [format!("  User  {i} ")],
            )
            .unwrap();
        }
        (conn, tables)
    }

    #[test]
    fn test_clean_username() {
        assert_eq!(clean_username("  Alice   Smith "), "alice smith");
        assert_eq!(clean_username("BOB"), "bob");
        assert_eq!(clean_username(""), "");
    }

    #[test]
    fn test_convert_in_batches() {
        let (conn, tables) = setup(5);
        let ctx = MigrationContext::new(&conn, &tables);

        let first = convert_batch(&ctx, 2, None).unwrap();
        assert_eq!(first, StepValue::Continue(Progress::Cursor { position: 2 }));

        let StepValue::Continue(progress) = first else { unreachable!() };
        let second = convert_batch(&ctx, 2, Some(&progress)).unwrap();
        assert_eq!(second, StepValue::Continue(Progress::Cursor { position: 4 }));

        let StepValue::Continue(progress) = second else { unreachable!() };
        assert_eq!(convert_batch(&ctx, 2, Some(&progress)).unwrap(), StepValue::Unit);

        let pending: i64 = conn
            .query_row("SELECT COUNT(*) FROM users WHERE username_clean = ''", [], |row| row.get(0))
            .unwrap();
        assert_eq!(pending, 0);
        let clean: String = conn
            .query_row("SELECT username_clean FROM users WHERE user_id = 3", [], |row| row.get(0))
            .unwrap();
        assert_eq!(clean, "user 2");
    }

    #[test]
    fn test_exact_multiple_needs_a_final_empty_batch() {
        let (conn, tables) = setup(4);
        let ctx = MigrationContext::new(&conn, &tables);

        let last = Progress::Cursor { position: 4 };
        assert!(matches!(convert_batch(&ctx, 2, None).unwrap(), StepValue::Continue(_)));
        assert_eq!(convert_batch(&ctx, 2, Some(&last)).unwrap(), StepValue::Unit);
    }

    #[test]
    fn test_schema_reverts_column_and_index() {
        let migration = UsernameClean::new(TableNames::default());
        let revert = migration.revert_schema();
        assert_eq!(revert.drop_columns["phpbb_users"], vec!["username_clean"]);
        assert_eq!(revert.drop_keys["phpbb_users"], vec!["username_clean"]);
    }
}
