// src/migration/schema_generator.rs

//! Fresh-install schema from the registered migrations
//!
//! Replays every migration's forward schema delta, in dependency order, on
//! an in-memory model. No SQL runs against a live database; the result can
//! be turned into `CREATE` statements with [`SchemaGenerator::create_statements`].

use super::delta::{KeyDef, KeyKind, SchemaDelta, TableDef};
use super::tools::{SchemaOutcome, SchemaTool};
use super::{MigrationRegistry, normalize_name};
use crate::error::{Error, Result};
use rusqlite::Connection;
use std::collections::BTreeMap;
use tracing::debug;

/// Target schema keyed by table name
pub type Schema = BTreeMap<String, TableDef>;

/// Derives the cumulative schema of a set of migrations
#[derive(Debug)]
pub struct SchemaGenerator<'a> {
    registry: &'a MigrationRegistry,
}

impl<'a> SchemaGenerator<'a> {
    pub fn new(registry: &'a MigrationRegistry) -> Self {
        Self { registry }
    }

    /// Tables produced by applying every migration from scratch
    ///
    /// Every declared dependency must be registered.
    pub fn get_schema(&self) -> Result<Schema> {
        let order = self.registry.graph().install_order()?;
        let mut schema = Schema::new();
        for name in &order {
            let migration = self
                .registry
                .get(name)
                .ok_or_else(|| Error::UnresolvedDependency(normalize_name(name).to_string()))?;
            debug!("Replaying schema of {}", name);
            apply_delta(&mut schema, &migration.update_schema());
        }
        Ok(schema)
    }

    /// SQL statements creating the generated schema
    pub fn create_statements(&self) -> Result<Vec<String>> {
        let schema = self.get_schema()?;
        let scratch = Connection::open_in_memory()?;
        let mut tool = SchemaTool::new(&scratch)?;
        tool.set_return_statements(true);

        let delta = SchemaDelta {
            add_tables: schema,
            ..SchemaDelta::default()
        };
        match tool.apply(&delta)? {
            SchemaOutcome::Statements(statements) => Ok(statements),
            SchemaOutcome::Applied => Ok(Vec::new()),
        }
    }
}

/// Fold one delta into the in-memory schema
///
/// Changes aimed at tables the model does not know are ignored.
pub fn apply_delta(schema: &mut Schema, delta: &SchemaDelta) {
    for table in &delta.drop_tables {
        schema.remove(table);
    }
    for (table, def) in &delta.add_tables {
        schema.insert(table.clone(), def.clone());
    }
    for (table, columns) in &delta.change_columns {
        if let Some(def) = table_mut(schema, table) {
            for (column, column_def) in columns {
                def.set_column(column.clone(), column_def.clone());
            }
        }
    }
    for (table, columns) in &delta.add_columns {
        if let Some(def) = table_mut(schema, table) {
            for (column, column_def) in columns {
                let mut column_def = column_def.clone();
                match column_def.after.take() {
                    Some(after) => def.insert_column_after(column.clone(), column_def, &after),
                    None => def.set_column(column.clone(), column_def),
                }
            }
        }
    }
    for (table, keys) in &delta.drop_keys {
        if let Some(def) = table_mut(schema, table) {
            for key in keys {
                def.keys.remove(key);
            }
        }
    }
    for (table, columns) in &delta.drop_columns {
        if let Some(def) = table_mut(schema, table) {
            for column in columns {
                def.remove_column(column);
            }
        }
    }
    for (table, columns) in &delta.add_primary_keys {
        if let Some(def) = table_mut(schema, table) {
            def.primary_key = columns.clone();
        }
    }
    for (kind, indexes) in [
        (KeyKind::Unique, &delta.add_unique_index),
        (KeyKind::Index, &delta.add_index),
    ] {
        for (table, keys) in indexes {
            if let Some(def) = table_mut(schema, table) {
                for (key, columns) in keys {
                    def.keys.insert(
                        key.clone(),
                        KeyDef {
                            kind,
                            columns: columns.clone(),
                        },
                    );
                }
            }
        }
    }
}

fn table_mut<'s>(schema: &'s mut Schema, table: &str) -> Option<&'s mut TableDef> {
    let def = schema.get_mut(table);
    if def.is_none() {
        debug!("Schema change for unknown table {}, ignoring", table);
    }
    def
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::delta::{ColumnDef, ColumnKind};
    use crate::migration::Migration;

    struct Step {
        name: &'static str,
        deps: Vec<&'static str>,
        delta: SchemaDelta,
    }

    impl Migration for Step {
        fn name(&self) -> &str {
            self.name
        }

        fn depends_on(&self) -> Vec<String> {
            self.deps.iter().map(|d| d.to_string()).collect()
        }

        fn update_schema(&self) -> SchemaDelta {
            self.delta.clone()
        }
    }

    fn registry(steps: Vec<Step>) -> MigrationRegistry {
        let mut registry = MigrationRegistry::new();
        for step in steps {
            registry.register(step).unwrap();
        }
        registry
    }

    fn users() -> TableDef {
        TableDef::new()
            .column("user_id", ColumnDef::new(ColumnKind::UInt, 0).auto_increment())
            .column("username", ColumnDef::new(ColumnKind::VCharCi, ""))
            .column("user_posts", ColumnDef::new(ColumnKind::UInt, 0))
            .primary_key(["user_id"])
    }

    #[test]
    fn test_replay_in_dependency_order() {
        // registered before its dependency; still replayed after it
        let registry = registry(vec![
            Step {
                name: "v2",
                deps: vec!["v1"],
                delta: SchemaDelta::new()
                    .add_column(
                        "users",
                        "username_clean",
                        ColumnDef::new(ColumnKind::VCharUni, "").after("username"),
                    )
                    .drop_column("users", "user_posts")
                    .add_unique_index("users", "username_clean", ["username_clean"]),
            },
            Step {
                name: "v1",
                deps: vec![],
                delta: SchemaDelta::new()
                    .add_table("users", users())
                    .add_table("sessions", TableDef::new().column("session_id", ColumnDef::new(ColumnKind::Char, "").sized(32))),
            },
            Step {
                name: "v3",
                deps: vec!["v2"],
                delta: SchemaDelta::new().drop_table("sessions"),
            },
        ]);

        let schema = SchemaGenerator::new(&registry).get_schema().unwrap();
        assert_eq!(schema.keys().collect::<Vec<_>>(), vec!["users"]);

        let users = &schema["users"];
        let columns: Vec<&str> = users.columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(columns, vec!["user_id", "username", "username_clean"]);
        assert_eq!(users.get_column("username_clean").unwrap().after, None);
        assert_eq!(users.keys["username_clean"].kind, KeyKind::Unique);
    }

    #[test]
    fn test_missing_dependency_is_fatal() {
        let registry = registry(vec![Step {
            name: "v1",
            deps: vec!["core::ghost"],
            delta: SchemaDelta::new(),
        }]);
        let err = SchemaGenerator::new(&registry).get_schema().unwrap_err();
        assert_eq!(err.message_key(), "MIGRATION_DEPENDENCY_UNRESOLVED");
        assert!(err.to_string().contains("core::ghost"));
    }

    #[test]
    fn test_create_statements() {
        let registry = registry(vec![Step {
            name: "v1",
            deps: vec![],
            delta: SchemaDelta::new().add_table("users", users().index("user_posts", ["user_posts"])),
        }]);
        let statements = SchemaGenerator::new(&registry).create_statements().unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE \"users\""));
        assert!(statements[1].contains("\"users_user_posts\""));

        let conn = Connection::open_in_memory().unwrap();
        for sql in &statements {
            conn.execute_batch(sql).unwrap();
        }
    }
}
