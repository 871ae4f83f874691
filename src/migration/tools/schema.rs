// src/migration/tools/schema.rs

//! Schema tool: applies [`SchemaDelta`]s to a live SQLite database
//!
//! The tool keeps a snapshot of the live schema (tables, columns, primary
//! keys and indexes) loaded from `sqlite_master` and the table pragmas.
//! Every operation checks the snapshot first and is skipped when the
//! desired state already holds, which makes re-applying a delta a no-op.
//!
//! SQLite cannot alter a column or a primary key in place; those changes
//! rebuild the table (create a temporary copy, move the rows, swap names
//! and recreate the indexes). Each operation runs inside its own savepoint.
//!
//! In statement-return mode nothing is executed: the tool plans against its
//! snapshot and hands back the SQL it would have run.

use crate::error::{Error, FailedStatement, Result};
use crate::migration::delta::{ColumnDef, KeyKind, SchemaDelta, TableDef};
use rusqlite::Connection;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Quote an identifier for SQLite
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Physical name of a logical index on a table
pub fn index_name(table: &str, key: &str) -> String {
    format!("{table}_{key}")
}

/// Column name without a `:length` prefix-length suffix
fn index_column(column: &str) -> &str {
    column.split(':').next().unwrap_or(column)
}

/// Definition of a column as the live snapshot records it
///
/// The auto-increment column is declared inline as
/// `INTEGER PRIMARY KEY AUTOINCREMENT` and introspects as a bare `INTEGER`.
fn live_definition(def: &ColumnDef) -> String {
    if def.auto_increment {
        "INTEGER".to_string()
    } else {
        def.sql_definition()
    }
}

/// Split a `CREATE TABLE` body into its top-level column and constraint
/// clauses
fn table_clauses(create_sql: &str) -> Vec<&str> {
    let (Some(open), Some(close)) = (create_sql.find('('), create_sql.rfind(')')) else {
        return Vec::new();
    };
    if close <= open {
        return Vec::new();
    }
    let body = &create_sql[open + 1..close];

    let mut clauses = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, ch) in body.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' | '`' => quote = Some(ch),
                '[' => quote = Some(']'),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    clauses.push(body[start..i].trim());
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    clauses.push(body[start..].trim());
    clauses
}

/// Collation declared on `column` in the table's DDL, uppercased
fn declared_collation(create_sql: &str, column: &str) -> Option<String> {
    table_clauses(create_sql).into_iter().find_map(|clause| {
        let name = clause.split_whitespace().next()?;
        let name = name.trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'));
        if !name.eq_ignore_ascii_case(column) {
            return None;
        }
        let mut words = clause.split_whitespace();
        words.find(|w| w.eq_ignore_ascii_case("COLLATE"))?;
        words.next().map(|w| w.trim_matches('"').to_ascii_uppercase())
    })
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A column as it exists in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub name: String,
    /// Everything after the column name in its DDL
    pub definition: String,
}

/// A secondary index as it exists in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveIndex {
    pub unique: bool,
    pub columns: Vec<String>,
}

/// A table as it exists in the database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveTable {
    pub columns: Vec<LiveColumn>,
    pub primary_key: Vec<String>,
    /// Column declared `INTEGER PRIMARY KEY AUTOINCREMENT`
    pub autoincrement: Option<String>,
    /// Keyed by physical index name
    pub indexes: BTreeMap<String, LiveIndex>,
}

impl LiveTable {
    fn from_def(table: &str, def: &TableDef) -> Self {
        let autoincrement = def
            .columns
            .iter()
            .find(|(_, col)| col.auto_increment)
            .map(|(name, _)| name.clone());

        let columns = def
            .columns
            .iter()
            .map(|(name, col)| LiveColumn {
                name: name.clone(),
                definition: if autoincrement.as_deref() == Some(name.as_str()) {
                    "INTEGER".to_string()
                } else {
                    col.sql_definition()
                },
            })
            .collect();

        let primary_key = match &autoincrement {
            Some(column) => vec![column.clone()],
            None => def.primary_key.clone(),
        };

        let indexes = def
            .keys
            .iter()
            .map(|(key, key_def)| {
                (
                    index_name(table, key),
                    LiveIndex {
                        unique: key_def.kind == KeyKind::Unique,
                        columns: key_def
                            .columns
                            .iter()
                            .map(|c| index_column(c).to_string())
                            .collect(),
                    },
                )
            })
            .collect();

        Self {
            columns,
            primary_key,
            autoincrement,
            indexes,
        }
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    fn create_sql(&self, table: &str) -> String {
        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                if self.autoincrement.as_deref() == Some(col.name.as_str()) {
                    format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(&col.name))
                } else {
                    format!("{} {}", quote_ident(&col.name), col.definition)
                }
            })
            .collect();

        if self.autoincrement.is_none() && !self.primary_key.is_empty() {
            lines.push(format!("PRIMARY KEY ({})", column_list(&self.primary_key)));
        }

        format!("CREATE TABLE {} (\n\t{}\n)", quote_ident(table), lines.join(",\n\t"))
    }
}

fn create_index_sql(table: &str, physical: &str, index: &LiveIndex) -> String {
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(physical),
        quote_ident(table),
        column_list(&index.columns)
    )
}

/// Snapshot of every user table in the database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSchema {
    pub tables: BTreeMap<String, LiveTable>,
}

impl LiveSchema {
    /// Introspect the connected database
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT name, sql FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut tables = BTreeMap::new();
        for (name, sql) in rows {
            let table = Self::load_table(conn, &name, sql.as_deref().unwrap_or_default())?;
            tables.insert(name, table);
        }
        Ok(Self { tables })
    }

    fn load_table(conn: &Connection, name: &str, create_sql: &str) -> Result<LiveTable> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(name)))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)? != 0,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut columns = Vec::with_capacity(rows.len());
        let mut pk = Vec::new();
        for (column, sql_type, not_null, default, pk_position) in rows {
            let mut definition = sql_type;
            if let Some(collation) = declared_collation(create_sql, &column) {
                definition.push_str(" COLLATE ");
                definition.push_str(&collation);
            }
            if not_null {
                definition.push_str(" NOT NULL");
            }
            if let Some(default) = default {
                definition.push_str(" DEFAULT ");
                definition.push_str(&default);
            }
            if pk_position > 0 {
                pk.push((pk_position, column.clone()));
            }
            columns.push(LiveColumn {
                name: column,
                definition,
            });
        }
        pk.sort();
        let primary_key: Vec<String> = pk.into_iter().map(|(_, c)| c).collect();

        let autoincrement = (primary_key.len() == 1
            && create_sql.to_ascii_uppercase().contains("AUTOINCREMENT"))
        .then(|| primary_key[0].clone());

        let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", quote_ident(name)))?;
        let index_rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? != 0,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut indexes = BTreeMap::new();
        for (index, unique, origin) in index_rows {
            if origin == "pk" {
                continue;
            }
            let mut stmt = conn.prepare(&format!("PRAGMA index_info({})", quote_ident(&index)))?;
            let columns = stmt
                .query_map([], |row| row.get::<_, Option<String>>(2))?
                .collect::<rusqlite::Result<Vec<_>>>()?
                .into_iter()
                .flatten()
                .collect();
            indexes.insert(index, LiveIndex { unique, columns });
        }

        Ok(LiveTable {
            columns,
            primary_key,
            autoincrement,
            indexes,
        })
    }
}

/// Result of applying a delta
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaOutcome {
    /// Changes were executed against the database
    Applied,
    /// Statement-return mode: the SQL that would have run
    Statements(Vec<String>),
}

/// Applies schema changes against a live connection
pub struct SchemaTool<'a> {
    conn: &'a Connection,
    schema: LiveSchema,
    return_statements: bool,
    statements: Vec<String>,
}

impl<'a> SchemaTool<'a> {
    /// Create a tool with a fresh snapshot of the database
    pub fn new(conn: &'a Connection) -> Result<Self> {
        Ok(Self {
            conn,
            schema: LiveSchema::load(conn)?,
            return_statements: false,
            statements: Vec::new(),
        })
    }

    /// Switch between executing and returning statements
    pub fn set_return_statements(&mut self, return_statements: bool) {
        self.return_statements = return_statements;
    }

    /// Reload the snapshot from the database
    pub fn refresh(&mut self) -> Result<()> {
        self.schema = LiveSchema::load(self.conn)?;
        Ok(())
    }

    /// Current view of the schema, including planned but unexecuted changes
    pub fn snapshot(&self) -> &LiveSchema {
        &self.schema
    }

    /// Statements collected in statement-return mode
    pub fn take_statements(&mut self) -> Vec<String> {
        std::mem::take(&mut self.statements)
    }

    /// Apply every change in the delta, in the fixed kind order
    ///
    /// A failing operation does not stop the others; all failures are
    /// reported together once the batch is done.
    pub fn apply(&mut self, delta: &SchemaDelta) -> Result<SchemaOutcome> {
        let mut failed = Vec::new();
        let mut record = |result: Result<Option<FailedStatement>>| -> Result<()> {
            if let Some(failure) = result? {
                failed.push(failure);
            }
            Ok(())
        };

        for table in &delta.drop_tables {
            let stmts = self.plan_drop_table(table);
            record(self.commit(stmts))?;
        }
        for (table, def) in &delta.add_tables {
            let stmts = self.plan_create_table(table, def);
            record(self.commit(stmts))?;
        }
        for (table, columns) in &delta.change_columns {
            for (column, def) in columns {
                let stmts = self.plan_change_column(table, column, def);
                record(self.commit(stmts))?;
            }
        }
        for (table, columns) in &delta.add_columns {
            for (column, def) in columns {
                let stmts = self.plan_add_column(table, column, &def.sql_definition());
                record(self.commit(stmts))?;
            }
        }
        for (table, keys) in &delta.drop_keys {
            for key in keys {
                let stmts = self.plan_drop_index(table, key);
                record(self.commit(stmts))?;
            }
        }
        for (table, columns) in &delta.drop_columns {
            for column in columns {
                let stmts = self.plan_drop_column(table, column)?;
                record(self.commit(stmts))?;
            }
        }
        for (table, columns) in &delta.add_primary_keys {
            let stmts = self.plan_add_primary_key(table, columns);
            record(self.commit(stmts))?;
        }
        for (unique, indexes) in [(true, &delta.add_unique_index), (false, &delta.add_index)] {
            for (table, keys) in indexes {
                for (key, columns) in keys {
                    let stmts = self.plan_create_index(table, key, columns, unique);
                    record(self.commit(stmts))?;
                }
            }
        }

        if !failed.is_empty() {
            return Err(Error::SchemaStatements(failed));
        }
        if self.return_statements {
            Ok(SchemaOutcome::Statements(self.take_statements()))
        } else {
            Ok(SchemaOutcome::Applied)
        }
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.schema.tables.contains_key(table)
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.schema.tables.keys().cloned().collect()
    }

    pub fn list_columns(&self, table: &str) -> Vec<String> {
        self.schema
            .tables
            .get(table)
            .map(|t| t.columns.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn column_exists(&self, table: &str, column: &str) -> bool {
        self.schema
            .tables
            .get(table)
            .is_some_and(|t| t.has_column(column))
    }

    /// Logical names of the table's secondary indexes
    pub fn list_indexes(&self, table: &str) -> Vec<String> {
        let prefix = format!("{table}_");
        self.schema
            .tables
            .get(table)
            .map(|t| {
                t.indexes
                    .keys()
                    .map(|physical| {
                        physical
                            .strip_prefix(&prefix)
                            .unwrap_or(physical)
                            .to_string()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn index_exists(&self, table: &str, key: &str) -> bool {
        self.live_index(table, key).is_some()
    }

    pub fn unique_index_exists(&self, table: &str, key: &str) -> bool {
        self.live_index(table, key).is_some_and(|i| i.unique)
    }

    pub fn primary_key(&self, table: &str) -> Vec<String> {
        self.schema
            .tables
            .get(table)
            .map(|t| t.primary_key.clone())
            .unwrap_or_default()
    }

    pub fn create_table(&mut self, table: &str, def: &TableDef) -> Result<()> {
        let stmts = self.plan_create_table(table, def);
        self.commit_one(stmts)
    }

    pub fn drop_table(&mut self, table: &str) -> Result<()> {
        let stmts = self.plan_drop_table(table);
        self.commit_one(stmts)
    }

    pub fn add_column(&mut self, table: &str, column: &str, def: &ColumnDef) -> Result<()> {
        let stmts = self.plan_add_column(table, column, &def.sql_definition());
        self.commit_one(stmts)
    }

    pub fn change_column(&mut self, table: &str, column: &str, def: &ColumnDef) -> Result<()> {
        let stmts = self.plan_change_column(table, column, def);
        self.commit_one(stmts)
    }

    pub fn drop_column(&mut self, table: &str, column: &str) -> Result<()> {
        let stmts = self.plan_drop_column(table, column)?;
        self.commit_one(stmts)
    }

    pub fn create_primary_key(&mut self, table: &str, columns: &[String]) -> Result<()> {
        let stmts = self.plan_add_primary_key(table, columns);
        self.commit_one(stmts)
    }

    pub fn create_index(&mut self, table: &str, key: &str, columns: &[String]) -> Result<()> {
        let stmts = self.plan_create_index(table, key, columns, false);
        self.commit_one(stmts)
    }

    pub fn create_unique_index(&mut self, table: &str, key: &str, columns: &[String]) -> Result<()> {
        let stmts = self.plan_create_index(table, key, columns, true);
        self.commit_one(stmts)
    }

    pub fn drop_index(&mut self, table: &str, key: &str) -> Result<()> {
        let stmts = self.plan_drop_index(table, key);
        self.commit_one(stmts)
    }

    fn live_index(&self, table: &str, key: &str) -> Option<&LiveIndex> {
        self.schema
            .tables
            .get(table)
            .and_then(|t| t.indexes.get(&index_name(table, key)))
    }

    fn plan_create_table(&mut self, table: &str, def: &TableDef) -> Vec<String> {
        if self.table_exists(table) {
            debug!("Table {} already exists, skipping", table);
            return Vec::new();
        }
        if def.columns.is_empty() {
            warn!("Table {} has no columns, skipping", table);
            return Vec::new();
        }

        let live = LiveTable::from_def(table, def);
        let mut stmts = vec![live.create_sql(table)];
        stmts.extend(
            live.indexes
                .iter()
                .map(|(physical, index)| create_index_sql(table, physical, index)),
        );
        self.schema.tables.insert(table.to_string(), live);
        stmts
    }

    fn plan_drop_table(&mut self, table: &str) -> Vec<String> {
        if self.schema.tables.remove(table).is_none() {
            return Vec::new();
        }
        vec![format!("DROP TABLE {}", quote_ident(table))]
    }

    fn plan_add_column(&mut self, table: &str, column: &str, definition: &str) -> Vec<String> {
        let Some(live) = self.schema.tables.get_mut(table) else {
            debug!("Cannot add column {} to missing table {}", column, table);
            return Vec::new();
        };
        if live.has_column(column) {
            return Vec::new();
        }
        live.columns.push(LiveColumn {
            name: column.to_string(),
            definition: definition.to_string(),
        });
        vec![format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(table),
            quote_ident(column),
            definition
        )]
    }

    fn plan_change_column(&mut self, table: &str, column: &str, def: &ColumnDef) -> Vec<String> {
        let Some(old) = self.schema.tables.get(table).cloned() else {
            return Vec::new();
        };
        let Some(existing) = old.columns.iter().find(|c| c.name == column) else {
            return self.plan_add_column(table, column, &def.sql_definition());
        };
        let definition = live_definition(def);
        let is_autoincrement = old.autoincrement.as_deref() == Some(column);
        if existing.definition == definition && is_autoincrement == def.auto_increment {
            return Vec::new();
        }

        let mut new = old.clone();
        for col in &mut new.columns {
            if col.name == column {
                col.definition = definition.clone();
            }
        }
        if def.auto_increment {
            new.autoincrement = Some(column.to_string());
            new.primary_key = vec![column.to_string()];
        } else if is_autoincrement {
            new.autoincrement = None;
        }
        self.plan_rebuild(table, &old, new)
    }

    fn plan_drop_column(&mut self, table: &str, column: &str) -> Result<Vec<String>> {
        let Some(old) = self.schema.tables.get(table).cloned() else {
            return Ok(Vec::new());
        };
        if !old.has_column(column) {
            return Ok(Vec::new());
        }
        if old.columns.len() == 1 {
            return Err(Error::Schema(format!(
                "cannot drop {column}, the only column of {table}"
            )));
        }

        let mut new = old.clone();
        new.columns.retain(|c| c.name != column);
        new.primary_key.retain(|c| c != column);
        if new.autoincrement.as_deref() == Some(column) {
            new.autoincrement = None;
        }
        new.indexes.retain(|_, index| !index.columns.iter().any(|c| c == column));
        Ok(self.plan_rebuild(table, &old, new))
    }

    fn plan_add_primary_key(&mut self, table: &str, columns: &[String]) -> Vec<String> {
        let Some(old) = self.schema.tables.get(table).cloned() else {
            return Vec::new();
        };
        if old.primary_key == columns {
            return Vec::new();
        }

        let mut new = old.clone();
        new.primary_key = columns.to_vec();
        if new.primary_key.len() != 1
            || new.autoincrement.as_deref() != new.primary_key.first().map(String::as_str)
        {
            new.autoincrement = None;
        }
        self.plan_rebuild(table, &old, new)
    }

    fn plan_create_index(&mut self, table: &str, key: &str, columns: &[String], unique: bool) -> Vec<String> {
        let physical = index_name(table, key);
        let Some(live) = self.schema.tables.get_mut(table) else {
            debug!("Cannot index missing table {}", table);
            return Vec::new();
        };

        let mut stmts = Vec::new();
        if let Some(existing) = live.indexes.get(&physical) {
            if existing.unique || !unique {
                return Vec::new();
            }
            stmts.push(format!("DROP INDEX {}", quote_ident(&physical)));
        }

        let index = LiveIndex {
            unique,
            columns: columns.iter().map(|c| index_column(c).to_string()).collect(),
        };
        stmts.push(create_index_sql(table, &physical, &index));
        live.indexes.insert(physical, index);
        stmts
    }

    fn plan_drop_index(&mut self, table: &str, key: &str) -> Vec<String> {
        let physical = index_name(table, key);
        let removed = self
            .schema
            .tables
            .get_mut(table)
            .and_then(|t| t.indexes.remove(&physical));
        match removed {
            Some(_) => vec![format!("DROP INDEX {}", quote_ident(&physical))],
            None => Vec::new(),
        }
    }

    /// Copy the table into a new definition and swap it in place
    fn plan_rebuild(&mut self, table: &str, old: &LiveTable, new: LiveTable) -> Vec<String> {
        let temp = format!("__temp__{table}");
        let common: Vec<String> = new
            .columns
            .iter()
            .filter(|c| old.has_column(&c.name))
            .map(|c| c.name.clone())
            .collect();
        let common = column_list(&common);

        let mut stmts = vec![
            new.create_sql(&temp),
            format!(
                "INSERT INTO {} ({common}) SELECT {common} FROM {}",
                quote_ident(&temp),
                quote_ident(table)
            ),
            format!("DROP TABLE {}", quote_ident(table)),
            format!(
                "ALTER TABLE {} RENAME TO {}",
                quote_ident(&temp),
                quote_ident(table)
            ),
        ];
        stmts.extend(
            new.indexes
                .iter()
                .map(|(physical, index)| create_index_sql(table, physical, index)),
        );

        self.schema.tables.insert(table.to_string(), new);
        stmts
    }

    /// Execute (or collect) the statements of one operation
    ///
    /// Returns the failing statement, if any. On failure the savepoint is
    /// rolled back and the snapshot reloaded from the database.
    fn commit(&mut self, statements: Vec<String>) -> Result<Option<FailedStatement>> {
        if statements.is_empty() {
            return Ok(None);
        }
        if self.return_statements {
            self.statements.extend(statements);
            return Ok(None);
        }

        self.conn.execute_batch("SAVEPOINT schema_change")?;
        for sql in &statements {
            debug!("Executing schema statement: {}", sql);
            if let Err(e) = self.conn.execute_batch(sql) {
                warn!("Schema statement failed: {} ({})", sql, e);
                self.conn
                    .execute_batch("ROLLBACK TO schema_change; RELEASE schema_change")?;
                self.refresh()?;
                return Ok(Some(FailedStatement {
                    sql: sql.clone(),
                    error: e.to_string(),
                }));
            }
        }
        self.conn.execute_batch("RELEASE schema_change")?;
        Ok(None)
    }

    fn commit_one(&mut self, statements: Vec<String>) -> Result<()> {
        match self.commit(statements)? {
            Some(failure) => Err(Error::SchemaStatements(vec![failure])),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::delta::ColumnKind;

    fn forums_table() -> TableDef {
        TableDef::new()
            .column("forum_id", ColumnDef::new(ColumnKind::UInt, 0).auto_increment())
            .column("forum_name", ColumnDef::new(ColumnKind::VCharUni, ""))
            .column("forum_posts", ColumnDef::new(ColumnKind::UInt, 0))
            .primary_key(["forum_id"])
            .index("forum_name", ["forum_name:50"])
    }

    fn conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_create_table_and_introspect() {
        let conn = conn();
        let mut tool = SchemaTool::new(&conn).unwrap();
        let delta = SchemaDelta::new().add_table("forums", forums_table());

        assert_eq!(tool.apply(&delta).unwrap(), SchemaOutcome::Applied);

        let mut fresh = SchemaTool::new(&conn).unwrap();
        fresh.refresh().unwrap();
        assert!(fresh.table_exists("forums"));
        assert_eq!(
            fresh.list_columns("forums"),
            vec!["forum_id", "forum_name", "forum_posts"]
        );
        assert_eq!(fresh.primary_key("forums"), vec!["forum_id"]);
        assert_eq!(fresh.list_indexes("forums"), vec!["forum_name"]);
        assert!(!fresh.unique_index_exists("forums", "forum_name"));
        assert_eq!(
            fresh.snapshot().tables["forums"].autoincrement.as_deref(),
            Some("forum_id")
        );
    }

    fn assert_reapply_is_noop(conn: &Connection, delta: &SchemaDelta) {
        let mut tool = SchemaTool::new(conn).unwrap();
        tool.set_return_statements(true);
        assert_eq!(
            tool.apply(delta).unwrap(),
            SchemaOutcome::Statements(Vec::new())
        );
    }

    #[test]
    fn test_reapplying_delta_is_noop() {
        let conn = conn();
        conn.execute_batch("CREATE TABLE legacy (id INTEGER)").unwrap();
        let watch = TableDef::new()
            .column("user_id", ColumnDef::new(ColumnKind::UInt, 0))
            .column("forum_id", ColumnDef::new(ColumnKind::UInt, 0));

        // one change of every kind
        let delta = SchemaDelta::new()
            .drop_table("legacy")
            .add_table("forums", forums_table())
            .add_table("watch", watch)
            .change_column("forums", "forum_name", ColumnDef::new(ColumnKind::VCharCi, ""))
            .change_column(
                "forums",
                "forum_id",
                ColumnDef::new(ColumnKind::UInt, 0).auto_increment(),
            )
            .add_column("forums", "forum_desc", ColumnDef::new(ColumnKind::Text, ""))
            .drop_key("forums", "forum_name")
            .drop_column("forums", "forum_posts")
            .add_primary_key("watch", ["user_id", "forum_id"])
            .add_unique_index("forums", "forum_desc", ["forum_desc"])
            .add_index("watch", "forum_id", ["forum_id"]);

        SchemaTool::new(&conn).unwrap().apply(&delta).unwrap();

        let live = LiveSchema::load(&conn).unwrap();
        assert!(!live.tables.contains_key("legacy"));
        let forums = &live.tables["forums"];
        assert_eq!(forums.autoincrement.as_deref(), Some("forum_id"));
        assert_eq!(
            forums.columns[1].definition,
            "VARCHAR(255) COLLATE NOCASE NOT NULL DEFAULT ''"
        );
        assert_eq!(live.tables["watch"].primary_key, vec!["user_id", "forum_id"]);

        assert_reapply_is_noop(&conn, &delta);
    }

    #[test]
    fn test_case_insensitive_column_change_is_idempotent() {
        let conn = conn();
        let mut tool = SchemaTool::new(&conn).unwrap();
        tool.create_table("forums", &forums_table()).unwrap();
        conn.execute("INSERT INTO forums (forum_name) VALUES ('General')", [])
            .unwrap();

        let delta = SchemaDelta::new().change_column(
            "forums",
            "forum_name",
            ColumnDef::new(ColumnKind::VCharCi, ""),
        );
        tool.apply(&delta).unwrap();

        let found: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM forums WHERE forum_name = 'GENERAL'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(found, 1);
        assert_reapply_is_noop(&conn, &delta);
    }

    #[test]
    fn test_change_column_keeps_auto_increment() {
        let conn = conn();
        let mut tool = SchemaTool::new(&conn).unwrap();
        tool.create_table("forums", &forums_table()).unwrap();

        let delta = SchemaDelta::new().change_column(
            "forums",
            "forum_id",
            ColumnDef::new(ColumnKind::UInt, 0).auto_increment(),
        );
        tool.apply(&delta).unwrap();
        assert_eq!(
            LiveSchema::load(&conn).unwrap().tables["forums"].autoincrement.as_deref(),
            Some("forum_id")
        );
        assert_reapply_is_noop(&conn, &delta);
    }

    #[test]
    fn test_change_column_to_auto_increment() {
        let conn = conn();
        let mut tool = SchemaTool::new(&conn).unwrap();
        let topics = TableDef::new()
            .column("topic_id", ColumnDef::new(ColumnKind::UInt, 0))
            .column("topic_title", ColumnDef::new(ColumnKind::VCharUni, ""))
            .primary_key(["topic_id"]);
        tool.create_table("topics", &topics).unwrap();
        conn.execute("INSERT INTO topics (topic_id, topic_title) VALUES (4, 'Welcome')", [])
            .unwrap();

        let delta = SchemaDelta::new().change_column(
            "topics",
            "topic_id",
            ColumnDef::new(ColumnKind::UInt, 0).auto_increment(),
        );
        tool.apply(&delta).unwrap();

        let live = LiveSchema::load(&conn).unwrap();
        assert_eq!(live.tables["topics"].autoincrement.as_deref(), Some("topic_id"));
        conn.execute("INSERT INTO topics (topic_title) VALUES ('Rules')", [])
            .unwrap();
        let max: i64 = conn
            .query_row("SELECT MAX(topic_id) FROM topics", [], |row| row.get(0))
            .unwrap();
        assert_eq!(max, 5);
        assert_reapply_is_noop(&conn, &delta);
    }

    #[test]
    fn test_return_statements_does_not_touch_database() {
        let conn = conn();
        let mut tool = SchemaTool::new(&conn).unwrap();
        tool.set_return_statements(true);

        let outcome = tool
            .apply(&SchemaDelta::new().add_table("forums", forums_table()))
            .unwrap();
        let SchemaOutcome::Statements(stmts) = outcome else {
            panic!("expected statements");
        };
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].starts_with("CREATE TABLE \"forums\""));
        assert!(stmts[0].contains("\"forum_id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert_eq!(
            stmts[1],
            "CREATE INDEX \"forums_forum_name\" ON \"forums\" (\"forum_name\")"
        );

        assert!(LiveSchema::load(&conn).unwrap().tables.is_empty());
    }

    #[test]
    fn test_change_column_rebuilds_and_keeps_rows() {
        let conn = conn();
        let mut tool = SchemaTool::new(&conn).unwrap();
        tool.create_table("forums", &forums_table()).unwrap();
        conn.execute(
            "INSERT INTO forums (forum_name, forum_posts) VALUES ('General', 7)",
            [],
        )
        .unwrap();

        tool.apply(&SchemaDelta::new().change_column(
            "forums",
            "forum_name",
            ColumnDef::new(ColumnKind::VChar, "unnamed").sized(100),
        ))
        .unwrap();

        let (name, posts): (String, i64) = conn
            .query_row("SELECT forum_name, forum_posts FROM forums", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(name, "General");
        assert_eq!(posts, 7);

        let live = LiveSchema::load(&conn).unwrap();
        let table = &live.tables["forums"];
        assert_eq!(table.columns[1].definition, "VARCHAR(100) NOT NULL DEFAULT 'unnamed'");
        assert!(table.indexes.contains_key("forums_forum_name"));
        assert_eq!(table.autoincrement.as_deref(), Some("forum_id"));
    }

    #[test]
    fn test_change_missing_column_adds_it() {
        let conn = conn();
        let mut tool = SchemaTool::new(&conn).unwrap();
        tool.create_table("forums", &forums_table()).unwrap();
        tool.apply(&SchemaDelta::new().change_column(
            "forums",
            "forum_rules",
            ColumnDef::new(ColumnKind::MText, ""),
        ))
        .unwrap();

        tool.refresh().unwrap();
        assert!(tool.column_exists("forums", "forum_rules"));
    }

    #[test]
    fn test_drop_indexed_column() {
        let conn = conn();
        let mut tool = SchemaTool::new(&conn).unwrap();
        tool.create_table("forums", &forums_table()).unwrap();

        tool.drop_column("forums", "forum_name").unwrap();
        tool.refresh().unwrap();

        assert_eq!(tool.list_columns("forums"), vec!["forum_id", "forum_posts"]);
        assert!(tool.list_indexes("forums").is_empty());
        // Dropping again is a no-op
        tool.drop_column("forums", "forum_name").unwrap();
    }

    #[test]
    fn test_add_primary_key() {
        let conn = conn();
        let mut tool = SchemaTool::new(&conn).unwrap();
        let table = TableDef::new()
            .column("user_id", ColumnDef::new(ColumnKind::UInt, 0))
            .column("forum_id", ColumnDef::new(ColumnKind::UInt, 0));
        tool.create_table("watch", &table).unwrap();

        let delta = SchemaDelta::new().add_primary_key("watch", ["user_id", "forum_id"]);
        tool.apply(&delta).unwrap();
        tool.refresh().unwrap();
        assert_eq!(tool.primary_key("watch"), vec!["user_id", "forum_id"]);
    }

    #[test]
    fn test_unique_index_replaces_plain_index() {
        let conn = conn();
        let mut tool = SchemaTool::new(&conn).unwrap();
        tool.create_table("forums", &forums_table()).unwrap();

        tool.create_unique_index("forums", "forum_name", &["forum_name".to_string()])
            .unwrap();
        tool.refresh().unwrap();
        assert!(tool.unique_index_exists("forums", "forum_name"));
    }

    #[test]
    fn test_failed_statement_does_not_abort_batch() {
        let conn = conn();
        let mut tool = SchemaTool::new(&conn).unwrap();
        tool.create_table("forums", &forums_table()).unwrap();
        conn.execute_batch(
            "INSERT INTO forums (forum_name) VALUES ('dup');
             INSERT INTO forums (forum_name) VALUES ('dup');",
        )
        .unwrap();

        let delta = SchemaDelta::new()
            .add_unique_index("forums", "unique_name", ["forum_name"])
            .add_index("forums", "posts", ["forum_posts"]);

        match tool.apply(&delta) {
            Err(Error::SchemaStatements(failed)) => {
                assert_eq!(failed.len(), 1);
                assert!(failed[0].sql.contains("forums_unique_name"));
            }
            other => panic!("expected statement failure, got {other:?}"),
        }

        let live = LiveSchema::load(&conn).unwrap();
        assert!(live.tables["forums"].indexes.contains_key("forums_posts"));
        assert!(!live.tables["forums"].indexes.contains_key("forums_unique_name"));
    }

    #[test]
    fn test_operations_on_missing_table_are_skipped() {
        let conn = conn();
        let mut tool = SchemaTool::new(&conn).unwrap();
        let delta = SchemaDelta::new()
            .add_column("nope", "a", ColumnDef::new(ColumnKind::UInt, 0))
            .add_index("nope", "a", ["a"])
            .drop_column("nope", "a")
            .drop_key("nope", "a")
            .drop_table("nope");
        assert_eq!(tool.apply(&delta).unwrap(), SchemaOutcome::Applied);
    }
}
