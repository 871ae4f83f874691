// src/migration/delta.rs

//! Declarative schema deltas
//!
//! A [`SchemaDelta`] describes structural changes in a database-neutral
//! vocabulary. Column types come from a closed set ([`ColumnKind`]) with an
//! optional size suffix, e.g. `VCHAR:100`. Deltas are replayed in a fixed
//! order of change kinds:
//!
//! drop tables, add tables, change columns, add columns, drop keys,
//! drop columns, add primary keys, add unique indexes, add indexes.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use strum_macros::{Display, EnumString, IntoStaticStr};

/// Closed vocabulary of abstract column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ColumnKind {
    #[strum(serialize = "BINT")]
    BigInt,
    #[strum(serialize = "USINT")]
    USmallInt,
    #[strum(serialize = "ULINT")]
    ULongInt,
    #[strum(serialize = "UINT")]
    UInt,
    #[strum(serialize = "TINT")]
    TinyInt,
    #[strum(serialize = "INT")]
    Int,
    #[strum(serialize = "TIMESTAMP")]
    Timestamp,
    #[strum(serialize = "BOOL")]
    Bool,
    #[strum(serialize = "DECIMAL")]
    Decimal,
    #[strum(serialize = "PDECIMAL")]
    PDecimal,
    #[strum(serialize = "CHAR")]
    Char,
    #[strum(serialize = "VCHAR")]
    VChar,
    #[strum(serialize = "VCHAR_UNI")]
    VCharUni,
    #[strum(serialize = "VCHAR_CI")]
    VCharCi,
    #[strum(serialize = "VARBINARY")]
    VarBinary,
    #[strum(serialize = "XSTEXT")]
    XsText,
    #[strum(serialize = "XSTEXT_UNI")]
    XsTextUni,
    #[strum(serialize = "STEXT")]
    SText,
    #[strum(serialize = "STEXT_UNI")]
    STextUni,
    #[strum(serialize = "TEXT")]
    Text,
    #[strum(serialize = "TEXT_UNI")]
    TextUni,
    #[strum(serialize = "MTEXT")]
    MText,
    #[strum(serialize = "MTEXT_UNI")]
    MTextUni,
}

/// Abstract column type with optional size, written `KIND` or `KIND:size`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ColumnType {
    pub kind: ColumnKind,
    pub size: Option<u32>,
}

impl ColumnType {
    pub fn new(kind: ColumnKind) -> Self {
        Self { kind, size: None }
    }

    /// Native SQLite type for this column
    pub fn sql_type(&self) -> String {
        use ColumnKind::*;
        match self.kind {
            BigInt | USmallInt | ULongInt | UInt | TinyInt | Int | Timestamp => {
                "INTEGER".to_string()
            }
            Bool => "BOOLEAN".to_string(),
            Decimal => format!("DECIMAL({},2)", self.size.unwrap_or(5)),
            PDecimal => format!("DECIMAL({},3)", self.size.unwrap_or(6)),
            Char => format!("CHAR({})", self.size.unwrap_or(255)),
            VChar | VCharUni | VCharCi => format!("VARCHAR({})", self.size.unwrap_or(255)),
            VarBinary => "BLOB".to_string(),
            XsText | XsTextUni | SText | STextUni | Text | TextUni | MText | MTextUni => {
                "TEXT".to_string()
            }
        }
    }

    /// Collation required by the type, if any
    pub fn collation(&self) -> Option<&'static str> {
        match self.kind {
            ColumnKind::VCharCi => Some("NOCASE"),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            Some(size) => write!(f, "{}:{}", self.kind, size),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl FromStr for ColumnType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, size) = match s.split_once(':') {
            Some((kind, size)) => {
                let size = size
                    .parse::<u32>()
                    .map_err(|_| Error::Schema(format!("invalid column size in {s}")))?;
                (kind, Some(size))
            }
            None => (s, None),
        };
        let kind = ColumnKind::from_str(kind)
            .map_err(|_| Error::Schema(format!("unknown column type {s}")))?;
        Ok(Self { kind, size })
    }
}

impl TryFrom<String> for ColumnType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

/// Column default; `Null` makes the column nullable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnDefault {
    Null,
    Int(i64),
    Text(String),
}

impl ColumnDefault {
    /// SQL literal for the default, `None` for nullable columns
    pub fn sql_literal(&self) -> Option<String> {
        match self {
            ColumnDefault::Null => None,
            ColumnDefault::Int(value) => Some(value.to_string()),
            ColumnDefault::Text(value) => Some(format!("'{}'", value.replace('\'', "''"))),
        }
    }
}

impl From<i64> for ColumnDefault {
    fn from(value: i64) -> Self {
        ColumnDefault::Int(value)
    }
}

impl From<bool> for ColumnDefault {
    fn from(value: bool) -> Self {
        ColumnDefault::Int(i64::from(value))
    }
}

impl From<&str> for ColumnDefault {
    fn from(value: &str) -> Self {
        ColumnDefault::Text(value.to_string())
    }
}

impl From<String> for ColumnDefault {
    fn from(value: String) -> Self {
        ColumnDefault::Text(value)
    }
}

/// Column descriptor: type, default and options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub default: ColumnDefault,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_increment: bool,
    /// Place the column after this one (schema generation only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

impl ColumnDef {
    pub fn new(kind: ColumnKind, default: impl Into<ColumnDefault>) -> Self {
        Self {
            column_type: ColumnType::new(kind),
            default: default.into(),
            auto_increment: false,
            after: None,
        }
    }

    /// Nullable column without a default
    pub fn nullable(kind: ColumnKind) -> Self {
        Self::new(kind, ColumnDefault::Null)
    }

    pub fn sized(mut self, size: u32) -> Self {
        self.column_type.size = Some(size);
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn after(mut self, column: impl Into<String>) -> Self {
        self.after = Some(column.into());
        self
    }

    /// Column definition as it follows the column name in DDL
    pub fn sql_definition(&self) -> String {
        let mut sql = self.column_type.sql_type();
        if let Some(collation) = self.column_type.collation() {
            sql.push_str(" COLLATE ");
            sql.push_str(collation);
        }
        if let Some(default) = self.default.sql_literal() {
            sql.push_str(" NOT NULL DEFAULT ");
            sql.push_str(&default);
        }
        sql
    }
}

/// Kind of a secondary key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyKind {
    Unique,
    Index,
}

/// Secondary key on a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDef {
    pub kind: KeyKind,
    pub columns: Vec<String>,
}

/// Full table description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub columns: Vec<(String, ColumnDef)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, KeyDef>,
}

impl TableDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: impl Into<String>, def: ColumnDef) -> Self {
        self.set_column(name.into(), def);
        self
    }

    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn index<I, S>(mut self, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys.insert(
            name.into(),
            KeyDef {
                kind: KeyKind::Index,
                columns: columns.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    pub fn unique<I, S>(mut self, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys.insert(
            name.into(),
            KeyDef {
                kind: KeyKind::Unique,
                columns: columns.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, def)| def)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    /// Replace a column in place, or append it
    pub fn set_column(&mut self, name: String, def: ColumnDef) {
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = def,
            None => self.columns.push((name, def)),
        }
    }

    /// Insert a column directly after `after`, falling back to append
    pub fn insert_column_after(&mut self, name: String, def: ColumnDef, after: &str) {
        self.remove_column(&name);
        match self.columns.iter().position(|(n, _)| n == after) {
            Some(pos) => self.columns.insert(pos + 1, (name, def)),
            None => self.columns.push((name, def)),
        }
    }

    pub fn remove_column(&mut self, name: &str) -> Option<ColumnDef> {
        let pos = self.columns.iter().position(|(n, _)| n == name)?;
        Some(self.columns.remove(pos).1)
    }
}

/// Change kinds in the order they are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ChangeKind {
    DropTables,
    AddTables,
    ChangeColumns,
    AddColumns,
    DropKeys,
    DropColumns,
    AddPrimaryKeys,
    AddUniqueIndex,
    AddIndex,
}

/// Declarative set of schema changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaDelta {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub drop_tables: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub add_tables: BTreeMap<String, TableDef>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub change_columns: BTreeMap<String, Vec<(String, ColumnDef)>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub add_columns: BTreeMap<String, Vec<(String, ColumnDef)>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub drop_keys: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub drop_columns: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub add_primary_keys: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub add_unique_index: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub add_index: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

fn strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

impl SchemaDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drop_table(mut self, table: impl Into<String>) -> Self {
        self.drop_tables.push(table.into());
        self
    }

    pub fn add_table(mut self, table: impl Into<String>, def: TableDef) -> Self {
        self.add_tables.insert(table.into(), def);
        self
    }

    pub fn change_column(
        mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        def: ColumnDef,
    ) -> Self {
        self.change_columns
            .entry(table.into())
            .or_default()
            .push((column.into(), def));
        self
    }

    pub fn add_column(
        mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        def: ColumnDef,
    ) -> Self {
        self.add_columns
            .entry(table.into())
            .or_default()
            .push((column.into(), def));
        self
    }

    pub fn drop_key(mut self, table: impl Into<String>, key: impl Into<String>) -> Self {
        self.drop_keys.entry(table.into()).or_default().push(key.into());
        self
    }

    pub fn drop_column(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.drop_columns
            .entry(table.into())
            .or_default()
            .push(column.into());
        self
    }

    pub fn add_primary_key<I, S>(mut self, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_primary_keys.insert(table.into(), strings(columns));
        self
    }

    pub fn add_unique_index<I, S>(
        mut self,
        table: impl Into<String>,
        name: impl Into<String>,
        columns: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_unique_index
            .entry(table.into())
            .or_default()
            .insert(name.into(), strings(columns));
        self
    }

    pub fn add_index<I, S>(mut self, table: impl Into<String>, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_index
            .entry(table.into())
            .or_default()
            .insert(name.into(), strings(columns));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.kinds().is_empty()
    }

    /// Change kinds present in this delta, in application order
    pub fn kinds(&self) -> Vec<ChangeKind> {
        let present = [
            (ChangeKind::DropTables, !self.drop_tables.is_empty()),
            (ChangeKind::AddTables, !self.add_tables.is_empty()),
            (ChangeKind::ChangeColumns, !self.change_columns.is_empty()),
            (ChangeKind::AddColumns, !self.add_columns.is_empty()),
            (ChangeKind::DropKeys, !self.drop_keys.is_empty()),
            (ChangeKind::DropColumns, !self.drop_columns.is_empty()),
            (ChangeKind::AddPrimaryKeys, !self.add_primary_keys.is_empty()),
            (ChangeKind::AddUniqueIndex, !self.add_unique_index.is_empty()),
            (ChangeKind::AddIndex, !self.add_index.is_empty()),
        ];
        present
            .into_iter()
            .filter_map(|(kind, present)| present.then_some(kind))
            .collect()
    }

    /// Split into single-kind deltas, one per change kind, in application order
    pub fn split(&self) -> Vec<SchemaDelta> {
        self.kinds()
            .into_iter()
            .map(|kind| {
                let mut part = SchemaDelta::default();
                match kind {
                    ChangeKind::DropTables => part.drop_tables = self.drop_tables.clone(),
                    ChangeKind::AddTables => part.add_tables = self.add_tables.clone(),
                    ChangeKind::ChangeColumns => part.change_columns = self.change_columns.clone(),
                    ChangeKind::AddColumns => part.add_columns = self.add_columns.clone(),
                    ChangeKind::DropKeys => part.drop_keys = self.drop_keys.clone(),
                    ChangeKind::DropColumns => part.drop_columns = self.drop_columns.clone(),
                    ChangeKind::AddPrimaryKeys => {
                        part.add_primary_keys = self.add_primary_keys.clone()
                    }
                    ChangeKind::AddUniqueIndex => {
                        part.add_unique_index = self.add_unique_index.clone()
                    }
                    ChangeKind::AddIndex => part.add_index = self.add_index.clone(),
                }
                part
            })
            .collect()
    }

    /// Delta undoing the additive parts of this one
    ///
    /// Drops and column changes cannot be inverted without the prior
    /// definitions, so they contribute nothing. Returns `None` when
    /// nothing is left to undo.
    pub fn inverse(&self) -> Option<SchemaDelta> {
        let mut inverse = SchemaDelta::default();

        inverse.drop_tables = self.add_tables.keys().rev().cloned().collect();

        for (table, columns) in &self.add_columns {
            inverse.drop_columns.insert(
                table.clone(),
                columns.iter().rev().map(|(name, _)| name.clone()).collect(),
            );
        }

        for indexes in [&self.add_unique_index, &self.add_index] {
            for (table, keys) in indexes {
                inverse
                    .drop_keys
                    .entry(table.clone())
                    .or_default()
                    .extend(keys.keys().cloned());
            }
        }

        (!inverse.is_empty()).then_some(inverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_parse() {
        let t: ColumnType = "VCHAR:100".parse().unwrap();
        assert_eq!(t.kind, ColumnKind::VChar);
        assert_eq!(t.size, Some(100));
        assert_eq!(t.sql_type(), "VARCHAR(100)");
        assert_eq!(t.to_string(), "VCHAR:100");

        let t: ColumnType = "MTEXT_UNI".parse().unwrap();
        assert_eq!(t.kind, ColumnKind::MTextUni);
        assert_eq!(t.sql_type(), "TEXT");

        assert!("VCHAR:abc".parse::<ColumnType>().is_err());
        assert!("FLOATY".parse::<ColumnType>().is_err());
    }

    #[test]
    fn test_decimal_precision() {
        assert_eq!(ColumnType::new(ColumnKind::Decimal).sql_type(), "DECIMAL(5,2)");
        assert_eq!(ColumnType::new(ColumnKind::PDecimal).sql_type(), "DECIMAL(6,3)");
    }

    #[test]
    fn test_column_sql_definition() {
        assert_eq!(
            ColumnDef::new(ColumnKind::UInt, 0).sql_definition(),
            "INTEGER NOT NULL DEFAULT 0"
        );
        assert_eq!(
            ColumnDef::new(ColumnKind::VCharCi, "it's").sql_definition(),
            "VARCHAR(255) COLLATE NOCASE NOT NULL DEFAULT 'it''s'"
        );
        assert_eq!(ColumnDef::nullable(ColumnKind::Text).sql_definition(), "TEXT");
    }

    #[test]
    fn test_column_def_json() {
        let def = ColumnDef::new(ColumnKind::VChar, "").sized(20);
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json, serde_json::json!({"type": "VCHAR:20", "default": ""}));

        let back: ColumnDef = serde_json::from_value(json).unwrap();
        assert_eq!(back, def);
    }

    #[test]
    fn test_split_follows_application_order() {
        let delta = SchemaDelta::new()
            .add_index("t", "idx", ["a"])
            .add_column("t", "a", ColumnDef::new(ColumnKind::UInt, 0))
            .drop_table("old");

        let parts = delta.split();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].kinds(), vec![ChangeKind::DropTables]);
        assert_eq!(parts[1].kinds(), vec![ChangeKind::AddColumns]);
        assert_eq!(parts[2].kinds(), vec![ChangeKind::AddIndex]);
    }

    #[test]
    fn test_inverse_of_additive_delta() {
        let delta = SchemaDelta::new()
            .add_table("a", TableDef::new().column("id", ColumnDef::new(ColumnKind::UInt, 0)))
            .add_column("b", "x", ColumnDef::new(ColumnKind::UInt, 0))
            .add_column("b", "y", ColumnDef::new(ColumnKind::UInt, 0))
            .add_unique_index("b", "x_y", ["x", "y"]);

        let inverse = delta.inverse().unwrap();
        assert_eq!(inverse.drop_tables, vec!["a"]);
        assert_eq!(inverse.drop_columns["b"], vec!["y", "x"]);
        assert_eq!(inverse.drop_keys["b"], vec!["x_y"]);
    }

    #[test]
    fn test_inverse_of_destructive_delta_is_none() {
        let delta = SchemaDelta::new().drop_table("a").drop_column("b", "c");
        assert!(delta.inverse().is_none());
    }

    #[test]
    fn test_insert_column_after() {
        let mut table = TableDef::new()
            .column("a", ColumnDef::new(ColumnKind::UInt, 0))
            .column("c", ColumnDef::new(ColumnKind::UInt, 0));
        table.insert_column_after("b".into(), ColumnDef::new(ColumnKind::UInt, 0), "a");
        table.insert_column_after("z".into(), ColumnDef::new(ColumnKind::UInt, 0), "missing");

        let names: Vec<_> = table.columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "z"]);
    }
}
