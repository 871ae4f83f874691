// src/migration/tools/config_text.rs

//! Config text tool: large text settings kept apart from the config table

use crate::error::Result;
use crate::migration::step::StepValue;
use crate::migration::tools::schema::quote_ident;
use rusqlite::{Connection, OptionalExtension, params};
use strum_macros::IntoStaticStr;

#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ConfigTextCall {
    Add {
        name: String,
        value: String,
    },
    Remove {
        name: String,
        value: Option<String>,
    },
    Update {
        name: String,
        value: String,
        previous: Option<String>,
    },
}

impl ConfigTextCall {
    pub fn add(name: impl Into<String>, value: impl Into<String>) -> Self {
        ConfigTextCall::Add {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn remove(name: impl Into<String>) -> Self {
        ConfigTextCall::Remove {
            name: name.into(),
            value: None,
        }
    }

    pub fn update(name: impl Into<String>, value: impl Into<String>) -> Self {
        ConfigTextCall::Update {
            name: name.into(),
            value: value.into(),
            previous: None,
        }
    }

    pub fn method(&self) -> &'static str {
        self.into()
    }

    pub fn reversed(&self) -> Option<ConfigTextCall> {
        match self {
            ConfigTextCall::Add { name, value } => Some(ConfigTextCall::Remove {
                name: name.clone(),
                value: Some(value.clone()),
            }),
            ConfigTextCall::Remove { name, value } => Some(ConfigTextCall::Add {
                name: name.clone(),
                value: value.clone().unwrap_or_default(),
            }),
            ConfigTextCall::Update {
                name,
                value,
                previous,
            } => previous.as_ref().map(|previous| ConfigTextCall::Update {
                name: name.clone(),
                value: previous.clone(),
                previous: Some(value.clone()),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigTextTool {
    table: String,
}

impl ConfigTextTool {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn call(&self, conn: &Connection, call: &ConfigTextCall) -> Result<StepValue> {
        match call {
            ConfigTextCall::Add { name, value } => self.add(conn, name, value)?,
            ConfigTextCall::Remove { name, .. } => self.remove(conn, name)?,
            ConfigTextCall::Update { name, value, .. } => self.set(conn, name, value)?,
        }
        Ok(StepValue::Unit)
    }

    pub fn get(&self, conn: &Connection, name: &str) -> Result<Option<String>> {
        let value = conn
            .query_row(
                &format!(
                    "SELECT config_value FROM {} WHERE config_name = ?1",
                    quote_ident(&self.table)
                ),
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Insert the value unless the key is already present
    pub fn add(&self, conn: &Connection, name: &str, value: &str) -> Result<()> {
        if self.get(conn, name)?.is_none() {
            self.set(conn, name, value)?;
        }
        Ok(())
    }

    /// Insert or overwrite the value
    pub fn set(&self, conn: &Connection, name: &str, value: &str) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} (config_name, config_value) VALUES (?1, ?2)
                 ON CONFLICT(config_name) DO UPDATE SET config_value = excluded.config_value",
                quote_ident(&self.table)
            ),
            params![name, value],
        )?;
        Ok(())
    }

    pub fn remove(&self, conn: &Connection, name: &str) -> Result<()> {
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE config_name = ?1",
                quote_ident(&self.table)
            ),
            [name],
        )?;
        Ok(())
    }
}
