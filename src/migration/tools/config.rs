// src/migration/tools/config.rs

//! Config tool: board key/value settings
//!
//! `add` only inserts absent keys and `remove` only deletes present ones,
//! so both are safe to repeat. `update` and `update_if_equals` require the
//! key to exist.

use crate::error::{Error, Result};
use crate::migration::step::StepValue;
use crate::migration::tools::schema::quote_ident;
use rusqlite::{Connection, OptionalExtension, params};
use strum_macros::IntoStaticStr;
use tracing::debug;

/// A call into the config tool
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ConfigCall {
    Add {
        name: String,
        value: String,
        dynamic: bool,
    },
    Remove {
        name: String,
        /// Value to restore when this removal is reversed
        value: Option<String>,
    },
    Update {
        name: String,
        value: String,
        /// Value to restore when this update is reversed
        previous: Option<String>,
    },
    UpdateIfEquals {
        comparison: String,
        name: String,
        value: String,
    },
}

impl ConfigCall {
    pub fn add(name: impl Into<String>, value: impl Into<String>) -> Self {
        ConfigCall::Add {
            name: name.into(),
            value: value.into(),
            dynamic: false,
        }
    }

    /// Add a value that changes often and should not be cached
    pub fn add_dynamic(name: impl Into<String>, value: impl Into<String>) -> Self {
        ConfigCall::Add {
            name: name.into(),
            value: value.into(),
            dynamic: true,
        }
    }

    pub fn remove(name: impl Into<String>) -> Self {
        ConfigCall::Remove {
            name: name.into(),
            value: None,
        }
    }

    pub fn update(name: impl Into<String>, value: impl Into<String>) -> Self {
        ConfigCall::Update {
            name: name.into(),
            value: value.into(),
            previous: None,
        }
    }

    /// Update that restores `previous` when reversed
    pub fn update_from(
        name: impl Into<String>,
        previous: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        ConfigCall::Update {
            name: name.into(),
            value: value.into(),
            previous: Some(previous.into()),
        }
    }

    pub fn update_if_equals(
        comparison: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        ConfigCall::UpdateIfEquals {
            comparison: comparison.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn method(&self) -> &'static str {
        self.into()
    }

    /// The call undoing this one, if there is one
    pub fn reversed(&self) -> Option<ConfigCall> {
        match self {
            ConfigCall::Add { name, value, .. } => Some(ConfigCall::Remove {
                name: name.clone(),
                value: Some(value.clone()),
            }),
            ConfigCall::Remove { name, value } => Some(ConfigCall::Add {
                name: name.clone(),
                value: value.clone().unwrap_or_default(),
                dynamic: false,
            }),
            ConfigCall::Update {
                name,
                value,
                previous: Some(previous),
            } => Some(ConfigCall::Update {
                name: name.clone(),
                value: previous.clone(),
                previous: Some(value.clone()),
            }),
            ConfigCall::Update { previous: None, .. } => None,
            ConfigCall::UpdateIfEquals {
                comparison,
                name,
                value,
            } => Some(ConfigCall::UpdateIfEquals {
                comparison: value.clone(),
                name: name.clone(),
                value: comparison.clone(),
            }),
        }
    }
}

/// Reads and writes the config table
#[derive(Debug, Clone)]
pub struct ConfigTool {
    table: String,
}

impl ConfigTool {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn call(&self, conn: &Connection, call: &ConfigCall) -> Result<StepValue> {
        match call {
            ConfigCall::Add {
                name,
                value,
                dynamic,
            } => self.add(conn, name, value, *dynamic)?,
            ConfigCall::Remove { name, .. } => self.remove(conn, name)?,
            ConfigCall::Update { name, value, .. } => self.update(conn, name, value)?,
            ConfigCall::UpdateIfEquals {
                comparison,
                name,
                value,
            } => {
                let updated = self.update_if_equals(conn, comparison, name, value)?;
                return Ok(StepValue::Bool(updated));
            }
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

    pub fn add(&self, conn: &Connection, name: &str, value: &str, dynamic: bool) -> Result<()> {
        if self.get(conn, name)?.is_some() {
            debug!("Config {} already present, leaving it unchanged", name);
            return Ok(());
        }
        conn.execute(
            &format!(
                "INSERT INTO {} (config_name, config_value, is_dynamic) VALUES (?1, ?2, ?3)",
                quote_ident(&self.table)
            ),
            params![name, value, dynamic],
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

    pub fn update(&self, conn: &Connection, name: &str, value: &str) -> Result<()> {
        if self.get(conn, name)?.is_none() {
            return Err(Error::ConfigNotExist(name.to_string()));
        }
        conn.execute(
            &format!(
                "UPDATE {} SET config_value = ?2 WHERE config_name = ?1",
                quote_ident(&self.table)
            ),
            params![name, value],
        )?;
        Ok(())
    }

    /// Set `name` to `value` only when it currently equals `comparison`
    ///
    /// Returns whether the value was changed.
    pub fn update_if_equals(
        &self,
        conn: &Connection,
        comparison: &str,
        name: &str,
        value: &str,
    ) -> Result<bool> {
        if self.get(conn, name)?.is_none() {
            return Err(Error::ConfigNotExist(name.to_string()));
        }
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET config_value = ?3 WHERE config_name = ?1 AND config_value = ?2",
                quote_ident(&self.table)
            ),
            params![name, comparison, value],
        )?;
        Ok(changed > 0)
    }
}
