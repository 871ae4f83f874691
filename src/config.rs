// src/config.rs

//! Migrator configuration
//!
//! Settings are read from a small TOML file. Every field has a default, so
//! an empty file (or no file at all) yields a working configuration:
//!
//! ```toml
//! table_prefix = "phpbb_"
//! step_budget_secs = 5.0
//! verbosity = "verbose"
//! ```

use crate::error::{Error, Result};
use crate::migration::output::Verbosity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default prefix applied to every board table
pub const DEFAULT_TABLE_PREFIX: &str = "phpbb_";

/// Top-level configuration for the migrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// Prefix prepended to all table names
    pub table_prefix: String,
    /// Override for the migration state table name
    pub migrations_table: Option<String>,
    /// Wall-clock budget for one `run` call, in seconds
    pub step_budget_secs: f64,
    /// Highest verbosity forwarded to the log
    pub verbosity: Verbosity,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            migrations_table: None,
            step_budget_secs: 5.0,
            verbosity: Verbosity::Normal,
        }
    }
}

impl MigratorConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse configuration from TOML text
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.step_budget()?;
        Ok(config)
    }

    /// Resolved table names for this configuration
    pub fn tables(&self) -> TableNames {
        let mut tables = TableNames::with_prefix(&self.table_prefix);
        if let Some(name) = &self.migrations_table {
            tables.migrations = name.clone();
        }
        tables
    }

    /// Budget for a single `run` call
    pub fn step_budget(&self) -> Result<Duration> {
        budget_from_secs(self.step_budget_secs)
    }
}

/// Convert a budget in seconds; negative values mean no time at all
pub fn budget_from_secs(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs.max(0.0)).map_err(|_| Error::InvalidBudget(secs))
}

/// Physical names of every table the engine and its tools touch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub migrations: String,
    pub config: String,
    pub config_text: String,
    pub modules: String,
    pub acl_options: String,
    pub acl_roles: String,
    pub acl_roles_data: String,
    pub acl_groups: String,
    pub acl_users: String,
    pub groups: String,
    pub users: String,
}

impl TableNames {
    pub fn with_prefix(prefix: &str) -> Self {
        let t = |name: &str| format!("{prefix}{name}");
        Self {
            migrations: t("migrations"),
            config: t("config"),
            config_text: t("config_text"),
            modules: t("modules"),
            acl_options: t("acl_options"),
            acl_roles: t("acl_roles"),
            acl_roles_data: t("acl_roles_data"),
            acl_groups: t("acl_groups"),
            acl_users: t("acl_users"),
            groups: t("groups"),
            users: t("users"),
        }
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_TABLE_PREFIX)
    }
}
