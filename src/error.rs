// src/error.rs

//! Error types for the migration engine

use std::fmt;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// A schema statement that failed to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedStatement {
    pub sql: String,
    pub error: String,
}

impl fmt::Display for FailedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.sql, self.error)
    }
}

/// Errors raised while planning, applying or reverting migrations
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Checkpoint or dependency list could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Step budget that no duration can represent
    #[error("Invalid step budget: {0} seconds")]
    InvalidBudget(f64),

    /// IO error while reading configuration
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A dependency is neither installed nor loadable
    #[error("Migration {migration} depends on {dependency}, which cannot be fulfilled")]
    UnfulfillableDependency {
        migration: String,
        dependency: String,
    },

    /// Schema generation could not place a dependency
    #[error("Unable to resolve the dependency {0}")]
    UnresolvedDependency(String),

    /// Registered migrations depend on each other in a loop
    #[error("Circular migration dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    /// The same migration name was registered twice
    #[error("Migration {0} is registered more than once")]
    DuplicateMigration(String),

    /// A migration name that no registry entry matches
    #[error("Unknown migration: {0}")]
    UnknownMigration(String),

    /// A step cannot be executed as written
    #[error("Invalid migration step ({reason}): {step}")]
    InvalidStep { reason: String, step: String },

    /// A step names a tool that is not registered with the executor
    #[error("Migration step uses the undefined tool {tool}: {step}")]
    UndefinedTool { tool: String, step: String },

    /// A custom step reported a failure
    #[error("Custom step {step} failed: {reason}")]
    CustomStep { step: String, reason: String },

    /// Config key expected to exist is missing
    #[error("Config key does not exist: {0}")]
    ConfigNotExist(String),

    /// Module (or its parent) is missing
    #[error("Module does not exist: {0}")]
    ModuleNotExist(String),

    /// Module already present under the requested parent
    #[error("Module already exists: {0}")]
    ModuleExists(String),

    /// Only leaf modules may be removed
    #[error("Module {0} still has children and cannot be removed")]
    ModuleHasChildren(i64),

    /// Nested-set bounds violate their invariants
    #[error("Module tree for class {class} is corrupted: {reason}")]
    NestedSetCorrupted { class: String, reason: String },

    /// Permission role is missing
    #[error("Permission role does not exist: {0}")]
    RoleNotExist(String),

    /// User group is missing
    #[error("Group does not exist: {0}")]
    GroupNotExist(String),

    /// Stored migration state breaks its own invariants
    #[error("Corrupt migration state for {migration}: {reason}")]
    CorruptState { migration: String, reason: String },

    /// Unsupported schema change
    #[error("Schema error: {0}")]
    Schema(String),

    /// One or more schema statements failed to execute
    #[error("Schema statements failed: {}", format_failed(.0))]
    SchemaStatements(Vec<FailedStatement>),
}

fn format_failed(failed: &[FailedStatement]) -> String {
    failed
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create an invalid step error
    pub fn invalid_step(reason: impl Into<String>, step: impl fmt::Debug) -> Self {
        Self::InvalidStep {
            reason: reason.into(),
            step: format!("{step:?}"),
        }
    }

    /// Create a custom step failure
    pub fn custom_step(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CustomStep {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Stable message key, suitable for translation tables
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::Database(_) | Self::SchemaStatements(_) => "SQL_ERROR",
            Self::Json(_) | Self::CorruptState { .. } => "MIGRATION_STATE_CORRUPT",
            Self::Config(_) | Self::InvalidBudget(_) | Self::Io(_) => "CONFIG_INVALID",
            Self::UnfulfillableDependency { .. } => "MIGRATION_NOT_FULFILLABLE",
            Self::UnresolvedDependency(_) => "MIGRATION_DEPENDENCY_UNRESOLVED",
            Self::CircularDependency(_) => "MIGRATION_CIRCULAR_DEPENDENCY",
            Self::DuplicateMigration(_) => "MIGRATION_DUPLICATE",
            Self::UnknownMigration(_) => "MIGRATION_NOT_VALID",
            Self::InvalidStep { .. } => "MIGRATION_INVALID_DATA",
            Self::UndefinedTool { .. } => "MIGRATION_INVALID_DATA_UNDEFINED_TOOL",
            Self::CustomStep { .. } => "MIGRATION_CUSTOM_STEP_FAILED",
            Self::ConfigNotExist(_) => "CONFIG_NOT_EXIST",
            Self::ModuleNotExist(_) => "MODULE_NOT_EXIST",
            Self::ModuleExists(_) => "MODULE_EXISTS",
            Self::ModuleHasChildren(_) => "CANNOT_REMOVE_MODULE",
            Self::NestedSetCorrupted { .. } => "MODULE_TREE_CORRUPTED",
            Self::RoleNotExist(_) => "ROLE_NOT_EXIST",
            Self::GroupNotExist(_) => "GROUP_NOT_EXIST",
            Self::Schema(_) => "SCHEMA_CHANGE_INVALID",
        }
    }
}
