// src/migration/tools/mod.rs

//! Migration tools
//!
//! Each tool owns one database-backed concern and understands one family of
//! [`ToolCall`]s. The [`ToolRegistry`] maps tool names to tool objects and is
//! handed to the migrator once at startup. A data step naming a tool that
//! was never registered fails when it runs, not when it is declared.

mod config;
mod config_text;
mod module;
mod nested_set;
mod permission;
mod schema;

pub use config::{ConfigCall, ConfigTool};
pub use config_text::{ConfigTextCall, ConfigTextTool};
pub use module::{
    ModuleCall, ModuleData, ModuleRef, ModuleRow, ModuleTool, ParentRef, Placement, SiblingRef,
};
pub use nested_set::{NestedSet, TreeNode, TreeUpdate};
pub use permission::{PermissionCall, PermissionTarget, PermissionTool};
pub use schema::{
    LiveColumn, LiveIndex, LiveSchema, LiveTable, SchemaOutcome, SchemaTool, index_name,
    quote_ident,
};

use crate::config::TableNames;
use crate::error::{Error, Result};
use crate::migration::delta::SchemaDelta;
use crate::migration::step::StepValue;
use rusqlite::Connection;
use std::collections::HashMap;
use tracing::debug;

/// A typed call into one of the tools
#[derive(Debug, Clone)]
pub enum ToolCall {
    Schema(SchemaDelta),
    Config(ConfigCall),
    ConfigText(ConfigTextCall),
    Module(ModuleCall),
    Permission(PermissionCall),
}

impl ToolCall {
    /// Registry name of the tool handling this call
    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolCall::Schema(_) => "schema",
            ToolCall::Config(_) => "config",
            ToolCall::ConfigText(_) => "config_text",
            ToolCall::Module(_) => "module",
            ToolCall::Permission(_) => "permission",
        }
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            ToolCall::Schema(_) => "perform_schema_changes",
            ToolCall::Config(call) => call.method(),
            ToolCall::ConfigText(call) => call.method(),
            ToolCall::Module(call) => call.method(),
            ToolCall::Permission(call) => call.method(),
        }
    }

    /// The call undoing this one; `None` when there is nothing to undo
    pub fn reversed(&self) -> Option<ToolCall> {
        match self {
            ToolCall::Schema(delta) => delta.inverse().map(ToolCall::Schema),
            ToolCall::Config(call) => call.reversed().map(ToolCall::Config),
            ToolCall::ConfigText(call) => call.reversed().map(ToolCall::ConfigText),
            ToolCall::Module(call) => call.reversed().map(ToolCall::Module),
            ToolCall::Permission(call) => call.reversed().map(ToolCall::Permission),
        }
    }
}

/// A tool that can be registered with the migrator
pub trait MigrationTool: Send + Sync {
    /// Registry name, matching [`ToolCall::tool_name`]
    fn name(&self) -> &'static str;

    /// Execute a call addressed to this tool
    fn execute(&self, conn: &Connection, call: &ToolCall) -> Result<StepValue>;
}

fn misrouted(tool: &'static str, call: &ToolCall) -> Error {
    Error::invalid_step(format!("call routed to the {tool} tool"), call)
}

impl MigrationTool for ConfigTool {
    fn name(&self) -> &'static str {
        "config"
    }

    fn execute(&self, conn: &Connection, call: &ToolCall) -> Result<StepValue> {
        match call {
            ToolCall::Config(call) => self.call(conn, call),
            other => Err(misrouted(self.name(), other)),
        }
    }
}

impl MigrationTool for ConfigTextTool {
    fn name(&self) -> &'static str {
        "config_text"
    }

    fn execute(&self, conn: &Connection, call: &ToolCall) -> Result<StepValue> {
        match call {
            ToolCall::ConfigText(call) => self.call(conn, call),
            other => Err(misrouted(self.name(), other)),
        }
    }
}

impl MigrationTool for ModuleTool {
    fn name(&self) -> &'static str {
        "module"
    }

    fn execute(&self, conn: &Connection, call: &ToolCall) -> Result<StepValue> {
        match call {
            ToolCall::Module(call) => self.call(conn, call),
            other => Err(misrouted(self.name(), other)),
        }
    }
}

impl MigrationTool for PermissionTool {
    fn name(&self) -> &'static str {
        "permission"
    }

    fn execute(&self, conn: &Connection, call: &ToolCall) -> Result<StepValue> {
        match call {
            ToolCall::Permission(call) => self.call(conn, call),
            other => Err(misrouted(self.name(), other)),
        }
    }
}

/// Name-keyed set of tools available to data steps
///
/// Schema deltas are always executable; every other tool must be
/// registered.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Box<dyn MigrationTool>>,
}

impl ToolRegistry {
    /// Registry with no tools besides schema changes
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the config, config_text, module and permission tools
    /// bound to the given tables
    pub fn with_defaults(tables: &TableNames) -> Self {
        let mut registry = Self::new();
        registry.register(ConfigTool::new(tables.config.clone()));
        registry.register(ConfigTextTool::new(tables.config_text.clone()));
        registry.register(ModuleTool::new(tables.modules.clone()));
        registry.register(PermissionTool::new(tables.clone()));
        registry
    }

    /// Add a tool, replacing any tool registered under the same name
    pub fn register(&mut self, tool: impl MigrationTool + 'static) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    pub fn contains(&self, name: &str) -> bool {
        name == "schema" || self.tools.contains_key(name)
    }

    pub fn call(&self, conn: &Connection, call: &ToolCall) -> Result<StepValue> {
        debug!("Tool call {}.{}", call.tool_name(), call.method_name());
        if let ToolCall::Schema(delta) = call {
            SchemaTool::new(conn)?.apply(delta)?;
            return Ok(StepValue::Unit);
        }

        let tool = self
            .tools
            .get(call.tool_name())
            .ok_or_else(|| Error::UndefinedTool {
                tool: call.tool_name().to_string(),
                step: format!("{call:?}"),
            })?;
        tool.execute(conn, call)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::delta::{ColumnDef, ColumnKind, TableDef};

    #[test]
    fn test_unregistered_tool_is_reported() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = ToolRegistry::new();
        let err = registry
            .call(&conn, &ToolCall::Config(ConfigCall::add("a", "1")))
            .unwrap_err();
        assert_eq!(err.message_key(), "MIGRATION_INVALID_DATA_UNDEFINED_TOOL");
        assert!(!registry.contains("config"));
        assert!(registry.contains("schema"));
    }

    #[test]
    fn test_schema_calls_need_no_registration() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = ToolRegistry::new();
        let delta = SchemaDelta::new().add_table(
            "topics",
            TableDef::new().column("topic_id", ColumnDef::new(ColumnKind::UInt, 0)),
        );
        assert_eq!(
            registry.call(&conn, &ToolCall::Schema(delta)).unwrap(),
            StepValue::Unit
        );
        assert!(SchemaTool::new(&conn).unwrap().table_exists("topics"));
    }

    #[test]
    fn test_misrouted_call_is_invalid() {
        let conn = Connection::open_in_memory().unwrap();
        let tool = ConfigTool::new("config");
        let err = tool
            .execute(&conn, &ToolCall::ConfigText(ConfigTextCall::remove("a")))
            .unwrap_err();
        assert_eq!(err.message_key(), "MIGRATION_INVALID_DATA");
    }

    #[test]
    fn test_names_and_reverse() {
        let call = ToolCall::Module(ModuleCall::exists("acp", ParentRef::Root, "CAT"));
        assert_eq!(call.tool_name(), "module");
        assert_eq!(call.method_name(), "exists");
        assert!(call.reversed().is_none());

        let call = ToolCall::Config(ConfigCall::add("a", "1"));
        assert_eq!(call.reversed().map(|c| c.method_name()), Some("remove"));

        let registry = ToolRegistry::with_defaults(&TableNames::default());
        assert!(registry.contains("permission"));
        assert!(registry.contains("config_text"));
    }
}
