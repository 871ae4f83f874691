// src/db/schema.rs

//! Board tables the migration tools operate on
//!
//! These are the collaborator tables a fresh board database needs before any
//! migration runs: configuration, the ACP module tree and the permission
//! system. They are described as a [`SchemaDelta`] so they go through the
//! same schema tool as migrations do.

use crate::config::TableNames;
use crate::migration::delta::{ColumnDef, ColumnKind, SchemaDelta, TableDef};

/// Delta creating every collaborator table
pub fn core_schema(tables: &TableNames) -> SchemaDelta {
    SchemaDelta::new()
        .add_table(&tables.config, config_table())
        .add_table(&tables.config_text, config_text_table())
        .add_table(&tables.modules, modules_table())
        .add_table(&tables.acl_options, acl_options_table())
        .add_table(&tables.acl_roles, acl_roles_table())
        .add_table(&tables.acl_roles_data, acl_roles_data_table())
        .add_table(&tables.acl_groups, acl_grants_table("group_id"))
        .add_table(&tables.acl_users, acl_grants_table("user_id"))
        .add_table(&tables.groups, groups_table())
}

fn config_table() -> TableDef {
    TableDef::new()
        .column("config_name", ColumnDef::new(ColumnKind::VChar, ""))
        .column("config_value", ColumnDef::new(ColumnKind::VCharUni, ""))
        .column("is_dynamic", ColumnDef::new(ColumnKind::Bool, 0))
        .primary_key(["config_name"])
        .index("is_dynamic", ["is_dynamic"])
}

fn config_text_table() -> TableDef {
    TableDef::new()
        .column("config_name", ColumnDef::new(ColumnKind::VChar, ""))
        .column("config_value", ColumnDef::new(ColumnKind::MTextUni, ""))
        .primary_key(["config_name"])
}

fn modules_table() -> TableDef {
    TableDef::new()
        .column("module_id", ColumnDef::new(ColumnKind::UInt, 0).auto_increment())
        .column("module_enabled", ColumnDef::new(ColumnKind::Bool, 1))
        .column("module_display", ColumnDef::new(ColumnKind::Bool, 1))
        .column("module_basename", ColumnDef::new(ColumnKind::VChar, ""))
        .column("module_class", ColumnDef::new(ColumnKind::VChar, "").sized(10))
        .column("parent_id", ColumnDef::new(ColumnKind::UInt, 0))
        .column("left_id", ColumnDef::new(ColumnKind::UInt, 0))
        .column("right_id", ColumnDef::new(ColumnKind::UInt, 0))
        .column("module_langname", ColumnDef::new(ColumnKind::VChar, ""))
        .column("module_mode", ColumnDef::new(ColumnKind::VChar, ""))
        .column("module_auth", ColumnDef::new(ColumnKind::VChar, ""))
        .primary_key(["module_id"])
        .index("left_right_id", ["left_id", "right_id"])
        .index("module_enabled", ["module_enabled"])
        .index("class_left_id", ["module_class", "left_id"])
}

fn acl_options_table() -> TableDef {
    TableDef::new()
        .column("auth_option_id", ColumnDef::new(ColumnKind::UInt, 0).auto_increment())
        .column("auth_option", ColumnDef::new(ColumnKind::VChar, "").sized(50))
        .column("is_global", ColumnDef::new(ColumnKind::Bool, 0))
        .column("is_local", ColumnDef::new(ColumnKind::Bool, 0))
        .column("founder_only", ColumnDef::new(ColumnKind::Bool, 0))
        .primary_key(["auth_option_id"])
        .unique("auth_option", ["auth_option"])
}

fn acl_roles_table() -> TableDef {
    TableDef::new()
        .column("role_id", ColumnDef::new(ColumnKind::UInt, 0).auto_increment())
        .column("role_name", ColumnDef::new(ColumnKind::VCharUni, ""))
        .column("role_description", ColumnDef::new(ColumnKind::TextUni, ""))
        .column("role_type", ColumnDef::new(ColumnKind::VChar, "").sized(10))
        .column("role_order", ColumnDef::new(ColumnKind::USmallInt, 0))
        .primary_key(["role_id"])
        .index("role_type", ["role_type"])
        .index("role_order", ["role_order"])
}

fn acl_roles_data_table() -> TableDef {
    TableDef::new()
        .column("role_id", ColumnDef::new(ColumnKind::UInt, 0))
        .column("auth_option_id", ColumnDef::new(ColumnKind::UInt, 0))
        .column("auth_setting", ColumnDef::new(ColumnKind::TinyInt, 0))
        .primary_key(["role_id", "auth_option_id"])
        .index("ath_op_id", ["auth_option_id"])
}

/// Grant table shared by groups and users; only the owner column differs
fn acl_grants_table(owner: &str) -> TableDef {
    TableDef::new()
        .column(owner, ColumnDef::new(ColumnKind::UInt, 0))
        .column("forum_id", ColumnDef::new(ColumnKind::UInt, 0))
        .column("auth_option_id", ColumnDef::new(ColumnKind::UInt, 0))
        .column("auth_role_id", ColumnDef::new(ColumnKind::UInt, 0))
        .column("auth_setting", ColumnDef::new(ColumnKind::TinyInt, 0))
        .index(owner, [owner])
        .index("auth_opt_id", ["auth_option_id"])
        .index("auth_role_id", ["auth_role_id"])
}

fn groups_table() -> TableDef {
    TableDef::new()
        .column("group_id", ColumnDef::new(ColumnKind::UInt, 0).auto_increment())
        .column("group_type", ColumnDef::new(ColumnKind::TinyInt, 1))
        .column("group_name", ColumnDef::new(ColumnKind::VCharCi, ""))
        .column("group_desc", ColumnDef::new(ColumnKind::TextUni, ""))
        .primary_key(["group_id"])
        .index("group_name", ["group_name"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_schema_uses_prefixed_names() {
        let delta = core_schema(&TableNames::with_prefix("forum_"));
        assert_eq!(delta.add_tables.len(), 9);
        assert!(delta.add_tables.contains_key("forum_acl_users"));

        let users = &delta.add_tables["forum_acl_users"];
        assert!(users.has_column("user_id"));
        assert!(!users.has_column("group_id"));
        assert!(users.primary_key.is_empty());
    }

    #[test]
    fn test_core_schema_only_adds() {
        let delta = core_schema(&TableNames::default());
        let inverse = delta.inverse().unwrap();
        assert_eq!(inverse.drop_tables.len(), 9);
    }
}
