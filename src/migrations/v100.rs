// src/migrations/v100.rs

//! Initial board install: the users table and the default board data

use crate::config::TableNames;
use crate::error::Result;
use crate::migration::step::{Condition, DataStep, StepValue};
use crate::migration::tools::{
    ConfigCall, ConfigTextCall, ModuleCall, ModuleData, ParentRef, PermissionCall,
    PermissionTarget, SchemaTool, quote_ident,
};
use crate::migration::{ColumnDef, ColumnKind, Migration, MigrationContext, SchemaDelta, TableDef};
use rusqlite::{OptionalExtension, params};

/// Groups every board starts with, as (name, type)
const DEFAULT_GROUPS: &[(&str, i64)] = &[("ADMINISTRATORS", 3), ("REGISTERED", 3)];

/// Creates the users table
#[derive(Debug, Clone)]
pub struct InstallSchema {
    tables: TableNames,
}

impl InstallSchema {
    pub fn new(tables: TableNames) -> Self {
        Self { tables }
    }
}

impl Migration for InstallSchema {
    fn name(&self) -> &str {
        "core::v100::install_schema"
    }

    /// Boards created before migrations were tracked already have users
    fn effectively_installed(&self, ctx: &MigrationContext<'_>) -> Result<bool> {
        Ok(SchemaTool::new(ctx.conn)?.table_exists(&self.tables.users))
    }

    fn update_schema(&self) -> SchemaDelta {
        SchemaDelta::new().add_table(
            &self.tables.users,
            TableDef::new()
                .column("user_id", ColumnDef::new(ColumnKind::UInt, 0).auto_increment())
                .column("user_type", ColumnDef::new(ColumnKind::TinyInt, 0))
                .column("group_id", ColumnDef::new(ColumnKind::UInt, 3))
                .column("username", ColumnDef::new(ColumnKind::VCharCi, ""))
                .column("user_email", ColumnDef::new(ColumnKind::VCharUni, "").sized(100))
                .column("user_regdate", ColumnDef::new(ColumnKind::Timestamp, 0))
                .column("user_posts", ColumnDef::new(ColumnKind::UInt, 0))
                .primary_key(["user_id"])
                .index("user_type", ["user_type"]),
        )
    }
}

/// Default configuration, ACP modules, groups and permissions
#[derive(Debug, Clone)]
pub struct InstallData {
    tables: TableNames,
}

impl InstallData {
    pub fn new(tables: TableNames) -> Self {
        Self { tables }
    }
}

impl Migration for InstallData {
    fn name(&self) -> &str {
        "core::v100::install_data"
    }

    fn depends_on(&self) -> Vec<String> {
        vec!["core::v100::install_schema".to_string()]
    }

    fn update_data(&self) -> Vec<DataStep> {
        vec![
            ConfigCall::add("board_name", "yourdomain.com").into(),
            ConfigCall::add("board_disable", "0").into(),
            ConfigCall::add("version", "1.0.0").into(),
            ConfigCall::add_dynamic("num_users", "0").into(),
            ConfigTextCall::add("contact_info", "").into(),
            DataStep::custom("add_default_groups", |ctx, _, _| {
                add_default_groups(ctx)?;
                Ok(StepValue::Unit)
            }),
            ModuleCall::add("acp", ParentRef::Root, ModuleData::new("ACP_CAT_GENERAL")).into(),
            ModuleCall::add("acp", "ACP_CAT_GENERAL", ModuleData::new("ACP_BOARD_CONFIGURATION")).into(),
            ModuleCall::add(
                "acp",
                "ACP_BOARD_CONFIGURATION",
                ModuleData::new("ACP_BOARD_SETTINGS")
                    .basename("acp_board")
                    .mode("settings")
                    .auth("acl_a_board"),
            )
            .into(),
            ModuleCall::add(
                "acp",
                "ACP_BOARD_CONFIGURATION",
                ModuleData::new("ACP_CONTACT_SETTINGS")
                    .basename("acp_contact")
                    .mode("contact")
                    .auth("acl_a_board")
                    .after("ACP_BOARD_SETTINGS"),
            )
            .into(),
            PermissionCall::add("a_board", true).into(),
            PermissionCall::add("a_user", true).into(),
            PermissionCall::add("u_sendpm", true).into(),
            PermissionCall::add("f_read", false).into(),
            PermissionCall::role_add("ROLE_ADMIN_STANDARD", "a_", "ROLE_DESCRIPTION_ADMIN_STANDARD").into(),
            PermissionCall::set("ROLE_ADMIN_STANDARD", &["a_board", "a_user"], PermissionTarget::Role).into(),
            PermissionCall::set("REGISTERED", &["u_sendpm"], PermissionTarget::Group).into(),
            // Boards upgraded from older layouts may still carry this module
            DataStep::when(
                Condition::step(ModuleCall::exists("acp", "ACP_BOARD_CONFIGURATION", "ACP_BOARD_FEATURES")),
                ModuleCall::remove("acp", "ACP_BOARD_CONFIGURATION", "ACP_BOARD_FEATURES"),
            ),
        ]
    }

    fn revert_data(&self) -> Vec<DataStep> {
        let groups = self.tables.groups.clone();
        vec![DataStep::custom("remove_default_groups", move |ctx, _, _| {
            for (name, _) in DEFAULT_GROUPS {
                ctx.conn.execute(
                    &format!("DELETE FROM {} WHERE group_name = ?1", quote_ident(&groups)),
                    [name],
                )?;
            }
            Ok(StepValue::Unit)
        })]
    }
}

fn add_default_groups(ctx: &MigrationContext<'_>) -> Result<()> {
    let groups = quote_ident(&ctx.tables.groups);
    for (name, group_type) in DEFAULT_GROUPS {
        let existing: Option<i64> = ctx
            .conn
            .query_row(
                &format!("SELECT group_id FROM {groups} WHERE group_name = ?1"),
                [name],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_none() {
            ctx.conn.execute(
                &format!("INSERT INTO {groups} (group_name, group_type) VALUES (?1, ?2)"),
                params![name, group_type],
            )?;
        }
    }
    Ok(())
}
