// src/migration/tools/permission.rs

//! Permission tool: auth options, roles and their grants
//!
//! Auth options are either global, local (per forum) or both. Roles bundle
//! option settings under a type prefix such as `a_` or `u_`. Groups receive
//! settings directly, or through a role assigned to them.

use crate::config::TableNames;
use crate::error::{Error, Result};
use crate::migration::step::StepValue;
use crate::migration::tools::schema::quote_ident;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::HashSet;
use strum_macros::IntoStaticStr;
use tracing::{debug, info};

/// Who receives the settings of a `permission_set`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionTarget {
    Role,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum PermissionCall {
    Add {
        option: String,
        global: bool,
        /// Copy existing grants of this option onto the new one
        copy_from: Option<String>,
    },
    Remove {
        option: String,
        global: bool,
    },
    Exists {
        option: String,
        global: bool,
    },
    RoleAdd {
        name: String,
        role_type: String,
        description: String,
    },
    RoleRemove {
        name: String,
        /// Role type to recreate the role with when reversed
        role_type: Option<String>,
    },
    RoleUpdate {
        old: String,
        new: String,
    },
    PermissionSet {
        name: String,
        options: Vec<String>,
        target: PermissionTarget,
        has_permission: bool,
    },
    PermissionUnset {
        name: String,
        options: Vec<String>,
        target: PermissionTarget,
    },
}

fn owned(options: &[&str]) -> Vec<String> {
    options.iter().map(|o| o.to_string()).collect()
}

impl PermissionCall {
    pub fn add(option: impl Into<String>, global: bool) -> Self {
        PermissionCall::Add {
            option: option.into(),
            global,
            copy_from: None,
        }
    }

    pub fn add_copy(option: impl Into<String>, global: bool, copy_from: impl Into<String>) -> Self {
        PermissionCall::Add {
            option: option.into(),
            global,
            copy_from: Some(copy_from.into()),
        }
    }

    pub fn remove(option: impl Into<String>, global: bool) -> Self {
        PermissionCall::Remove {
            option: option.into(),
            global,
        }
    }

    pub fn exists(option: impl Into<String>, global: bool) -> Self {
        PermissionCall::Exists {
            option: option.into(),
            global,
        }
    }

    pub fn role_add(name: impl Into<String>, role_type: impl Into<String>, description: impl Into<String>) -> Self {
        PermissionCall::RoleAdd {
            name: name.into(),
            role_type: role_type.into(),
            description: description.into(),
        }
    }

    pub fn role_remove(name: impl Into<String>) -> Self {
        PermissionCall::RoleRemove {
            name: name.into(),
            role_type: None,
        }
    }

    pub fn role_update(old: impl Into<String>, new: impl Into<String>) -> Self {
        PermissionCall::RoleUpdate {
            old: old.into(),
            new: new.into(),
        }
    }

    pub fn set(name: impl Into<String>, options: &[&str], target: PermissionTarget) -> Self {
        PermissionCall::PermissionSet {
            name: name.into(),
            options: owned(options),
            target,
            has_permission: true,
        }
    }

    /// Explicitly deny the options
    pub fn deny(name: impl Into<String>, options: &[&str], target: PermissionTarget) -> Self {
        PermissionCall::PermissionSet {
            name: name.into(),
            options: owned(options),
            target,
            has_permission: false,
        }
    }

    pub fn unset(name: impl Into<String>, options: &[&str], target: PermissionTarget) -> Self {
        PermissionCall::PermissionUnset {
            name: name.into(),
            options: owned(options),
            target,
        }
    }

    pub fn method(&self) -> &'static str {
        self.into()
    }

    pub fn reversed(&self) -> Option<PermissionCall> {
        match self {
            PermissionCall::Add { option, global, .. } => Some(PermissionCall::Remove {
                option: option.clone(),
                global: *global,
            }),
            PermissionCall::Remove { option, global } => Some(PermissionCall::Add {
                option: option.clone(),
                global: *global,
                copy_from: None,
            }),
            PermissionCall::Exists { .. } => None,
            PermissionCall::RoleAdd {
                name, role_type, ..
            } => Some(PermissionCall::RoleRemove {
                name: name.clone(),
                role_type: Some(role_type.clone()),
            }),
            PermissionCall::RoleRemove { name, role_type } => {
                role_type.as_ref().map(|role_type| PermissionCall::RoleAdd {
                    name: name.clone(),
                    role_type: role_type.clone(),
                    description: String::new(),
                })
            }
            PermissionCall::RoleUpdate { old, new } => Some(PermissionCall::RoleUpdate {
                old: new.clone(),
                new: old.clone(),
            }),
            PermissionCall::PermissionSet {
                name,
                options,
                target,
                ..
            } => Some(PermissionCall::PermissionUnset {
                name: name.clone(),
                options: options.clone(),
                target: *target,
            }),
            PermissionCall::PermissionUnset {
                name,
                options,
                target,
            } => Some(PermissionCall::PermissionSet {
                name: name.clone(),
                options: options.clone(),
                target: *target,
                has_permission: true,
            }),
        }
    }
}

/// Reads and edits the ACL tables
#[derive(Debug, Clone)]
pub struct PermissionTool {
    tables: TableNames,
}

impl PermissionTool {
    pub fn new(tables: TableNames) -> Self {
        Self { tables }
    }

    pub fn call(&self, conn: &Connection, call: &PermissionCall) -> Result<StepValue> {
        match call {
            PermissionCall::Add {
                option,
                global,
                copy_from,
            } => self.add(conn, option, *global, copy_from.as_deref())?,
            PermissionCall::Remove { option, global } => self.remove(conn, option, *global)?,
            PermissionCall::Exists { option, global } => {
                return Ok(StepValue::Bool(self.exists(conn, option, *global)?));
            }
            PermissionCall::RoleAdd {
                name,
                role_type,
                description,
            } => self.role_add(conn, name, role_type, description)?,
            PermissionCall::RoleRemove { name, .. } => self.role_remove(conn, name)?,
            PermissionCall::RoleUpdate { old, new } => self.role_update(conn, old, new)?,
            PermissionCall::PermissionSet {
                name,
                options,
                target,
                has_permission,
            } => self.permission_set(conn, name, options, *target, *has_permission)?,
            PermissionCall::PermissionUnset {
                name,
                options,
                target,
            } => self.permission_unset(conn, name, options, *target)?,
        }
        Ok(StepValue::Unit)
    }

    fn scope_column(global: bool) -> &'static str {
        if global { "is_global" } else { "is_local" }
    }

    /// Whether the option exists with the given scope
    pub fn exists(&self, conn: &Connection, option: &str, global: bool) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                &format!(
                    "SELECT auth_option_id FROM {} WHERE auth_option = ?1 AND {} = 1",
                    quote_ident(&self.tables.acl_options),
                    Self::scope_column(global)
                ),
                [option],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn option_id(&self, conn: &Connection, option: &str) -> Result<Option<i64>> {
        let id = conn
            .query_row(
                &format!(
                    "SELECT auth_option_id FROM {} WHERE auth_option = ?1",
                    quote_ident(&self.tables.acl_options)
                ),
                [option],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn option_ids(&self, conn: &Connection, options: &[String]) -> Result<Vec<(i64, String)>> {
        if options.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; options.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT auth_option_id, auth_option FROM {} WHERE auth_option IN ({placeholders})",
            quote_ident(&self.tables.acl_options)
        ))?;
        let rows = stmt
            .query_map(params_from_iter(options.iter()), |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn role(&self, conn: &Connection, name: &str) -> Result<Option<(i64, String)>> {
        let role = conn
            .query_row(
                &format!(
                    "SELECT role_id, role_type FROM {} WHERE role_name = ?1",
                    quote_ident(&self.tables.acl_roles)
                ),
                [name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(role)
    }

    /// Add an auth option, or widen an existing one to the other scope
    pub fn add(&self, conn: &Connection, option: &str, global: bool, copy_from: Option<&str>) -> Result<()> {
        if self.exists(conn, option, global)? {
            debug!("Permission {} already exists", option);
            return Ok(());
        }

        let options = quote_ident(&self.tables.acl_options);
        if self.exists(conn, option, !global)? {
            conn.execute(
                &format!("UPDATE {options} SET is_global = 1, is_local = 1 WHERE auth_option = ?1"),
                [option],
            )?;
        } else {
            conn.execute(
                &format!(
                    "INSERT INTO {options} (auth_option, is_global, is_local) VALUES (?1, ?2, ?3)"
                ),
                params![option, global, !global],
            )?;
        }

        if let Some(source) = copy_from {
            self.copy_grants(conn, source, option)?;
        }
        info!("Added permission {}", option);
        Ok(())
    }

    fn copy_grants(&self, conn: &Connection, source: &str, target: &str) -> Result<()> {
        let (Some(old_id), Some(new_id)) = (self.option_id(conn, source)?, self.option_id(conn, target)?)
        else {
            debug!("Permission {} not found, nothing to copy", source);
            return Ok(());
        };

        let copies = [
            (
                &self.tables.acl_groups,
                "group_id, forum_id, auth_option_id, auth_role_id, auth_setting",
                "group_id, forum_id, ?2, auth_role_id, auth_setting",
            ),
            (
                &self.tables.acl_roles_data,
                "role_id, auth_option_id, auth_setting",
                "role_id, ?2, auth_setting",
            ),
            (
                &self.tables.acl_users,
                "user_id, forum_id, auth_option_id, auth_role_id, auth_setting",
                "user_id, forum_id, ?2, auth_role_id, auth_setting",
            ),
        ];
        for (table, columns, select) in copies {
            conn.execute(
                &format!(
                    "INSERT INTO {table} ({columns}) SELECT {select} FROM {table} WHERE auth_option_id = ?1",
                    table = quote_ident(table)
                ),
                params![old_id, new_id],
            )?;
        }
        Ok(())
    }

    /// Remove an auth option from one scope, dropping it entirely when
    /// that was its only scope
    pub fn remove(&self, conn: &Connection, option: &str, global: bool) -> Result<()> {
        if !self.exists(conn, option, global)? {
            return Ok(());
        }

        let options = quote_ident(&self.tables.acl_options);
        let (id, is_global, is_local): (i64, bool, bool) = conn.query_row(
            &format!("SELECT auth_option_id, is_global, is_local FROM {options} WHERE auth_option = ?1"),
            [option],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        if is_global && is_local {
            conn.execute(
                &format!(
                    "UPDATE {options} SET {} = 0 WHERE auth_option_id = ?1",
                    Self::scope_column(global)
                ),
                [id],
            )?;
        } else {
            for table in [
                &self.tables.acl_groups,
                &self.tables.acl_roles_data,
                &self.tables.acl_users,
                &self.tables.acl_options,
            ] {
                conn.execute(
                    &format!("DELETE FROM {} WHERE auth_option_id = ?1", quote_ident(table)),
                    [id],
                )?;
            }
        }
        info!("Removed permission {}", option);
        Ok(())
    }

    /// Add a role at the end of its type's ordering
    pub fn role_add(&self, conn: &Connection, name: &str, role_type: &str, description: &str) -> Result<()> {
        if self.role(conn, name)?.is_some() {
            return Ok(());
        }

        let roles = quote_ident(&self.tables.acl_roles);
        let max_order: Option<i64> = conn.query_row(
            &format!("SELECT MAX(role_order) FROM {roles} WHERE role_type = ?1"),
            [role_type],
            |row| row.get(0),
        )?;
        conn.execute(
            &format!(
                "INSERT INTO {roles} (role_name, role_type, role_description, role_order)
                 VALUES (?1, ?2, ?3, ?4)"
            ),
            params![name, role_type, description, max_order.unwrap_or(0) + 1],
        )?;
        Ok(())
    }

    pub fn role_remove(&self, conn: &Connection, name: &str) -> Result<()> {
        let Some((role_id, _)) = self.role(conn, name)? else {
            return Ok(());
        };
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE role_id = ?1",
                quote_ident(&self.tables.acl_roles_data)
            ),
            [role_id],
        )?;
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE role_id = ?1",
                quote_ident(&self.tables.acl_roles)
            ),
            [role_id],
        )?;
        Ok(())
    }

    pub fn role_update(&self, conn: &Connection, old: &str, new: &str) -> Result<()> {
        let Some((role_id, _)) = self.role(conn, old)? else {
            return Err(Error::RoleNotExist(old.to_string()));
        };
        conn.execute(
            &format!(
                "UPDATE {} SET role_name = ?2 WHERE role_id = ?1",
                quote_ident(&self.tables.acl_roles)
            ),
            params![role_id, new],
        )?;
        Ok(())
    }

    fn group_id(&self, conn: &Connection, name: &str) -> Result<i64> {
        conn.query_row(
            &format!(
                "SELECT group_id FROM {} WHERE group_name = ?1",
                quote_ident(&self.tables.groups)
            ),
            [name],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| Error::GroupNotExist(name.to_string()))
    }

    /// Role assigned to a group at board level, if any
    fn group_role(&self, conn: &Connection, group_id: i64) -> Result<Option<(String, String)>> {
        let role = conn
            .query_row(
                &format!(
                    "SELECT r.role_name, r.role_type FROM {} g
                     JOIN {} r ON r.role_id = g.auth_role_id
                     WHERE g.group_id = ?1 AND g.auth_role_id <> 0 AND g.forum_id = 0
                     LIMIT 1",
                    quote_ident(&self.tables.acl_groups),
                    quote_ident(&self.tables.acl_roles)
                ),
                [group_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(role)
    }

    /// Grant (or deny) options to a role or group
    ///
    /// A group holding a role gets the matching options through that role.
    pub fn permission_set(
        &self,
        conn: &Connection,
        name: &str,
        options: &[String],
        target: PermissionTarget,
        has_permission: bool,
    ) -> Result<()> {
        let ids = self.option_ids(conn, options)?;
        if ids.is_empty() {
            return Ok(());
        }
        let setting = i64::from(has_permission);

        match target {
            PermissionTarget::Role => {
                let (role_id, _) = self
                    .role(conn, name)?
                    .ok_or_else(|| Error::RoleNotExist(name.to_string()))?;
                let roles_data = quote_ident(&self.tables.acl_roles_data);
                let current = self.current_options(
                    conn,
                    &format!("SELECT auth_option_id FROM {roles_data} WHERE role_id = ?1"),
                    role_id,
                )?;
                for (option_id, _) in ids.iter().filter(|(id, _)| !current.contains(id)) {
                    conn.execute(
                        &format!(
                            "INSERT INTO {roles_data} (role_id, auth_option_id, auth_setting)
                             VALUES (?1, ?2, ?3)"
                        ),
                        params![role_id, option_id, setting],
                    )?;
                }
            }
            PermissionTarget::Group => {
                let group_id = self.group_id(conn, name)?;
                if let Some((role_name, role_type)) = self.group_role(conn, group_id)? {
                    let matching: Vec<String> = ids
                        .iter()
                        .filter(|(_, option)| option.starts_with(&role_type))
                        .map(|(_, option)| option.clone())
                        .collect();
                    if !matching.is_empty() {
                        return self.permission_set(
                            conn,
                            &role_name,
                            &matching,
                            PermissionTarget::Role,
                            has_permission,
                        );
                    }
                }

                let groups = quote_ident(&self.tables.acl_groups);
                let current = self.current_options(
                    conn,
                    &format!("SELECT auth_option_id FROM {groups} WHERE group_id = ?1"),
                    group_id,
                )?;
                for (option_id, _) in ids.iter().filter(|(id, _)| !current.contains(id)) {
                    conn.execute(
                        &format!(
                            "INSERT INTO {groups} (group_id, forum_id, auth_option_id, auth_role_id, auth_setting)
                             VALUES (?1, 0, ?2, 0, ?3)"
                        ),
                        params![group_id, option_id, setting],
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Withdraw options from a role or group
    pub fn permission_unset(
        &self,
        conn: &Connection,
        name: &str,
        options: &[String],
        target: PermissionTarget,
    ) -> Result<()> {
        let ids = self.option_ids(conn, options)?;
        if ids.is_empty() {
            return Ok(());
        }

        let (table, owner_column, owner_id) = match target {
            PermissionTarget::Role => {
                let (role_id, _) = self
                    .role(conn, name)?
                    .ok_or_else(|| Error::RoleNotExist(name.to_string()))?;
                (&self.tables.acl_roles_data, "role_id", role_id)
            }
            PermissionTarget::Group => {
                let group_id = self.group_id(conn, name)?;
                if let Some((role_name, _)) = self.group_role(conn, group_id)? {
                    return self.permission_unset(conn, &role_name, options, PermissionTarget::Role);
                }
                (&self.tables.acl_groups, "group_id", group_id)
            }
        };

        for (option_id, _) in ids {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE {owner_column} = ?1 AND auth_option_id = ?2",
                    quote_ident(table)
                ),
                params![owner_id, option_id],
            )?;
        }
        Ok(())
    }

    fn current_options(&self, conn: &Connection, sql: &str, owner: i64) -> Result<HashSet<i64>> {
        let mut stmt = conn.prepare(sql)?;
        let ids = stmt
            .query_map([owner], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<i64>>>()?;
        Ok(ids)
    }
}
