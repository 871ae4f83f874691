// src/migration/tools/module.rs

//! Module tool: control-panel modules stored as a nested set
//!
//! Modules are grouped by class (e.g. `acp`, `mcp`, `ucp`). A parent may be
//! given by id or by the language name of a category; category names are
//! looked up among the top-level modules of the class and their direct
//! children. A name matching several categories adds the module under each.

use super::nested_set::{NestedSet, TreeNode, TreeUpdate};
use crate::error::{Error, Result};
use crate::migration::step::StepValue;
use crate::migration::tools::schema::quote_ident;
use rusqlite::{Connection, OptionalExtension, params};
use strum_macros::IntoStaticStr;
use tracing::{debug, info};

/// Where a module hangs in the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRef {
    Root,
    Id(i64),
    /// Language name of a top-level or second-level category
    Category(String),
}

impl From<i64> for ParentRef {
    fn from(id: i64) -> Self {
        if id == 0 { ParentRef::Root } else { ParentRef::Id(id) }
    }
}

impl From<&str> for ParentRef {
    fn from(name: &str) -> Self {
        if name.is_empty() {
            ParentRef::Root
        } else {
            ParentRef::Category(name.to_string())
        }
    }
}

/// Sibling used to position a new module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingRef {
    pub langname: String,
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Before(SiblingRef),
    After(SiblingRef),
}

/// Fields of a module row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleData {
    pub langname: String,
    pub basename: String,
    pub mode: String,
    pub auth: String,
    pub enabled: bool,
    pub display: bool,
    pub placement: Option<Placement>,
}

impl ModuleData {
    /// A category or module with only a language name
    pub fn new(langname: impl Into<String>) -> Self {
        Self {
            langname: langname.into(),
            basename: String::new(),
            mode: String::new(),
            auth: String::new(),
            enabled: true,
            display: true,
            placement: None,
        }
    }

    pub fn basename(mut self, basename: impl Into<String>) -> Self {
        self.basename = basename.into();
        self
    }

    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = auth.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.display = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn before(mut self, langname: impl Into<String>) -> Self {
        self.placement = Some(Placement::Before(SiblingRef {
            langname: langname.into(),
            mode: None,
        }));
        self
    }

    pub fn before_mode(mut self, langname: impl Into<String>, mode: impl Into<String>) -> Self {
        self.placement = Some(Placement::Before(SiblingRef {
            langname: langname.into(),
            mode: Some(mode.into()),
        }));
        self
    }

    pub fn after(mut self, langname: impl Into<String>) -> Self {
        self.placement = Some(Placement::After(SiblingRef {
            langname: langname.into(),
            mode: None,
        }));
        self
    }

    pub fn after_mode(mut self, langname: impl Into<String>, mode: impl Into<String>) -> Self {
        self.placement = Some(Placement::After(SiblingRef {
            langname: langname.into(),
            mode: Some(mode.into()),
        }));
        self
    }
}

/// Identifies an existing module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleRef {
    Id(i64),
    Langname(String),
    /// Full data; removal matches on the language name and can be reversed
    Data(ModuleData),
}

impl ModuleRef {
    fn is_root(&self) -> bool {
        match self {
            ModuleRef::Id(id) => *id == 0,
            ModuleRef::Langname(name) => name.is_empty(),
            ModuleRef::Data(data) => data.langname.is_empty(),
        }
    }
}

impl From<&str> for ModuleRef {
    fn from(name: &str) -> Self {
        ModuleRef::Langname(name.to_string())
    }
}

impl From<i64> for ModuleRef {
    fn from(id: i64) -> Self {
        ModuleRef::Id(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ModuleCall {
    Add {
        class: String,
        parent: ParentRef,
        data: ModuleData,
    },
    Remove {
        class: String,
        /// `None` matches the module under any parent
        parent: Option<ParentRef>,
        module: ModuleRef,
    },
    Exists {
        class: String,
        parent: Option<ParentRef>,
        module: ModuleRef,
    },
}

impl ModuleCall {
    pub fn add(class: impl Into<String>, parent: impl Into<ParentRef>, data: ModuleData) -> Self {
        ModuleCall::Add {
            class: class.into(),
            parent: parent.into(),
            data,
        }
    }

    pub fn remove(
        class: impl Into<String>,
        parent: impl Into<ParentRef>,
        module: impl Into<ModuleRef>,
    ) -> Self {
        ModuleCall::Remove {
            class: class.into(),
            parent: Some(parent.into()),
            module: module.into(),
        }
    }

    pub fn exists(
        class: impl Into<String>,
        parent: impl Into<ParentRef>,
        module: impl Into<ModuleRef>,
    ) -> Self {
        ModuleCall::Exists {
            class: class.into(),
            parent: Some(parent.into()),
            module: module.into(),
        }
    }

    pub fn method(&self) -> &'static str {
        self.into()
    }

    pub fn reversed(&self) -> Option<ModuleCall> {
        match self {
            ModuleCall::Add {
                class,
                parent,
                data,
            } => Some(ModuleCall::Remove {
                class: class.clone(),
                parent: Some(parent.clone()),
                module: ModuleRef::Data(data.clone()),
            }),
            ModuleCall::Remove {
                class,
                parent,
                module: ModuleRef::Data(data),
            } => Some(ModuleCall::Add {
                class: class.clone(),
                parent: parent.clone().unwrap_or(ParentRef::Root),
                data: data.clone(),
            }),
            ModuleCall::Remove { .. } | ModuleCall::Exists { .. } => None,
        }
    }
}

/// A row of the modules table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRow {
    pub id: i64,
    pub class: String,
    pub parent_id: i64,
    pub left_id: i64,
    pub right_id: i64,
    pub langname: String,
    pub basename: String,
    pub mode: String,
    pub auth: String,
    pub enabled: bool,
    pub display: bool,
}

impl ModuleRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("module_id")?,
            class: row.get("module_class")?,
            parent_id: row.get("parent_id")?,
            left_id: row.get("left_id")?,
            right_id: row.get("right_id")?,
            langname: row.get("module_langname")?,
            basename: row.get("module_basename")?,
            mode: row.get("module_mode")?,
            auth: row.get("module_auth")?,
            enabled: row.get("module_enabled")?,
            display: row.get("module_display")?,
        })
    }
}

/// Reads and edits the module tree
#[derive(Debug, Clone)]
pub struct ModuleTool {
    table: String,
}

impl ModuleTool {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn call(&self, conn: &Connection, call: &ModuleCall) -> Result<StepValue> {
        match call {
            ModuleCall::Add {
                class,
                parent,
                data,
            } => {
                self.add(conn, class, parent, data)?;
                Ok(StepValue::Unit)
            }
            ModuleCall::Remove {
                class,
                parent,
                module,
            } => {
                self.remove(conn, class, parent.as_ref(), module)?;
                Ok(StepValue::Unit)
            }
            ModuleCall::Exists {
                class,
                parent,
                module,
            } => Ok(StepValue::Bool(
                self.exists(conn, class, parent.as_ref(), module, false)?,
            )),
        }
    }

    /// All modules of a class ordered by left bound
    pub fn list(&self, conn: &Connection, class: &str) -> Result<Vec<ModuleRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE module_class = ?1 ORDER BY left_id",
            quote_ident(&self.table)
        ))?;
        let rows = stmt
            .query_map([class], ModuleRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Load the nested set of a class
    pub fn tree(&self, conn: &Connection, class: &str) -> Result<NestedSet> {
        let nodes = self.list(conn, class)?.into_iter().map(|row| TreeNode {
            id: row.id,
            parent_id: row.parent_id,
            left: row.left_id,
            right: row.right_id,
        });
        Ok(NestedSet::new(class, nodes))
    }

    /// Whether a module exists under `parent` (any parent when `None`)
    ///
    /// With several resolved parents the module must exist under all of
    /// them, or under at least one when `lazy` is set. The root module
    /// (empty name or id 0) always exists.
    pub fn exists(
        &self,
        conn: &Connection,
        class: &str,
        parent: Option<&ParentRef>,
        module: &ModuleRef,
        lazy: bool,
    ) -> Result<bool> {
        if module.is_root() {
            return Ok(true);
        }

        let parents = match parent {
            Some(parent) => match self.parent_ids(conn, class, parent) {
                Ok(ids) => ids.into_iter().map(Some).collect(),
                Err(Error::ModuleNotExist(_)) => return Ok(false),
                Err(e) => return Err(e),
            },
            None => vec![None],
        };

        for parent_id in parents {
            let found = self.find_id(conn, class, parent_id, module)?.is_some();
            if lazy && found {
                return Ok(true);
            }
            if !lazy && !found {
                return Ok(false);
            }
        }
        Ok(!lazy)
    }

    /// Add a module under every parent the reference resolves to
    pub fn add(&self, conn: &Connection, class: &str, parent: &ParentRef, data: &ModuleData) -> Result<()> {
        for parent_id in self.parent_ids(conn, class, parent)? {
            if !self.exists(conn, class, None, &ModuleRef::Id(parent_id), false)? {
                return Err(Error::ModuleNotExist(parent_id.to_string()));
            }
            if self.exists(
                conn,
                class,
                Some(&ParentRef::from(parent_id)),
                &ModuleRef::Langname(data.langname.clone()),
                false,
            )? {
                return Err(Error::ModuleExists(data.langname.clone()));
            }

            let sibling = match &data.placement {
                Some(Placement::Before(sibling) | Placement::After(sibling)) => {
                    Some(self.find_sibling(conn, class, parent_id, sibling)?)
                }
                None => None,
            };

            let id = self.insert(conn, class, parent_id, data)?;
            info!("Added module {} ({}) to class {}", data.langname, id, class);

            let tree = self.tree(conn, class)?;
            let updates = match (&data.placement, sibling) {
                (Some(Placement::Before(_)), Some(sibling)) => tree.plan_move_before(id, sibling)?,
                (Some(Placement::After(_)), Some(sibling)) => tree.plan_move_after(id, sibling)?,
                _ => Vec::new(),
            };
            self.execute_updates(conn, class, &updates)?;
        }
        Ok(())
    }

    /// Remove matching leaf modules; absent modules are ignored
    pub fn remove(
        &self,
        conn: &Connection,
        class: &str,
        parent: Option<&ParentRef>,
        module: &ModuleRef,
    ) -> Result<()> {
        if module.is_root() || !self.exists(conn, class, parent, module, true)? {
            debug!("Module {:?} not present in class {}, nothing to remove", module, class);
            return Ok(());
        }

        let parent_ids = match parent {
            Some(parent) => Some(self.parent_ids(conn, class, parent)?),
            None => None,
        };

        let ids = match module {
            ModuleRef::Id(id) => vec![*id],
            ModuleRef::Langname(langname) => self.ids_by_langname(conn, class, langname, parent_ids.as_deref())?,
            ModuleRef::Data(data) => self.ids_by_langname(conn, class, &data.langname, parent_ids.as_deref())?,
        };

        for id in ids {
            self.delete(conn, class, id)?;
        }
        Ok(())
    }

    /// Delete one leaf module and close the gap in the tree
    pub fn delete(&self, conn: &Connection, class: &str, id: i64) -> Result<()> {
        let tree = self.tree(conn, class)?;
        let updates = tree.plan_remove(id)?;
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE module_class = ?1 AND module_id = ?2",
                quote_ident(&self.table)
            ),
            params![class, id],
        )?;
        self.execute_updates(conn, class, &updates)?;
        info!("Removed module {} from class {}", id, class);
        Ok(())
    }

    fn insert(&self, conn: &Connection, class: &str, parent_id: i64, data: &ModuleData) -> Result<i64> {
        let tree = self.tree(conn, class)?;
        let ((left, right), updates) = tree.plan_append(parent_id)?;
        self.execute_updates(conn, class, &updates)?;

        conn.execute(
            &format!(
                "INSERT INTO {} (module_enabled, module_display, module_basename, module_class,
                    parent_id, left_id, right_id, module_langname, module_mode, module_auth)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                quote_ident(&self.table)
            ),
            params![
                data.enabled,
                data.display,
                data.basename,
                class,
                parent_id,
                left,
                right,
                data.langname,
                data.mode,
                data.auth,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn execute_updates(&self, conn: &Connection, class: &str, updates: &[TreeUpdate]) -> Result<()> {
        let table = quote_ident(&self.table);
        for update in updates {
            match *update {
                TreeUpdate::Shift {
                    from,
                    to: Some(to),
                    delta,
                } => conn.execute(
                    &format!(
                        "UPDATE {table} SET left_id = left_id + ?2, right_id = right_id + ?2
                         WHERE module_class = ?1 AND left_id >= ?3 AND left_id < ?4"
                    ),
                    params![class, delta, from, to],
                )?,
                TreeUpdate::Shift {
                    from,
                    to: None,
                    delta,
                } => conn.execute(
                    &format!(
                        "UPDATE {table} SET left_id = left_id + ?2, right_id = right_id + ?2
                         WHERE module_class = ?1 AND left_id >= ?3"
                    ),
                    params![class, delta, from],
                )?,
                TreeUpdate::Stretch { at, delta } => conn.execute(
                    &format!(
                        "UPDATE {table} SET right_id = right_id + ?2
                         WHERE module_class = ?1 AND left_id < ?3 AND right_id >= ?3"
                    ),
                    params![class, delta, at],
                )?,
                TreeUpdate::Place { id, left, right } => conn.execute(
                    &format!(
                        "UPDATE {table} SET left_id = ?3, right_id = ?4
                         WHERE module_class = ?1 AND module_id = ?2"
                    ),
                    params![class, id, left, right],
                )?,
            };
        }
        Ok(())
    }

    /// Resolve a parent reference to module ids
    fn parent_ids(&self, conn: &Connection, class: &str, parent: &ParentRef) -> Result<Vec<i64>> {
        match parent {
            ParentRef::Root => Ok(vec![0]),
            ParentRef::Id(id) => Ok(vec![*id]),
            ParentRef::Category(name) => {
                let table = quote_ident(&self.table);
                let mut stmt = conn.prepare(&format!(
                    "SELECT m.module_id FROM {table} m
                     WHERE m.module_class = ?1 AND m.module_langname = ?2
                       AND (m.parent_id = 0 OR m.parent_id IN (
                           SELECT module_id FROM {table} WHERE module_class = ?1 AND parent_id = 0))
                     ORDER BY m.module_id"
                ))?;
                let ids = stmt
                    .query_map(params![class, name], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<i64>>>()?;
                if ids.is_empty() {
                    return Err(Error::ModuleNotExist(name.clone()));
                }
                Ok(ids)
            }
        }
    }

    fn find_id(
        &self,
        conn: &Connection,
        class: &str,
        parent_id: Option<i64>,
        module: &ModuleRef,
    ) -> Result<Option<i64>> {
        let table = quote_ident(&self.table);
        let parent_sql = if parent_id.is_some() { " AND parent_id = ?3" } else { "" };
        let (column, value): (&str, rusqlite::types::Value) = match module {
            ModuleRef::Id(id) => ("module_id", (*id).into()),
            ModuleRef::Langname(name) => ("module_langname", name.clone().into()),
            ModuleRef::Data(data) => ("module_langname", data.langname.clone().into()),
        };
        let sql = format!(
            "SELECT module_id FROM {table} WHERE module_class = ?1 AND {column} = ?2{parent_sql} LIMIT 1"
        );

        let id = match parent_id {
            Some(parent_id) => conn
                .query_row(&sql, params![class, value, parent_id], |row| row.get(0))
                .optional()?,
            None => conn
                .query_row(&sql, params![class, value], |row| row.get(0))
                .optional()?,
        };
        Ok(id)
    }

    fn find_sibling(&self, conn: &Connection, class: &str, parent_id: i64, sibling: &SiblingRef) -> Result<i64> {
        let table = quote_ident(&self.table);
        let id = match &sibling.mode {
            Some(mode) => conn
                .query_row(
                    &format!(
                        "SELECT module_id FROM {table}
                         WHERE module_class = ?1 AND parent_id = ?2
                           AND module_langname = ?3 AND module_mode = ?4"
                    ),
                    params![class, parent_id, sibling.langname, mode],
                    |row| row.get(0),
                )
                .optional()?,
            None => conn
                .query_row(
                    &format!(
                        "SELECT module_id FROM {table}
                         WHERE module_class = ?1 AND parent_id = ?2 AND module_langname = ?3"
                    ),
                    params![class, parent_id, sibling.langname],
                    |row| row.get(0),
                )
                .optional()?,
        };
        id.ok_or_else(|| Error::ModuleNotExist(sibling.langname.clone()))
    }

    fn ids_by_langname(
        &self,
        conn: &Connection,
        class: &str,
        langname: &str,
        parent_ids: Option<&[i64]>,
    ) -> Result<Vec<i64>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT module_id, parent_id FROM {} WHERE module_class = ?1 AND module_langname = ?2
             ORDER BY left_id DESC",
            quote_ident(&self.table)
        ))?;
        let rows = stmt
            .query_map(params![class, langname], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .filter(|(_, parent)| parent_ids.is_none_or(|ids| ids.contains(parent)))
            .map(|(id, _)| id)
            .collect())
    }
}
