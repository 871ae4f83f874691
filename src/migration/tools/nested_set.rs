// src/migration/tools/nested_set.rs

//! Nested-set bookkeeping for the module tree
//!
//! Every module of a class carries `left`/`right` bounds: a node's subtree
//! is exactly the set of nodes whose bounds lie strictly inside its own.
//! Inserting, moving and deleting nodes are planned here as a list of
//! [`TreeUpdate`]s that the module tool turns into range UPDATE statements.
//! The same updates can be applied to the in-memory [`NestedSet`], which is
//! also used to validate a tree.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// Bounds of one module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeNode {
    pub id: i64,
    pub parent_id: i64,
    pub left: i64,
    pub right: i64,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.right == self.left + 1
    }
}

/// One range update against the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeUpdate {
    /// Add `delta` to both bounds of nodes with `from <= left < to`
    Shift { from: i64, to: Option<i64>, delta: i64 },
    /// Add `delta` to the right bound of nodes with `left < at <= right`
    Stretch { at: i64, delta: i64 },
    /// Set the bounds of a single node
    Place { id: i64, left: i64, right: i64 },
}

/// In-memory nested set for one module class
#[derive(Debug, Clone, Default)]
pub struct NestedSet {
    class: String,
    nodes: BTreeMap<i64, TreeNode>,
}

impl NestedSet {
    pub fn new(class: impl Into<String>, nodes: impl IntoIterator<Item = TreeNode>) -> Self {
        Self {
            class: class.into(),
            nodes: nodes.into_iter().map(|n| (n.id, n)).collect(),
        }
    }

    pub fn get(&self, id: i64) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct children ordered by left bound
    pub fn children(&self, parent_id: i64) -> Vec<TreeNode> {
        let mut children: Vec<TreeNode> = self
            .nodes
            .values()
            .filter(|n| n.parent_id == parent_id)
            .copied()
            .collect();
        children.sort_by_key(|n| n.left);
        children
    }

    pub fn max_right(&self) -> i64 {
        self.nodes.values().map(|n| n.right).max().unwrap_or(0)
    }

    fn node(&self, id: i64) -> Result<TreeNode> {
        self.nodes
            .get(&id)
            .copied()
            .ok_or_else(|| Error::ModuleNotExist(id.to_string()))
    }

    fn corrupted(&self, reason: String) -> Error {
        Error::NestedSetCorrupted {
            class: self.class.clone(),
            reason,
        }
    }

    /// Bounds for a new last child of `parent_id` (0 for the root level)
    /// and the updates that make room for it
    pub fn plan_append(&self, parent_id: i64) -> Result<((i64, i64), Vec<TreeUpdate>)> {
        if parent_id == 0 {
            let right = self.max_right();
            return Ok(((right + 1, right + 2), Vec::new()));
        }

        let parent = self.node(parent_id)?;
        let at = parent.right;
        Ok((
            (at, at + 1),
            vec![
                TreeUpdate::Stretch { at, delta: 2 },
                TreeUpdate::Shift {
                    from: at + 1,
                    to: None,
                    delta: 2,
                },
            ],
        ))
    }

    /// Move leaf `id` directly in front of `sibling_id`
    pub fn plan_move_before(&self, id: i64, sibling_id: i64) -> Result<Vec<TreeUpdate>> {
        let node = self.movable(id, sibling_id)?;
        let sibling = self.node(sibling_id)?;
        if sibling.left > node.left {
            return Err(self.corrupted(format!(
                "module {id} must follow module {sibling_id} to be moved before it"
            )));
        }

        Ok(vec![
            TreeUpdate::Shift {
                from: sibling.left,
                to: Some(node.left),
                delta: 2,
            },
            TreeUpdate::Place {
                id,
                left: sibling.left,
                right: sibling.left + 1,
            },
        ])
    }

    /// Move leaf `id` directly behind `sibling_id`
    pub fn plan_move_after(&self, id: i64, sibling_id: i64) -> Result<Vec<TreeUpdate>> {
        let node = self.movable(id, sibling_id)?;
        let sibling = self.node(sibling_id)?;
        if sibling.right > node.left {
            return Err(self.corrupted(format!(
                "module {id} must follow module {sibling_id} to be moved after it"
            )));
        }
        if sibling.right + 1 == node.left {
            return Ok(Vec::new());
        }

        Ok(vec![
            TreeUpdate::Shift {
                from: sibling.right + 1,
                to: Some(node.left),
                delta: 2,
            },
            TreeUpdate::Place {
                id,
                left: sibling.right + 1,
                right: sibling.right + 2,
            },
        ])
    }

    /// Updates closing the gap left by deleting leaf `id`
    ///
    /// Apply them after the node itself is gone.
    pub fn plan_remove(&self, id: i64) -> Result<Vec<TreeUpdate>> {
        let node = self.node(id)?;
        if !node.is_leaf() {
            return Err(Error::ModuleHasChildren(id));
        }
        Ok(vec![
            TreeUpdate::Stretch {
                at: node.right,
                delta: -2,
            },
            TreeUpdate::Shift {
                from: node.right + 1,
                to: None,
                delta: -2,
            },
        ])
    }

    fn movable(&self, id: i64, sibling_id: i64) -> Result<TreeNode> {
        let node = self.node(id)?;
        let sibling = self.node(sibling_id)?;
        if !node.is_leaf() {
            return Err(Error::ModuleHasChildren(id));
        }
        if node.parent_id != sibling.parent_id {
            return Err(self.corrupted(format!(
                "modules {id} and {sibling_id} are not siblings"
            )));
        }
        Ok(node)
    }

    pub fn insert(&mut self, node: TreeNode) {
        self.nodes.insert(node.id, node);
    }

    pub fn remove(&mut self, id: i64) -> Option<TreeNode> {
        self.nodes.remove(&id)
    }

    /// Apply planned updates to the in-memory tree
    pub fn apply(&mut self, updates: &[TreeUpdate]) {
        for update in updates {
            match *update {
                TreeUpdate::Shift { from, to, delta } => {
                    for node in self.nodes.values_mut() {
                        if node.left >= from && to.is_none_or(|to| node.left < to) {
                            node.left += delta;
                            node.right += delta;
                        }
                    }
                }
                TreeUpdate::Stretch { at, delta } => {
                    for node in self.nodes.values_mut() {
                        if node.left < at && node.right >= at {
                            node.right += delta;
                        }
                    }
                }
                TreeUpdate::Place { id, left, right } => {
                    if let Some(node) = self.nodes.get_mut(&id) {
                        node.left = left;
                        node.right = right;
                    }
                }
            }
        }
    }

    /// Check the nested-set invariants
    ///
    /// Bounds are unique and ordered, every child lies inside its parent,
    /// siblings do not overlap, and each node's width matches the number
    /// of nodes it encloses.
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashMap<i64, i64> = HashMap::new();
        for node in self.nodes.values() {
            if node.left >= node.right {
                return Err(self.corrupted(format!(
                    "module {} has left {} >= right {}",
                    node.id, node.left, node.right
                )));
            }
            for bound in [node.left, node.right] {
                if let Some(other) = seen.insert(bound, node.id) {
                    return Err(self.corrupted(format!(
                        "bound {bound} shared by modules {other} and {}",
                        node.id
                    )));
                }
            }
        }

        for node in self.nodes.values() {
            if node.parent_id != 0 {
                let parent = self.nodes.get(&node.parent_id).ok_or_else(|| {
                    self.corrupted(format!(
                        "module {} has missing parent {}",
                        node.id, node.parent_id
                    ))
                })?;
                if !(parent.left < node.left && node.right < parent.right) {
                    return Err(self.corrupted(format!(
                        "module {} lies outside its parent {}",
                        node.id, parent.id
                    )));
                }
            }

            let enclosed = self
                .nodes
                .values()
                .filter(|n| n.left > node.left && n.right < node.right)
                .count() as i64;
            if node.right - node.left != 2 * enclosed + 1 {
                return Err(self.corrupted(format!(
                    "module {} spans [{}, {}] but encloses {} modules",
                    node.id, node.left, node.right, enclosed
                )));
            }
        }

        let parents: Vec<i64> = {
            let mut ids: Vec<i64> = self.nodes.values().map(|n| n.parent_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        for parent in parents {
            let children = self.children(parent);
            for pair in children.windows(2) {
                if pair[0].right >= pair[1].left {
                    return Err(self.corrupted(format!(
                        "siblings {} and {} overlap",
                        pair[0].id, pair[1].id
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append(tree: &mut NestedSet, id: i64, parent_id: i64) {
        let ((left, right), updates) = tree.plan_append(parent_id).unwrap();
        tree.apply(&updates);
        tree.insert(TreeNode {
            id,
            parent_id,
            left,
            right,
        });
        tree.validate().unwrap();
    }

    fn order(tree: &NestedSet, parent_id: i64) -> Vec<i64> {
        tree.children(parent_id).iter().map(|n| n.id).collect()
    }

    #[test]
    fn test_append_builds_valid_tree() {
        let mut tree = NestedSet::new("acp", []);
        append(&mut tree, 1, 0);
        append(&mut tree, 2, 1);
        append(&mut tree, 3, 2);
        append(&mut tree, 4, 1);
        append(&mut tree, 5, 0);

        assert_eq!(tree.get(1).map(|n| (n.left, n.right)), Some((1, 8)));
        assert_eq!(tree.get(3).map(|n| (n.left, n.right)), Some((3, 4)));
        assert_eq!(tree.get(5).map(|n| (n.left, n.right)), Some((9, 10)));
        assert_eq!(order(&tree, 1), vec![2, 4]);
    }

    #[test]
    fn test_move_before_and_after() {
        let mut tree = NestedSet::new("acp", []);
        append(&mut tree, 1, 0);
        for id in 2..=5 {
            append(&mut tree, id, 1);
        }

        let updates = tree.plan_move_before(5, 3).unwrap();
        tree.apply(&updates);
        tree.validate().unwrap();
        assert_eq!(order(&tree, 1), vec![2, 5, 3, 4]);

        append(&mut tree, 6, 1);
        let updates = tree.plan_move_after(6, 2).unwrap();
        tree.apply(&updates);
        tree.validate().unwrap();
        assert_eq!(order(&tree, 1), vec![2, 6, 5, 3, 4]);
    }

    #[test]
    fn test_move_after_previous_sibling_is_noop() {
        let mut tree = NestedSet::new("acp", []);
        append(&mut tree, 1, 0);
        append(&mut tree, 2, 1);
        append(&mut tree, 3, 1);
        assert!(tree.plan_move_after(3, 2).unwrap().is_empty());
    }

    #[test]
    fn test_remove_leaf_closes_gap() {
        let mut tree = NestedSet::new("acp", []);
        append(&mut tree, 1, 0);
        append(&mut tree, 2, 1);
        append(&mut tree, 3, 1);
        append(&mut tree, 4, 0);

        let updates = tree.plan_remove(2).unwrap();
        tree.remove(2);
        tree.apply(&updates);
        tree.validate().unwrap();
        assert_eq!(tree.get(1).map(|n| (n.left, n.right)), Some((1, 4)));
        assert_eq!(tree.get(4).map(|n| (n.left, n.right)), Some((5, 6)));
    }

    #[test]
    fn test_remove_with_children_fails() {
        let mut tree = NestedSet::new("acp", []);
        append(&mut tree, 1, 0);
        append(&mut tree, 2, 1);
        assert!(matches!(tree.plan_remove(1), Err(Error::ModuleHasChildren(1))));
    }

    #[test]
    fn test_validate_detects_overlap() {
        let tree = NestedSet::new(
            "acp",
            [
                TreeNode {
                    id: 1,
                    parent_id: 0,
                    left: 1,
                    right: 4,
                },
                TreeNode {
                    id: 2,
                    parent_id: 0,
                    left: 3,
                    right: 6,
                },
            ],
        );
        assert!(matches!(
            tree.validate(),
            Err(Error::NestedSetCorrupted { .. })
        ));
    }
}
