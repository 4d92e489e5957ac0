//! The persistence boundary.
//!
//! Everything the evaluator needs from the database is expressed through the
//! [`Store`] trait, so the engine runs against SQLite or an in-memory
//! implementation interchangeably. Store errors are infrastructure failures:
//! they abort the current row's transaction and surface to the driver, never
//! as cell issues.

use indexmap::IndexMap;

use crate::{schema::TreeDefinition, value::Fields};

pub mod memory;
pub mod sqlite;

pub type RecordId = i64;

/// One level of a rank-ordered tree path, given root to leaf.
#[derive(Clone, Copy, Debug)]
pub struct TreePathNode<'a> {
    pub rank_id: i32,
    pub name: &'a str,
}

/// A tree node to insert.
#[derive(Clone, Copy, Debug)]
pub struct NewTreeNode<'a> {
    pub name: &'a str,
    pub rank_id: i32,
    pub treedef_id: i64,
    pub parent: Option<RecordId>,
    /// additional parsed tree columns (author and the like)
    pub extra: &'a Fields,
}

#[allow(async_fn_in_trait)]
pub trait Store {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Ids of records whose fields equal the filter exactly. A null filter
    /// value matches a missing or null field.
    async fn find_matching(&self, table: &str, filter: &Fields) -> Result<Vec<RecordId>, Self::Error>;

    async fn insert(&self, table: &str, values: &Fields) -> Result<RecordId, Self::Error>;

    /// Create a user-extensible picklist item named after the new value.
    async fn add_picklist_item(&self, picklist_id: i64, value: &str) -> Result<(), Self::Error>;

    /// Ids of tree nodes at the deepest supplied rank whose ancestor chain
    /// reaches a parentless root and carries every `(rank id, name)` pair of
    /// the path. Chain levels at unsupplied ranks are unconstrained.
    async fn match_tree_path(
        &self,
        table: &str,
        treedef_id: i64,
        path: &[TreePathNode<'_>],
    ) -> Result<Vec<RecordId>, Self::Error>;

    async fn insert_tree_node(&self, table: &str, node: &NewTreeNode<'_>) -> Result<RecordId, Self::Error>;

    /// Open the per-row transaction.
    async fn savepoint(&self) -> Result<(), Self::Error>;
    async fn release_savepoint(&self) -> Result<(), Self::Error>;
    async fn rollback_savepoint(&self) -> Result<(), Self::Error>;

    /// Recompute contiguous depth-first node-number ranges after an upload
    /// run.
    async fn renumber_tree(&self, table: &str, treedef_id: i64) -> Result<(), Self::Error>;

    /// Rebuild denormalized full names from the definition's ranks.
    async fn reset_fullnames(&self, table: &str, definition: &TreeDefinition) -> Result<(), Self::Error>;
}

/// Depth-first numbering over `(id, parent)` pairs: every node receives a
/// `nodenumber` and the highest number in its subtree.
pub(crate) fn assign_node_numbers(
    nodes: &[(RecordId, Option<RecordId>)],
) -> Vec<(RecordId, i64, i64)> {
    let mut children: IndexMap<Option<RecordId>, Vec<RecordId>> = IndexMap::new();
    for (id, parent) in nodes {
        children.entry(*parent).or_default().push(*id);
    }

    fn walk(
        children: &IndexMap<Option<RecordId>, Vec<RecordId>>,
        id: RecordId,
        counter: &mut i64,
        out: &mut Vec<(RecordId, i64, i64)>,
    ) -> i64 {
        *counter += 1;
        let node_number = *counter;
        let mut highest = node_number;
        if let Some(kids) = children.get(&Some(id)) {
            for child in kids {
                highest = walk(children, *child, counter, out);
            }
        }
        out.push((id, node_number, highest));
        highest
    }

    let mut out = Vec::with_capacity(nodes.len());
    let mut counter = 0;
    for root in children.get(&None).cloned().unwrap_or_default() {
        walk(&children, root, &mut counter, &mut out);
    }
    out
}

/// Full names over `(id, parent, name, rank id)` tuples: ancestor names on
/// `is_in_fullname` ranks plus the node's own name, root to leaf, joined by
/// a single space.
pub(crate) fn build_fullnames(
    nodes: &[(RecordId, Option<RecordId>, String, i32)],
    definition: &TreeDefinition,
) -> Vec<(RecordId, String)> {
    let by_id: IndexMap<RecordId, usize> =
        nodes.iter().enumerate().map(|(index, node)| (node.0, index)).collect();
    let in_fullname = |rank_id: i32| {
        definition
            .ranks
            .iter()
            .find(|rank| rank.rank_id == rank_id)
            .is_some_and(|rank| rank.is_in_fullname)
    };

    nodes
        .iter()
        .map(|(id, _, _, _)| {
            let mut parts = Vec::new();
            let mut current = Some(*id);
            while let Some(node_id) = current {
                let Some(&index) = by_id.get(&node_id) else { break };
                let (_, parent, name, rank_id) = &nodes[index];
                if node_id == *id || in_fullname(*rank_id) {
                    parts.push(name.as_str());
                }
                current = *parent;
            }
            parts.reverse();
            (*id, parts.join(" "))
        })
        .collect()
}
