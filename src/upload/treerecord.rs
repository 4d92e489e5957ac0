//! Tree-record matching and upsert.
//!
//! Tree nodes match rank-ordered paths against the existing hierarchy,
//! deepest path first, and create only the missing tail. Enforced ranks and
//! the definition root are filled with a sentinel name on insertion; the
//! fills never constrain matching, so partial paths converge onto real
//! trees.

use tracing::{debug, trace};

use crate::{
    parsing::{self, CellIssue, trimmed},
    plan::scoping::ScopedTree,
    store::{NewTreeNode, RecordId, Store, TreePathNode},
    value::{Fields, Row},
};

use super::{Mode, Outcome, ReportInfo, UploadResult, Uploader};

/// The name every synthesized ancestor receives. Deployed trees already
/// carry this placeholder, so the literal must not change.
pub const UPLOADED_SENTINEL: &str = "Uploaded";

/// One rank the row supplied a name for, by item index into the scoped
/// definition.
struct SuppliedRank {
    index: usize,
    name: String,
    extra: Fields,
}

impl<'a, S: Store> Uploader<'a, S> {
    pub(super) async fn upload_tree(
        &self,
        tree: &ScopedTree,
        row: &Row,
        mode: Mode,
    ) -> Result<UploadResult, S::Error> {
        let mode = if tree.must_match { Mode::MatchOnly } else { mode };
        let info = ReportInfo {
            table_name: tree.name.clone(),
            columns: tree
                .items
                .iter()
                .filter_map(|item| item.columns.as_ref())
                .flat_map(|columns| columns.values().map(|options| options.column.clone()))
                .collect(),
        };

        // read and parse every mapped rank cell up front
        let mut issues = Vec::new();
        let mut supplied: Vec<SuppliedRank> = Vec::new();
        for (index, item) in tree.items.iter().enumerate() {
            let Some(columns) = &item.columns else {
                continue;
            };
            let Some(name_options) = columns.get("name") else {
                continue;
            };
            let Some(name) = row.get(&name_options.column).and_then(|raw| trimmed(raw)) else {
                continue;
            };
            let mut extra = Fields::new();
            for (column, options) in columns {
                if column == "name" {
                    continue;
                }
                let raw = row.get(&options.column).map(String::as_str).unwrap_or("");
                match parsing::parse_value(self.metadata, &tree.name, column, raw, options) {
                    Ok(result) => extra.extend(result.upload),
                    Err(failure) => issues.push(CellIssue {
                        column: options.column.clone(),
                        message: failure.message,
                    }),
                }
            }
            supplied.push(SuppliedRank { index, name: name.to_owned(), extra });
        }

        if !issues.is_empty() {
            return Ok(UploadResult::one(Outcome::ParseFailed { issues, info }));
        }
        let Some(deepest) = supplied.last().map(|rank| rank.index) else {
            // no tree data for this row
            return Ok(UploadResult::one(Outcome::NullRecord { info }));
        };

        // enforced ranks above the deepest value, and the definition root,
        // are synthesized on insertion but never constrain matching
        let fills: Vec<usize> = (0..deepest)
            .filter(|index| {
                (tree.items[*index].rank.enforced || *index == 0)
                    && !supplied.iter().any(|rank| rank.index == *index)
            })
            .collect();

        // deepest match wins: try the fullest path, then drop leaves
        let mut remaining = supplied;
        let mut pending: Vec<SuppliedRank> = Vec::new();
        let mut matched: Vec<RecordId> = Vec::new();
        while !remaining.is_empty() {
            let query: Vec<TreePathNode> = remaining
                .iter()
                .map(|rank| TreePathNode {
                    rank_id: tree.items[rank.index].rank.rank_id,
                    name: &rank.name,
                })
                .collect();
            let ids = self.store.match_tree_path(&tree.name, tree.treedef_id, &query).await?;
            if !ids.is_empty() {
                matched = ids;
                break;
            }
            match remaining.pop() {
                Some(rank) => pending.push(rank),
                None => break,
            }
        }
        trace!(
            table = %tree.name,
            matched = matched.len(),
            to_upload = pending.len(),
            "tree path matched"
        );

        if pending.is_empty() {
            // the full path exists already
            return Ok(UploadResult::one(if matched.len() == 1 {
                Outcome::Matched { id: matched[0], info }
            } else {
                Outcome::MatchedMultiple { ids: matched, info }
            }));
        }
        if matched.len() > 1 {
            // ambiguous roots: never insert below them
            return Ok(UploadResult::one(Outcome::MatchedMultiple { ids: matched, info }));
        }
        if mode == Mode::MatchOnly {
            return Ok(UploadResult::one(Outcome::NoMatch { info }));
        }

        let matched_index = remaining.last().map(|rank| rank.index);
        let mut to_insert: Vec<SuppliedRank> = pending;
        to_insert.extend(
            fills
                .into_iter()
                .filter(|index| matched_index.is_none_or(|m| *index > m))
                .map(|index| SuppliedRank {
                    index,
                    name: UPLOADED_SENTINEL.to_owned(),
                    extra: Fields::new(),
                }),
        );
        // parents must exist before children
        to_insert.sort_by_key(|rank| rank.index);

        let mut parent = matched.first().copied();
        for rank in &to_insert {
            let item = &tree.items[rank.index];
            let node = NewTreeNode {
                name: &rank.name,
                rank_id: item.rank.rank_id,
                treedef_id: tree.treedef_id,
                parent,
                extra: &rank.extra,
            };
            let id = self.store.insert_tree_node(&tree.name, &node).await?;
            debug!(table = %tree.name, rank = %item.rank.name, name = %rank.name, id, "inserted tree node");
            parent = Some(id);
        }
        let Some(id) = parent else {
            unreachable!("at least one tree node was inserted");
        };
        Ok(UploadResult::one(Outcome::Uploaded { id, info, picklist_additions: Vec::new() }))
    }
}
