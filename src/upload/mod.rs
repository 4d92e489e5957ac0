//! The upload evaluator.
//!
//! Walks a bound plan depth first, parsing cells, matching existing records
//! and inserting what is missing. Each node reports one of the outcomes in
//! [`result`]; the whole walk is pure apart from store calls, so identical
//! inputs against identical store state always produce identical results.

use std::{future::Future, pin::Pin};

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::{
    parsing,
    plan::bind::BoundPlan,
    plan::scoping::{ScopedTable, ScopedUploadable},
    schema::SchemaMetadata,
    store::{RecordId, Store},
    value::{Fields, Row, Value},
};

mod result;
mod treerecord;

pub use result::{Outcome, ReportInfo, UploadResult};
pub use treerecord::UPLOADED_SENTINEL;

/// Evaluation mode for a node and its descendants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Create,
    /// match existing records only; a miss is reported, never created
    MatchOnly,
    /// skip matching and always insert
    ForceCreate,
}

/// A deferred child's link back to the record that owns it.
#[derive(Clone, Copy)]
struct ParentLink<'a> {
    fk_field: &'a str,
    id: RecordId,
}

/// Walks bound plans against a store.
pub struct Uploader<'a, S> {
    pub store: &'a S,
    pub metadata: &'a SchemaMetadata,
}

impl<'a, S: Store> Uploader<'a, S> {
    pub fn new(store: &'a S, metadata: &'a SchemaMetadata) -> Self {
        Self { store, metadata }
    }

    /// Evaluate one bound row. A store error is an infrastructure failure
    /// and aborts the row; everything else is reported in the result tree.
    pub async fn upload_row(&self, bound: BoundPlan<'_>, mode: Mode) -> Result<UploadResult, S::Error> {
        match bound.plan {
            ScopedUploadable::Table(table) => self.upload_table(table, bound.row, mode, None).await,
            ScopedUploadable::Tree(tree) => self.upload_tree(tree, bound.row, mode).await,
        }
    }

    async fn upload_node(
        &self,
        node: &ScopedUploadable,
        row: &Row,
        mode: Mode,
    ) -> Result<UploadResult, S::Error> {
        match node {
            ScopedUploadable::Table(table) => self.upload_table(table, row, mode, None).await,
            ScopedUploadable::Tree(tree) => self.upload_tree(tree, row, mode).await,
        }
    }

    /// Boxed for recursion: table nodes nest through to-one, one-to-one and
    /// to-many children.
    fn upload_table<'s>(
        &'s self,
        table: &'s ScopedTable,
        row: &'s Row,
        mode: Mode,
        parent: Option<ParentLink<'s>>,
    ) -> Pin<Box<dyn Future<Output = Result<UploadResult, S::Error>> + 's>> {
        Box::pin(async move {
            // a must-match node suppresses creation for its whole subtree
            let mode = if table.must_match { Mode::MatchOnly } else { mode };

            let mut to_one_results = IndexMap::new();
            for (relation, child) in &table.to_one {
                let result = self.upload_node(&child.uploadable, row, mode).await?;
                to_one_results.insert(relation.clone(), result);
            }

            let (results, issues) = parsing::parse_many(self.metadata, &table.name, &table.wbcols, row);
            let info = ReportInfo {
                table_name: table.name.clone(),
                columns: table.wbcols.values().map(|options| options.column.clone()).collect(),
            };

            let children_failed = to_one_results.values().any(UploadResult::is_parse_failure);
            if !issues.is_empty() || children_failed {
                return Ok(UploadResult {
                    outcome: Outcome::ParseFailed { issues, info },
                    to_one: to_one_results,
                    to_many: IndexMap::new(),
                });
            }
            if to_one_results.values().any(UploadResult::blocks_parent) {
                // an unmatched or ambiguous child leaves nothing to key against
                return Ok(UploadResult {
                    outcome: Outcome::NoMatch { info },
                    to_one: to_one_results,
                    to_many: IndexMap::new(),
                });
            }

            let all_blank = results.iter().all(|result| result.upload.is_empty())
                && to_one_results.values().all(UploadResult::is_null_record);
            if all_blank {
                return Ok(UploadResult {
                    outcome: Outcome::NullRecord { info },
                    to_one: to_one_results,
                    to_many: IndexMap::new(),
                });
            }

            let mut filter = Fields::new();
            if let Some(parent) = &parent {
                filter.insert(parent.fk_field.to_owned(), Value::Integer(parent.id));
            }
            for (relation, result) in &to_one_results {
                let fk_field = &table.to_one[relation].fk_field;
                let value = result.record_id().map(Value::Integer).unwrap_or(Value::Null);
                filter.insert(fk_field.clone(), value);
            }
            for (field, value) in &table.statics {
                filter.insert(field.clone(), value.clone());
            }
            for result in &results {
                for (field, value) in &result.filter_on {
                    filter.insert(field.clone(), value.clone());
                }
            }

            if mode != Mode::ForceCreate {
                let matched = self.store.find_matching(&table.name, &filter).await?;
                if matched.len() > 1 {
                    return Ok(UploadResult {
                        outcome: Outcome::MatchedMultiple { ids: matched, info },
                        to_one: to_one_results,
                        to_many: IndexMap::new(),
                    });
                }
                if let Some(&id) = matched.first() {
                    trace!(table = %table.name, id, "matched existing record");
                    let one_to_one = self.upload_one_to_ones(table, row, mode, id).await?;
                    let mut result = UploadResult {
                        outcome: Outcome::Matched { id, info },
                        to_one: to_one_results,
                        to_many: IndexMap::new(),
                    };
                    result.to_one.extend(one_to_one);
                    return Ok(result);
                }
                if mode == Mode::MatchOnly {
                    return Ok(UploadResult {
                        outcome: Outcome::NoMatch { info },
                        to_one: to_one_results,
                        to_many: IndexMap::new(),
                    });
                }
            }

            let mut payload = table.statics.clone();
            if let Some(parent) = &parent {
                payload.insert(parent.fk_field.to_owned(), Value::Integer(parent.id));
            }
            for (relation, result) in &to_one_results {
                if let Some(id) = result.record_id() {
                    payload.insert(table.to_one[relation].fk_field.clone(), Value::Integer(id));
                }
            }
            for result in &results {
                for (field, value) in &result.upload {
                    payload.insert(field.clone(), value.clone());
                }
            }

            let id = self.store.insert(&table.name, &payload).await?;
            debug!(table = %table.name, id, "inserted record");

            let mut additions = Vec::new();
            for result in &results {
                if let Some(addition) = &result.add_to_picklist {
                    self.store.add_picklist_item(addition.picklist_id, &addition.value).await?;
                    additions.push(addition.clone());
                }
            }

            let one_to_one = self.upload_one_to_ones(table, row, mode, id).await?;
            let mut to_many_results = IndexMap::new();
            for (relation, collection) in &table.to_many {
                let mut element_results = Vec::with_capacity(collection.records.len());
                for record in &collection.records {
                    let link = ParentLink { fk_field: &collection.fk_field, id };
                    element_results.push(self.upload_table(record, row, mode, Some(link)).await?);
                }
                to_many_results.insert(relation.clone(), element_results);
            }

            let mut result = UploadResult {
                outcome: Outcome::Uploaded { id, info, picklist_additions: additions },
                to_one: to_one_results,
                to_many: to_many_results,
            };
            result.to_one.extend(one_to_one);
            Ok(result)
        })
    }

    /// One-to-one children materialize after their parent, scoped to it by
    /// the foreign key they carry.
    async fn upload_one_to_ones(
        &self,
        table: &ScopedTable,
        row: &Row,
        mode: Mode,
        id: RecordId,
    ) -> Result<IndexMap<String, UploadResult>, S::Error> {
        let mut results = IndexMap::new();
        for (relation, child) in &table.one_to_one {
            let link = ParentLink { fk_field: &child.fk_field, id };
            results.insert(relation.clone(), self.upload_table(&child.table, row, mode, Some(link)).await?);
        }
        Ok(results)
    }
}
