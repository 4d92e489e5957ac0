//! Collection scoping: resolving a plan against a concrete collection.
//!
//! Scoping runs once per (plan, collection). It attaches tree definitions,
//! converts static values to their typed form, overlays collection defaults,
//! assigns dense order numbers to ordered to-many collections and checks
//! that every picklist and formatter binding resolves.

use indexmap::IndexMap;

use crate::{
    Error,
    plan::{ColumnOptions, ToManyRecord, TreeRecord, UploadPlan, UploadTable, Uploadable},
    schema::{Collection, SchemaMetadata, TreeRank},
    value::{Fields, Value},
};

/// A plan node resolved against a collection, ready to bind rows.
#[derive(Clone, Debug)]
pub enum ScopedUploadable {
    Table(ScopedTable),
    Tree(ScopedTree),
}

#[derive(Clone, Debug)]
pub struct ScopedTable {
    pub name: String,
    /// creation suppressed; a missing match yields `NoMatch`
    pub must_match: bool,
    pub wbcols: IndexMap<String, ColumnOptions>,
    pub statics: Fields,
    /// children whose foreign key lives on this record, evaluated first
    pub to_one: IndexMap<String, ScopedToOne>,
    /// one-to-one children carry the foreign key themselves and are
    /// materialized after this record, scoped to it
    pub one_to_one: IndexMap<String, ScopedChild>,
    pub to_many: IndexMap<String, ScopedToMany>,
}

#[derive(Clone, Debug)]
pub struct ScopedToOne {
    /// foreign-key field on the parent
    pub fk_field: String,
    pub uploadable: ScopedUploadable,
}

/// A deferred child record keyed back to its parent.
#[derive(Clone, Debug)]
pub struct ScopedChild {
    /// foreign-key field on the child pointing at the parent
    pub fk_field: String,
    pub table: ScopedTable,
}

#[derive(Clone, Debug)]
pub struct ScopedToMany {
    /// foreign-key field on the element records pointing at the parent
    pub fk_field: String,
    pub records: Vec<ScopedTable>,
}

/// A tree plan node with its definition attached.
#[derive(Clone, Debug)]
pub struct ScopedTree {
    pub name: String,
    pub treedef_id: i64,
    pub must_match: bool,
    /// every rank of the tree definition root to leaf, with the plan's
    /// column mapping where one exists
    pub items: Vec<ScopedTreeItem>,
}

#[derive(Clone, Debug)]
pub struct ScopedTreeItem {
    pub rank: TreeRank,
    pub columns: Option<IndexMap<String, ColumnOptions>>,
}

/// Resolve a parsed plan against a collection.
pub fn apply_scoping(
    plan: &UploadPlan,
    metadata: &SchemaMetadata,
    collection: &Collection,
) -> Result<ScopedUploadable, Error> {
    scope_uploadable(&plan.uploadable, metadata, collection)
}

fn scope_uploadable(
    uploadable: &Uploadable,
    metadata: &SchemaMetadata,
    collection: &Collection,
) -> Result<ScopedUploadable, Error> {
    match uploadable {
        Uploadable::UploadTable(table) | Uploadable::OneToOneTable(table) => {
            scope_table(table, metadata, collection, false).map(ScopedUploadable::Table)
        }
        Uploadable::MustMatchTable(table) => {
            scope_table(table, metadata, collection, true).map(ScopedUploadable::Table)
        }
        Uploadable::TreeRecord(tree) => {
            scope_tree(tree, metadata, collection).map(ScopedUploadable::Tree)
        }
    }
}

fn scope_table(
    table: &UploadTable,
    metadata: &SchemaMetadata,
    collection: &Collection,
    must_match: bool,
) -> Result<ScopedTable, Error> {
    check_bindings(metadata, &table.name, table.wbcols.keys())?;
    let statics = scoped_statics(&table.name, &table.statics, collection);

    let (to_one, one_to_one) = scope_to_one_children(&table.name, &table.to_one, metadata, collection)?;

    let mut to_many = IndexMap::new();
    for (relation, records) in &table.to_many {
        let rel = metadata
            .relationship(&table.name, relation)
            .ok_or_else(|| Error::UnknownRelationship {
                table: table.name.clone(),
                relation: relation.clone(),
            })?
            .clone();
        let mut scoped_records = records
            .iter()
            .map(|record| scope_to_many_record(record, metadata, collection))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(order_field) = &rel.order_field {
            // dense zero-based order, explicit statics win
            for (index, record) in scoped_records.iter_mut().enumerate() {
                record
                    .statics
                    .entry(order_field.clone())
                    .or_insert(Value::Integer(index as i64));
            }
        }
        to_many.insert(
            relation.clone(),
            ScopedToMany { fk_field: rel.fk_field, records: scoped_records },
        );
    }

    Ok(ScopedTable {
        name: table.name.clone(),
        must_match,
        wbcols: table.wbcols.clone(),
        statics,
        to_one,
        one_to_one,
        to_many,
    })
}

fn scope_to_many_record(
    record: &ToManyRecord,
    metadata: &SchemaMetadata,
    collection: &Collection,
) -> Result<ScopedTable, Error> {
    check_bindings(metadata, &record.name, record.wbcols.keys())?;
    let statics = scoped_statics(&record.name, &record.statics, collection);
    let (to_one, one_to_one) = scope_to_one_children(&record.name, &record.to_one, metadata, collection)?;
    Ok(ScopedTable {
        name: record.name.clone(),
        must_match: false,
        wbcols: record.wbcols.clone(),
        statics,
        to_one,
        one_to_one,
        to_many: IndexMap::new(),
    })
}

type ToOneChildren = (IndexMap<String, ScopedToOne>, IndexMap<String, ScopedChild>);

fn scope_to_one_children(
    table: &str,
    children: &IndexMap<String, Uploadable>,
    metadata: &SchemaMetadata,
    collection: &Collection,
) -> Result<ToOneChildren, Error> {
    let mut to_one = IndexMap::new();
    let mut one_to_one = IndexMap::new();
    for (relation, child) in children {
        let rel = metadata
            .relationship(table, relation)
            .ok_or_else(|| Error::UnknownRelationship {
                table: table.to_owned(),
                relation: relation.clone(),
            })?
            .clone();
        match child {
            Uploadable::OneToOneTable(inner) => {
                one_to_one.insert(
                    relation.clone(),
                    ScopedChild {
                        fk_field: rel.fk_field,
                        table: scope_table(inner, metadata, collection, false)?,
                    },
                );
            }
            other => {
                to_one.insert(
                    relation.clone(),
                    ScopedToOne {
                        fk_field: rel.fk_field,
                        uploadable: scope_uploadable(other, metadata, collection)?,
                    },
                );
            }
        }
    }
    Ok((to_one, one_to_one))
}

fn scope_tree(
    tree: &TreeRecord,
    metadata: &SchemaMetadata,
    collection: &Collection,
) -> Result<ScopedTree, Error> {
    let definition = metadata
        .tree_definition(collection.discipline_id, &tree.name)
        .ok_or_else(|| Error::NoTreeDefinition {
            table: tree.name.clone(),
            discipline: collection.discipline_id,
        })?;

    for (rank, columns) in &tree.ranks {
        if !definition.ranks.iter().any(|r| r.name == *rank) {
            return Err(Error::UnknownRank { rank: rank.clone(), tree: definition.name.clone() });
        }
        check_bindings(metadata, &tree.name, columns.keys())?;
    }

    let items = definition
        .ranks
        .iter()
        .map(|rank| ScopedTreeItem {
            rank: rank.clone(),
            columns: tree.ranks.get(&rank.name).cloned(),
        })
        .collect();

    Ok(ScopedTree {
        name: tree.name.clone(),
        treedef_id: definition.id,
        must_match: false,
        items,
    })
}

fn scoped_statics(
    table: &str,
    statics: &IndexMap<String, serde_json::Value>,
    collection: &Collection,
) -> Fields {
    let mut fields: Fields = statics
        .iter()
        .map(|(field, value)| (field.clone(), Value::from(value.clone())))
        .collect();
    if let Some(defaults) = collection.defaults.get(&table.to_lowercase()) {
        for (field, value) in defaults {
            fields.entry(field.clone()).or_insert_with(|| value.clone());
        }
    }
    fields
}

/// Every picklist and formatter referenced by the mapped fields must exist.
fn check_bindings<'a>(
    metadata: &SchemaMetadata,
    table: &str,
    fields: impl Iterator<Item = &'a String>,
) -> Result<(), Error> {
    for field in fields {
        let Some(info) = metadata.field_info(table, field) else {
            continue;
        };
        if let Some(picklist) = &info.picklist {
            if metadata.picklist(picklist).is_none() {
                return Err(Error::UnknownPicklist(picklist.clone()));
            }
        }
        if let Some(formatter) = &info.uiformatter {
            if metadata.formatter(formatter).is_none() {
                return Err(Error::UnknownFormatter(formatter.clone()));
            }
        }
    }
    Ok(())
}

impl ScopedUploadable {
    /// Every tree record reachable from this node.
    pub fn trees(&self) -> Vec<&ScopedTree> {
        let mut out = Vec::new();
        self.collect_trees(&mut out);
        out
    }

    fn collect_trees<'a>(&'a self, out: &mut Vec<&'a ScopedTree>) {
        match self {
            Self::Table(table) => table.collect_trees(out),
            Self::Tree(tree) => out.push(tree),
        }
    }
}

impl ScopedTable {
    fn collect_trees<'a>(&'a self, out: &mut Vec<&'a ScopedTree>) {
        for child in self.to_one.values() {
            child.uploadable.collect_trees(out);
        }
        for child in self.one_to_one.values() {
            child.table.collect_trees(out);
        }
        for collection in self.to_many.values() {
            for record in &collection.records {
                record.collect_trees(out);
            }
        }
    }
}
