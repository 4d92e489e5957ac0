//! The recursive upload-plan data model.
//!
//! A plan describes how spreadsheet columns map onto one root entity, its
//! to-one and to-many relations and tree hierarchies. Plans arrive as JSON,
//! are validated against the schema metadata (which also resolves relation
//! names to their target entities), and compile to a scoped form before rows
//! are bound to them.

use std::collections::HashSet;

use indexmap::{IndexMap, indexmap};
use serde::{Deserialize, Serialize};

use crate::{Error, schema::SchemaMetadata};

pub mod bind;
pub mod scoping;

/// How a mapped column participates in matching.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchBehavior {
    #[default]
    IgnoreNever,
    IgnoreWhenBlank,
    IgnoreAlways,
}

/// Per-column mapping options. Most plans use the bare-caption shorthand,
/// which serialization collapses back to.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnOptions {
    pub column: String,
    pub match_behavior: MatchBehavior,
    pub null_allowed: bool,
    pub default: Option<String>,
}

impl ColumnOptions {
    pub fn plain(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            match_behavior: MatchBehavior::IgnoreNever,
            null_allowed: true,
            default: None,
        }
    }

    fn is_plain(&self) -> bool {
        self.match_behavior == MatchBehavior::IgnoreNever && self.null_allowed && self.default.is_none()
    }
}

/// A parsed upload plan: the root entity plus its recursive upload shape.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadPlan {
    pub base_table: String,
    pub uploadable: Uploadable,
}

/// The polymorphic node kinds of a plan.
#[derive(Clone, Debug, PartialEq)]
pub enum Uploadable {
    UploadTable(UploadTable),
    /// like a table node, but matched within its parent's scope
    OneToOneTable(UploadTable),
    /// references existing data, never creates
    MustMatchTable(UploadTable),
    TreeRecord(TreeRecord),
}

/// A plain plan node targeting one entity.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadTable {
    pub name: String,
    pub wbcols: IndexMap<String, ColumnOptions>,
    pub statics: IndexMap<String, serde_json::Value>,
    pub to_one: IndexMap<String, Uploadable>,
    pub to_many: IndexMap<String, Vec<ToManyRecord>>,
}

/// One element of a to-many collection. Same interior shape as a table node
/// but without further to-many nesting.
#[derive(Clone, Debug, PartialEq)]
pub struct ToManyRecord {
    pub name: String,
    pub wbcols: IndexMap<String, ColumnOptions>,
    pub statics: IndexMap<String, serde_json::Value>,
    pub to_one: IndexMap<String, Uploadable>,
}

/// A plan node targeting a rank-ordered tree hierarchy. Each rank maps tree
/// columns (at least `name`) to spreadsheet captions.
#[derive(Clone, Debug, PartialEq)]
pub struct TreeRecord {
    pub name: String,
    pub ranks: IndexMap<String, IndexMap<String, ColumnOptions>>,
}

// ---------------------------------------------------------------------------
// wire format

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawPlan {
    base_table_name: String,
    uploadable: RawUploadable,
}

#[derive(Serialize, Deserialize)]
enum RawUploadable {
    #[serde(rename = "uploadTable")]
    UploadTable(RawTable),
    #[serde(rename = "oneToOneTable")]
    OneToOneTable(RawTable),
    #[serde(rename = "mustMatchTable")]
    MustMatchTable(RawTable),
    #[serde(rename = "treeRecord")]
    TreeRecord(RawTree),
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawTable {
    #[serde(default)]
    wbcols: IndexMap<String, RawColumnOptions>,
    #[serde(default, rename = "static")]
    statics: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    to_one: IndexMap<String, RawUploadable>,
    #[serde(default)]
    to_many: IndexMap<String, Vec<RawTable>>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTree {
    ranks: IndexMap<String, RawRank>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawRank {
    Caption(String),
    Columns {
        #[serde(rename = "treeNodeCols")]
        tree_node_cols: IndexMap<String, RawColumnOptions>,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawColumnOptions {
    Plain(String),
    Full {
        column: String,
        #[serde(default, rename = "matchBehavior")]
        match_behavior: MatchBehavior,
        #[serde(default = "default_true", rename = "nullAllowed")]
        null_allowed: bool,
        #[serde(default)]
        default: Option<String>,
    },
}

fn default_true() -> bool {
    true
}

impl From<RawColumnOptions> for ColumnOptions {
    fn from(raw: RawColumnOptions) -> Self {
        match raw {
            RawColumnOptions::Plain(column) => Self::plain(column),
            RawColumnOptions::Full { column, match_behavior, null_allowed, default } => Self {
                column,
                match_behavior,
                null_allowed,
                default,
            },
        }
    }
}

impl From<&ColumnOptions> for RawColumnOptions {
    fn from(options: &ColumnOptions) -> Self {
        if options.is_plain() {
            Self::Plain(options.column.clone())
        } else {
            Self::Full {
                column: options.column.clone(),
                match_behavior: options.match_behavior,
                null_allowed: options.null_allowed,
                default: options.default.clone(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// parsing and validation

impl UploadPlan {
    /// Parse and validate a plan document against the schema metadata.
    pub fn parse(metadata: &SchemaMetadata, json: &serde_json::Value) -> Result<Self, Error> {
        let raw: RawPlan = serde_json::from_value(json.clone())?;
        let uploadable = resolve_uploadable(metadata, &raw.base_table_name, raw.uploadable)?;
        Ok(Self { base_table: raw.base_table_name, uploadable })
    }

    /// Serialize back to the wire format. Shorthand column options and ranks
    /// normalize; everything else round-trips.
    pub fn to_json(&self) -> serde_json::Value {
        let raw = RawPlan {
            base_table_name: self.base_table.clone(),
            uploadable: unresolve_uploadable(&self.uploadable),
        };
        serde_json::to_value(raw).unwrap()
    }
}

fn resolve_uploadable(
    metadata: &SchemaMetadata,
    table: &str,
    raw: RawUploadable,
) -> Result<Uploadable, Error> {
    if metadata.table(table).is_none() {
        return Err(Error::UnknownTable(table.to_owned()));
    }
    Ok(match raw {
        RawUploadable::UploadTable(t) => Uploadable::UploadTable(resolve_table(metadata, table, t)?),
        RawUploadable::OneToOneTable(t) => {
            Uploadable::OneToOneTable(resolve_table(metadata, table, t)?)
        }
        RawUploadable::MustMatchTable(t) => {
            Uploadable::MustMatchTable(resolve_table(metadata, table, t)?)
        }
        RawUploadable::TreeRecord(t) => Uploadable::TreeRecord(resolve_tree(metadata, table, t)?),
    })
}

fn resolve_table(metadata: &SchemaMetadata, table: &str, raw: RawTable) -> Result<UploadTable, Error> {
    let wbcols = resolve_wbcols(metadata, table, raw.wbcols)?;
    validate_statics(metadata, table, &raw.statics)?;

    let mut to_one = IndexMap::new();
    for (relation, child) in raw.to_one {
        let target = related_table(metadata, table, &relation)?;
        to_one.insert(relation, resolve_uploadable(metadata, &target, child)?);
    }

    let mut to_many = IndexMap::new();
    for (relation, records) in raw.to_many {
        let target = related_table(metadata, table, &relation)?;
        let records = records
            .into_iter()
            .map(|record| resolve_to_many_record(metadata, table, &relation, &target, record))
            .collect::<Result<Vec<_>, _>>()?;
        to_many.insert(relation, records);
    }

    Ok(UploadTable { name: table.to_owned(), wbcols, statics: raw.statics, to_one, to_many })
}

fn resolve_to_many_record(
    metadata: &SchemaMetadata,
    parent: &str,
    relation: &str,
    table: &str,
    raw: RawTable,
) -> Result<ToManyRecord, Error> {
    if !raw.to_many.is_empty() {
        return Err(Error::NestedToMany { table: parent.to_owned(), relation: relation.to_owned() });
    }
    let wbcols = resolve_wbcols(metadata, table, raw.wbcols)?;
    validate_statics(metadata, table, &raw.statics)?;
    let mut to_one = IndexMap::new();
    for (relation, child) in raw.to_one {
        let target = related_table(metadata, table, &relation)?;
        to_one.insert(relation, resolve_uploadable(metadata, &target, child)?);
    }
    Ok(ToManyRecord { name: table.to_owned(), wbcols, statics: raw.statics, to_one })
}

fn resolve_tree(metadata: &SchemaMetadata, table: &str, raw: RawTree) -> Result<TreeRecord, Error> {
    let mut ranks = IndexMap::new();
    for (rank, raw_rank) in raw.ranks {
        let columns: IndexMap<String, ColumnOptions> = match raw_rank {
            RawRank::Caption(caption) => indexmap! { "name".to_owned() => ColumnOptions::plain(caption) },
            RawRank::Columns { tree_node_cols } => tree_node_cols
                .into_iter()
                .map(|(column, options)| (column, options.into()))
                .collect(),
        };
        if !columns.contains_key("name") {
            return Err(Error::MissingNameColumn { rank });
        }
        for column in columns.keys() {
            if !metadata.has_field(table, column) {
                return Err(Error::UnknownField { table: table.to_owned(), field: column.clone() });
            }
        }
        ranks.insert(rank, columns);
    }
    Ok(TreeRecord { name: table.to_owned(), ranks })
}

fn resolve_wbcols(
    metadata: &SchemaMetadata,
    table: &str,
    raw: IndexMap<String, RawColumnOptions>,
) -> Result<IndexMap<String, ColumnOptions>, Error> {
    let mut captions = HashSet::new();
    let mut wbcols = IndexMap::new();
    for (field, options) in raw {
        if !metadata.has_field(table, &field) {
            return Err(Error::UnknownField { table: table.to_owned(), field });
        }
        let options = ColumnOptions::from(options);
        if !captions.insert(options.column.clone()) {
            return Err(Error::DuplicateCaption { table: table.to_owned(), caption: options.column });
        }
        wbcols.insert(field, options);
    }
    Ok(wbcols)
}

fn validate_statics(
    metadata: &SchemaMetadata,
    table: &str,
    statics: &IndexMap<String, serde_json::Value>,
) -> Result<(), Error> {
    for (field, value) in statics {
        if !metadata.has_field(table, field) {
            return Err(Error::UnknownField { table: table.to_owned(), field: field.clone() });
        }
        if value.is_array() || value.is_object() {
            return Err(Error::NonScalarStatic { table: table.to_owned(), field: field.clone() });
        }
    }
    Ok(())
}

fn related_table(metadata: &SchemaMetadata, table: &str, relation: &str) -> Result<String, Error> {
    metadata
        .relationship(table, relation)
        .map(|rel| rel.table.clone())
        .ok_or_else(|| Error::UnknownRelationship {
            table: table.to_owned(),
            relation: relation.to_owned(),
        })
}

// ---------------------------------------------------------------------------
// serialization back to the wire format

fn unresolve_uploadable(uploadable: &Uploadable) -> RawUploadable {
    match uploadable {
        Uploadable::UploadTable(t) => RawUploadable::UploadTable(unresolve_table(t)),
        Uploadable::OneToOneTable(t) => RawUploadable::OneToOneTable(unresolve_table(t)),
        Uploadable::MustMatchTable(t) => RawUploadable::MustMatchTable(unresolve_table(t)),
        Uploadable::TreeRecord(t) => RawUploadable::TreeRecord(unresolve_tree(t)),
    }
}

fn unresolve_table(table: &UploadTable) -> RawTable {
    RawTable {
        wbcols: table.wbcols.iter().map(|(f, o)| (f.clone(), o.into())).collect(),
        statics: table.statics.clone(),
        to_one: table
            .to_one
            .iter()
            .map(|(relation, child)| (relation.clone(), unresolve_uploadable(child)))
            .collect(),
        to_many: table
            .to_many
            .iter()
            .map(|(relation, records)| {
                (
                    relation.clone(),
                    records
                        .iter()
                        .map(|record| RawTable {
                            wbcols: record.wbcols.iter().map(|(f, o)| (f.clone(), o.into())).collect(),
                            statics: record.statics.clone(),
                            to_one: record
                                .to_one
                                .iter()
                                .map(|(r, child)| (r.clone(), unresolve_uploadable(child)))
                                .collect(),
                            to_many: IndexMap::new(),
                        })
                        .collect(),
                )
            })
            .collect(),
    }
}

fn unresolve_tree(tree: &TreeRecord) -> RawTree {
    RawTree {
        ranks: tree
            .ranks
            .iter()
            .map(|(rank, columns)| {
                let raw_rank = match columns.get_index(0) {
                    Some((column, options))
                        if columns.len() == 1 && column == "name" && options.is_plain() =>
                    {
                        RawRank::Caption(options.column.clone())
                    }
                    _ => RawRank::Columns {
                        tree_node_cols: columns.iter().map(|(c, o)| (c.clone(), o.into())).collect(),
                    },
                };
                (rank.clone(), raw_rank)
            })
            .collect(),
    }
}
