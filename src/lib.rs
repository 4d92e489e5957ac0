//! Bulk-upload engine for spreadsheet-shaped collection data.
//!
//! An upload plan describes how the columns of a staged dataset map onto a
//! graph of related records: one root entity, its to-one and to-many
//! relations, and rank-ordered tree hierarchies. Each bound row either
//! materializes that graph, matches existing records, or reports structured
//! per-cell failures.

pub mod parsing;
pub mod plan;
pub mod schema;
pub mod store;
pub mod uiformat;
pub mod upload;
pub mod value;

#[cfg(test)]
mod tests;

/// Structural failures: a plan that cannot be compiled against the schema
/// metadata or bound to a dataset. These fail the whole upload before any
/// row is processed. Per-cell problems are reported in band as
/// [`parsing::CellIssue`]s instead and never abort the run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid upload plan: {0}")]
    PlanJson(#[from] serde_json::Error),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown field: {table}.{field}")]
    UnknownField { table: String, field: String },
    #[error("unknown relationship: {table}.{relation}")]
    UnknownRelationship { table: String, relation: String },
    #[error("duplicate caption in {table} mapping: {caption}")]
    DuplicateCaption { table: String, caption: String },
    #[error("static value for {table}.{field} must be a scalar")]
    NonScalarStatic { table: String, field: String },
    #[error("to-many records cannot nest further to-many collections: {table}.{relation}")]
    NestedToMany { table: String, relation: String },
    #[error("rank {rank} has no name column")]
    MissingNameColumn { rank: String },
    #[error("no tree definition for {table} in discipline {discipline}")]
    NoTreeDefinition { table: String, discipline: i64 },
    #[error("rank {rank} is not part of tree definition {tree}")]
    UnknownRank { rank: String, tree: String },
    #[error("unresolved picklist: {0}")]
    UnknownPicklist(String),
    #[error("unresolved formatter: {0}")]
    UnknownFormatter(String),
    #[error("column {0} is not present in the dataset")]
    MissingColumn(String),
}
