//! Schema metadata consulted during plan compilation and cell parsing.
//!
//! Everything here is plain read-only data: per-field requiredness, picklist
//! and formatter bindings, relationships and tree definitions. The metadata
//! is loaded from the store once per run (or built directly in tests) and
//! shared across rows.

use indexmap::IndexMap;

use crate::{uiformat::UiFormatter, value::Fields};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Datatype {
    #[default]
    Text,
    Boolean,
    Integer,
    Double,
    Date,
}

impl std::str::FromStr for Datatype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "boolean" => Ok(Self::Boolean),
            "integer" => Ok(Self::Integer),
            "double" => Ok(Self::Double),
            "date" => Ok(Self::Date),
            other => Err(format!("unknown datatype {other}")),
        }
    }
}

/// Per-field metadata. A field missing from the metadata is treated as an
/// optional plain-text field.
#[derive(Clone, Debug, Default)]
pub struct FieldInfo {
    pub required: bool,
    pub picklist: Option<String>,
    pub uiformatter: Option<String>,
    pub datatype: Datatype,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PicklistKind {
    /// items live in the picklist itself
    Items,
    /// items are rows of some table; only used on forms
    RowsOfTable,
    /// items are values of a field in some table; only used on forms
    FieldOfTable,
}

impl std::str::FromStr for PicklistKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "items" => Ok(Self::Items),
            "rows_of_table" => Ok(Self::RowsOfTable),
            "field_of_table" => Ok(Self::FieldOfTable),
            other => Err(format!("unknown picklist kind {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Picklist {
    pub id: i64,
    pub name: String,
    pub readonly: bool,
    pub kind: PicklistKind,
    /// item title to stored value; `Items` kind only
    pub items: IndexMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct TreeRank {
    pub rank_id: i32,
    pub name: String,
    /// enforced ranks must have a record on every path
    pub enforced: bool,
    pub is_in_fullname: bool,
}

/// The configuration of one tree hierarchy: its ranks ordered root to leaf
/// by ascending rank id.
#[derive(Clone, Debug)]
pub struct TreeDefinition {
    pub id: i64,
    pub name: String,
    pub ranks: Vec<TreeRank>,
}

/// A named relation between two entities.
///
/// For to-one relations `fk_field` names the foreign key on the owning
/// record; for to-many and one-to-one relations it names the foreign key on
/// the child pointing back at the parent.
#[derive(Clone, Debug)]
pub struct Relationship {
    pub table: String,
    pub fk_field: String,
    /// order-number field assigned densely over a to-many collection
    pub order_field: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct TableInfo {
    pub fields: IndexMap<String, FieldInfo>,
    pub relationships: IndexMap<String, Relationship>,
}

/// The scoping context of one upload run.
#[derive(Clone, Debug)]
pub struct Collection {
    pub id: i64,
    pub discipline_id: i64,
    /// per-table static defaults merged into every scoped node of that table
    pub defaults: IndexMap<String, Fields>,
}

/// Read-only schema metadata shared across rows. All lookups are
/// case-insensitive on table and field names.
#[derive(Clone, Debug, Default)]
pub struct SchemaMetadata {
    tables: IndexMap<String, TableInfo>,
    picklists: IndexMap<String, Picklist>,
    formatters: IndexMap<String, UiFormatter>,
    tree_definitions: IndexMap<i64, IndexMap<String, TreeDefinition>>,
}

impl SchemaMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, name: &str) -> &mut TableInfo {
        self.tables.entry(name.to_lowercase()).or_default()
    }

    pub fn add_picklist(&mut self, picklist: Picklist) {
        self.picklists.insert(picklist.name.clone(), picklist);
    }

    pub fn add_formatter(&mut self, formatter: UiFormatter) {
        self.formatters.insert(formatter.name().to_owned(), formatter);
    }

    pub fn add_tree_definition(&mut self, discipline_id: i64, table: &str, definition: TreeDefinition) {
        self.tree_definitions
            .entry(discipline_id)
            .or_default()
            .insert(table.to_lowercase(), definition);
    }

    pub fn table(&self, table: &str) -> Option<&TableInfo> {
        self.tables.get(&table.to_lowercase())
    }

    pub fn has_field(&self, table: &str, field: &str) -> bool {
        self.table(table)
            .is_some_and(|info| info.fields.contains_key(&field.to_lowercase()))
    }

    pub fn field_info(&self, table: &str, field: &str) -> Option<&FieldInfo> {
        self.table(table)?.fields.get(&field.to_lowercase())
    }

    pub fn relationship(&self, table: &str, relation: &str) -> Option<&Relationship> {
        self.table(table)?.relationships.get(&relation.to_lowercase())
    }

    pub fn picklist(&self, name: &str) -> Option<&Picklist> {
        self.picklists.get(name)
    }

    pub fn formatter(&self, name: &str) -> Option<&UiFormatter> {
        self.formatters.get(name)
    }

    pub fn tree_definition(&self, discipline_id: i64, table: &str) -> Option<&TreeDefinition> {
        self.tree_definitions.get(&discipline_id)?.get(&table.to_lowercase())
    }
}

impl TableInfo {
    /// Register a field, replacing any previous definition.
    pub fn field(&mut self, name: &str, info: FieldInfo) -> &mut Self {
        self.fields.insert(name.to_lowercase(), info);
        self
    }

    /// Register several optional plain-text fields at once.
    pub fn plain_fields(&mut self, names: &[&str]) -> &mut Self {
        for name in names {
            self.field(name, FieldInfo::default());
        }
        self
    }

    pub fn relationship(&mut self, relation: &str, rel: Relationship) -> &mut Self {
        self.relationships.insert(relation.to_lowercase(), rel);
        self
    }
}
