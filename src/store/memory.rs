//! In-memory store used by the test suite and validate-only runs.

use std::sync::{Mutex, MutexGuard};

use indexmap::IndexMap;

use crate::{
    schema::TreeDefinition,
    value::{Fields, Value},
};

use super::{NewTreeNode, RecordId, Store, TreePathNode, assign_node_numbers, build_fullnames};

#[derive(Clone, Debug, Default)]
struct State {
    tables: IndexMap<String, IndexMap<RecordId, Fields>>,
    picklist_items: Vec<(i64, String)>,
    next_id: RecordId,
}

impl State {
    fn insert(&mut self, table: &str, values: Fields) -> RecordId {
        self.next_id += 1;
        let id = self.next_id;
        self.tables.entry(table.to_lowercase()).or_default().insert(id, values);
        id
    }
}

#[derive(Debug, Default)]
struct Inner {
    current: State,
    savepoints: Vec<State>,
}

/// A fully in-memory [`Store`]. Savepoints snapshot the whole state.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("no open savepoint")]
    NoSavepoint,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Seed a record directly; tests use this to arrange existing data.
    pub fn seed(&self, table: &str, values: Fields) -> RecordId {
        self.inner().current.insert(table, values)
    }

    pub fn count(&self, table: &str) -> usize {
        self.inner()
            .current
            .tables
            .get(&table.to_lowercase())
            .map(IndexMap::len)
            .unwrap_or(0)
    }

    pub fn record(&self, table: &str, id: RecordId) -> Option<Fields> {
        self.inner().current.tables.get(&table.to_lowercase())?.get(&id).cloned()
    }

    /// All records of a table in insertion order.
    pub fn records(&self, table: &str) -> Vec<(RecordId, Fields)> {
        self.inner()
            .current
            .tables
            .get(&table.to_lowercase())
            .map(|records| records.iter().map(|(id, fields)| (*id, fields.clone())).collect())
            .unwrap_or_default()
    }

    pub fn picklist_items(&self) -> Vec<(i64, String)> {
        self.inner().current.picklist_items.clone()
    }

    fn matches(record: &Fields, filter: &Fields) -> bool {
        filter.iter().all(|(field, expected)| {
            record.get(field).unwrap_or(&Value::Null) == expected
        })
    }
}

fn field_i64(record: &Fields, field: &str) -> Option<i64> {
    match record.get(field) {
        Some(Value::Integer(value)) => Some(*value),
        _ => None,
    }
}

fn field_str<'a>(record: &'a Fields, field: &str) -> Option<&'a str> {
    match record.get(field) {
        Some(Value::String(value)) => Some(value.as_str()),
        _ => None,
    }
}

impl Store for MemoryStore {
    type Error = MemoryError;

    async fn find_matching(&self, table: &str, filter: &Fields) -> Result<Vec<RecordId>, MemoryError> {
        let inner = self.inner();
        Ok(inner
            .current
            .tables
            .get(&table.to_lowercase())
            .map(|records| {
                records
                    .iter()
                    .filter(|(_, record)| Self::matches(record, filter))
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, table: &str, values: &Fields) -> Result<RecordId, MemoryError> {
        Ok(self.inner().current.insert(table, values.clone()))
    }

    async fn add_picklist_item(&self, picklist_id: i64, value: &str) -> Result<(), MemoryError> {
        self.inner().current.picklist_items.push((picklist_id, value.to_owned()));
        Ok(())
    }

    async fn match_tree_path(
        &self,
        table: &str,
        treedef_id: i64,
        path: &[TreePathNode<'_>],
    ) -> Result<Vec<RecordId>, MemoryError> {
        let Some(leaf) = path.last() else {
            return Ok(Vec::new());
        };
        let inner = self.inner();
        let Some(records) = inner.current.tables.get(&table.to_lowercase()) else {
            return Ok(Vec::new());
        };

        let mut ids = Vec::new();
        'candidates: for (id, record) in records {
            if field_i64(record, "definition") != Some(treedef_id)
                || field_i64(record, "rankid") != Some(i64::from(leaf.rank_id))
                || field_str(record, "name") != Some(leaf.name)
            {
                continue;
            }
            // walk the ancestor chain up to its parentless root
            let mut chain: Vec<(i64, &str)> = Vec::new();
            let mut current = record;
            loop {
                match field_i64(current, "parent") {
                    None => break,
                    Some(parent_id) => {
                        let Some(parent) = records.get(&parent_id) else {
                            continue 'candidates;
                        };
                        let Some(name) = field_str(parent, "name") else {
                            continue 'candidates;
                        };
                        let Some(rank_id) = field_i64(parent, "rankid") else {
                            continue 'candidates;
                        };
                        chain.push((rank_id, name));
                        current = parent;
                    }
                }
            }
            for node in &path[..path.len() - 1] {
                let wanted = (i64::from(node.rank_id), node.name);
                if !chain.iter().any(|have| *have == wanted) {
                    continue 'candidates;
                }
            }
            ids.push(*id);
        }
        Ok(ids)
    }

    async fn insert_tree_node(&self, table: &str, node: &NewTreeNode<'_>) -> Result<RecordId, MemoryError> {
        let mut values = Fields::new();
        values.insert("name".to_owned(), Value::String(node.name.to_owned()));
        values.insert("rankid".to_owned(), Value::Integer(i64::from(node.rank_id)));
        values.insert("definition".to_owned(), Value::Integer(node.treedef_id));
        values.insert(
            "parent".to_owned(),
            node.parent.map(Value::Integer).unwrap_or(Value::Null),
        );
        for (field, value) in node.extra {
            values.insert(field.clone(), value.clone());
        }
        Ok(self.inner().current.insert(table, values))
    }

    async fn savepoint(&self) -> Result<(), MemoryError> {
        let mut inner = self.inner();
        let snapshot = inner.current.clone();
        inner.savepoints.push(snapshot);
        Ok(())
    }

    async fn release_savepoint(&self) -> Result<(), MemoryError> {
        self.inner().savepoints.pop().ok_or(MemoryError::NoSavepoint)?;
        Ok(())
    }

    async fn rollback_savepoint(&self) -> Result<(), MemoryError> {
        let mut inner = self.inner();
        let snapshot = inner.savepoints.pop().ok_or(MemoryError::NoSavepoint)?;
        inner.current = snapshot;
        Ok(())
    }

    async fn renumber_tree(&self, table: &str, treedef_id: i64) -> Result<(), MemoryError> {
        let mut inner = self.inner();
        let Some(records) = inner.current.tables.get_mut(&table.to_lowercase()) else {
            return Ok(());
        };
        let nodes: Vec<(RecordId, Option<RecordId>)> = records
            .iter()
            .filter(|(_, record)| field_i64(record, "definition") == Some(treedef_id))
            .map(|(id, record)| (*id, field_i64(record, "parent")))
            .collect();
        for (id, node_number, highest) in assign_node_numbers(&nodes) {
            if let Some(record) = records.get_mut(&id) {
                record.insert("nodenumber".to_owned(), Value::Integer(node_number));
                record.insert("highestchildnodenumber".to_owned(), Value::Integer(highest));
            }
        }
        Ok(())
    }

    async fn reset_fullnames(&self, table: &str, definition: &TreeDefinition) -> Result<(), MemoryError> {
        let mut inner = self.inner();
        let Some(records) = inner.current.tables.get_mut(&table.to_lowercase()) else {
            return Ok(());
        };
        let nodes: Vec<(RecordId, Option<RecordId>, String, i32)> = records
            .iter()
            .filter(|(_, record)| field_i64(record, "definition") == Some(definition.id))
            .map(|(id, record)| {
                (
                    *id,
                    field_i64(record, "parent"),
                    field_str(record, "name").unwrap_or_default().to_owned(),
                    field_i64(record, "rankid").unwrap_or_default() as i32,
                )
            })
            .collect();
        for (id, fullname) in build_fullnames(&nodes, definition) {
            if let Some(record) = records.get_mut(&id) {
                record.insert("fullname".to_owned(), Value::String(fullname));
            }
        }
        Ok(())
    }
}
