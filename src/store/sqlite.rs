//! SQLite-backed store, plus loading of datasets, collections and schema
//! metadata from their staging tables.

use std::str::FromStr;

use indexmap::IndexMap;
use itertools::Itertools;
use sqlx::{
    FromRow, Row as _,
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
};
use tracing::debug;

use crate::{
    schema::{
        Collection, Datatype, FieldInfo, Picklist, PicklistKind, Relationship, SchemaMetadata,
        TreeDefinition, TreeRank,
    },
    uiformat::{FormatterField, UiFormatter},
    value::{Fields, Row, Value},
};

use super::{NewTreeNode, RecordId, Store, TreePathNode, assign_node_numbers, build_fullnames};

pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(Debug, thiserror::Error)]
pub enum SqliteError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),
    #[error("dataset {0} does not exist")]
    NoSuchDataset(i64),
    #[error("collection {0} does not exist")]
    NoSuchCollection(i64),
    #[error("malformed {what} in database: {detail}")]
    Malformed { what: &'static str, detail: String },
}

fn malformed(what: &'static str) -> impl FnOnce(serde_json::Error) -> SqliteError {
    move |error| SqliteError::Malformed { what, detail: error.to_string() }
}

/// A staged dataset: its columns, rows and attached upload plan.
pub struct Dataset {
    pub id: i64,
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub plan: serde_json::Value,
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_value<'q>(query: SqliteQuery<'q>, value: &'q Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<i64>),
        Value::Boolean(b) => query.bind(*b),
        Value::Integer(i) => query.bind(*i),
        Value::Double(d) => query.bind(*d),
        Value::String(s) => query.bind(s.as_str()),
        Value::Date(date) => query.bind(*date),
    }
}

impl SqliteStore {
    pub async fn open(url: &str) -> Result<Self, SqliteError> {
        let options = SqliteConnectOptions::from_str(url)?;
        // savepoints are connection scoped
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<(), SqliteError> {
        sqlx::query("BEGIN").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn commit(&self) -> Result<(), SqliteError> {
        sqlx::query("COMMIT").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn rollback(&self) -> Result<(), SqliteError> {
        sqlx::query("ROLLBACK").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn load_dataset(&self, id: i64) -> Result<Dataset, SqliteError> {
        let row = sqlx::query("SELECT id, name, columns, plan FROM dataset WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SqliteError::NoSuchDataset(id))?;
        let name: String = row.try_get("name")?;
        let columns: Vec<String> =
            serde_json::from_str(row.try_get("columns")?).map_err(malformed("dataset columns"))?;
        let plan: serde_json::Value =
            serde_json::from_str(row.try_get("plan")?).map_err(malformed("upload plan"))?;

        let cell_rows =
            sqlx::query("SELECT cells FROM dataset_row WHERE dataset_id = ? ORDER BY rownumber")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;
        let mut rows = Vec::with_capacity(cell_rows.len());
        for cell_row in cell_rows {
            let cells: Vec<String> =
                serde_json::from_str(cell_row.try_get("cells")?).map_err(malformed("row cells"))?;
            rows.push(columns.iter().cloned().zip(cells).collect());
        }
        debug!(dataset = id, rows = rows.len(), "dataset loaded");
        Ok(Dataset { id, name, columns, rows, plan })
    }

    pub async fn load_collection(&self, id: i64) -> Result<Collection, SqliteError> {
        let row = sqlx::query("SELECT discipline_id FROM collection WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SqliteError::NoSuchCollection(id))?;
        let discipline_id: i64 = row.try_get("discipline_id")?;

        #[derive(FromRow)]
        struct DefaultRow {
            tablename: String,
            fieldname: String,
            value: String,
        }
        let mut defaults: IndexMap<String, Fields> = IndexMap::new();
        let rows = sqlx::query_as::<_, DefaultRow>(
            "SELECT tablename, fieldname, value FROM collection_default WHERE collection_id = ?",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let value: serde_json::Value =
                serde_json::from_str(&row.value).map_err(malformed("collection default"))?;
            defaults
                .entry(row.tablename.to_lowercase())
                .or_default()
                .insert(row.fieldname.to_lowercase(), Value::from(value));
        }
        Ok(Collection { id, discipline_id, defaults })
    }

    pub async fn load_metadata(&self) -> Result<SchemaMetadata, SqliteError> {
        let mut metadata = SchemaMetadata::new();

        #[derive(FromRow)]
        struct FieldRow {
            tablename: String,
            fieldname: String,
            required: bool,
            picklist: Option<String>,
            uiformatter: Option<String>,
            datatype: String,
        }
        let fields = sqlx::query_as::<_, FieldRow>(
            "SELECT tablename, fieldname, required, picklist, uiformatter, datatype FROM field_info",
        )
        .fetch_all(&self.pool)
        .await?;
        for field in fields {
            let datatype = Datatype::from_str(&field.datatype)
                .map_err(|detail| SqliteError::Malformed { what: "field datatype", detail })?;
            metadata.add_table(&field.tablename).field(
                &field.fieldname,
                FieldInfo {
                    required: field.required,
                    picklist: field.picklist,
                    uiformatter: field.uiformatter,
                    datatype,
                },
            );
        }

        #[derive(FromRow)]
        struct RelationshipRow {
            tablename: String,
            relname: String,
            target: String,
            fk_field: String,
            order_field: Option<String>,
        }
        let relationships = sqlx::query_as::<_, RelationshipRow>(
            "SELECT tablename, relname, target, fk_field, order_field FROM relationship",
        )
        .fetch_all(&self.pool)
        .await?;
        for rel in relationships {
            metadata.add_table(&rel.tablename).relationship(
                &rel.relname,
                Relationship { table: rel.target, fk_field: rel.fk_field, order_field: rel.order_field },
            );
        }

        #[derive(FromRow)]
        struct PicklistRow {
            id: i64,
            name: String,
            readonly: bool,
            kind: String,
        }
        let picklists = sqlx::query_as::<_, PicklistRow>(
            "SELECT id, name, readonly, kind FROM picklist",
        )
        .fetch_all(&self.pool)
        .await?;
        for picklist in picklists {
            let kind = PicklistKind::from_str(&picklist.kind)
                .map_err(|detail| SqliteError::Malformed { what: "picklist kind", detail })?;
            let items = sqlx::query("SELECT title, value FROM picklist_item WHERE picklist_id = ?")
                .bind(picklist.id)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|row| Ok((row.try_get("title")?, row.try_get("value")?)))
                .collect::<Result<IndexMap<String, String>, sqlx::Error>>()?;
            metadata.add_picklist(Picklist {
                id: picklist.id,
                name: picklist.name,
                readonly: picklist.readonly,
                kind,
                items,
            });
        }

        let formatters = sqlx::query("SELECT name, fields FROM uiformatter")
            .fetch_all(&self.pool)
            .await?;
        for row in formatters {
            let name: String = row.try_get("name")?;
            let fields: Vec<FormatterField> = serde_json::from_str(row.try_get("fields")?)
                .map_err(malformed("formatter fields"))?;
            metadata.add_formatter(UiFormatter::new(name, fields));
        }

        #[derive(FromRow)]
        struct TreeDefRow {
            id: i64,
            discipline_id: i64,
            tablename: String,
            name: String,
        }
        let definitions = sqlx::query_as::<_, TreeDefRow>(
            "SELECT id, discipline_id, tablename, name FROM tree_definition",
        )
        .fetch_all(&self.pool)
        .await?;
        for definition in definitions {
            #[derive(FromRow)]
            struct RankRow {
                rank_id: i64,
                name: String,
                enforced: bool,
                is_in_fullname: bool,
            }
            let ranks = sqlx::query_as::<_, RankRow>(
                "SELECT rank_id, name, enforced, is_in_fullname FROM tree_rank \
                 WHERE treedef_id = ? ORDER BY rank_id",
            )
            .bind(definition.id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|rank| TreeRank {
                rank_id: rank.rank_id as i32,
                name: rank.name,
                enforced: rank.enforced,
                is_in_fullname: rank.is_in_fullname,
            })
            .collect();
            metadata.add_tree_definition(
                definition.discipline_id,
                &definition.tablename,
                TreeDefinition { id: definition.id, name: definition.name, ranks },
            );
        }

        Ok(metadata)
    }
}

impl Store for SqliteStore {
    type Error = SqliteError;

    async fn find_matching(&self, table: &str, filter: &Fields) -> Result<Vec<RecordId>, SqliteError> {
        let mut sql = format!("SELECT id FROM {table}");
        if !filter.is_empty() {
            sql.push_str(" WHERE ");
            // IS instead of = so null filter values match stored nulls
            sql.push_str(&filter.keys().map(|field| format!("{field} IS ?")).join(" AND "));
        }
        let mut query = sqlx::query(&sql);
        for value in filter.values() {
            query = bind_value(query, value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(|row| Ok(row.try_get("id")?)).collect()
    }

    async fn insert(&self, table: &str, values: &Fields) -> Result<RecordId, SqliteError> {
        let sql = format!(
            "INSERT INTO {table}({}) VALUES ({}) RETURNING id",
            values.keys().join(", "),
            values.keys().map(|_| "?").join(", ")
        );
        let mut query = sqlx::query(&sql);
        for value in values.values() {
            query = bind_value(query, value);
        }
        let row = query.fetch_one(&self.pool).await?;
        Ok(row.try_get("id")?)
    }

    async fn add_picklist_item(&self, picklist_id: i64, value: &str) -> Result<(), SqliteError> {
        sqlx::query("INSERT INTO picklist_item(picklist_id, title, value) VALUES (?, ?, ?)")
            .bind(picklist_id)
            .bind(value)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn match_tree_path(
        &self,
        table: &str,
        treedef_id: i64,
        path: &[TreePathNode<'_>],
    ) -> Result<Vec<RecordId>, SqliteError> {
        let Some(leaf) = path.last() else {
            return Ok(Vec::new());
        };
        let sql = format!("SELECT id FROM {table} WHERE definition = ? AND rankid = ? AND name = ?");
        let candidates: Vec<i64> = sqlx::query_scalar(&sql)
            .bind(treedef_id)
            .bind(leaf.rank_id)
            .bind(leaf.name)
            .fetch_all(&self.pool)
            .await?;

        let chain_sql = format!("SELECT parent, rankid, name FROM {table} WHERE id = ?");
        let mut ids = Vec::new();
        'candidates: for candidate in candidates {
            let mut chain: Vec<(i64, String)> = Vec::new();
            let mut current = candidate;
            loop {
                let row = sqlx::query(&chain_sql).bind(current).fetch_one(&self.pool).await?;
                let parent: Option<i64> = row.try_get("parent")?;
                if current != candidate {
                    chain.push((row.try_get("rankid")?, row.try_get("name")?));
                }
                match parent {
                    Some(parent_id) => current = parent_id,
                    None => break,
                }
            }
            for node in &path[..path.len() - 1] {
                let present = chain
                    .iter()
                    .any(|(rank_id, name)| *rank_id == i64::from(node.rank_id) && name == node.name);
                if !present {
                    continue 'candidates;
                }
            }
            ids.push(candidate);
        }
        Ok(ids)
    }

    async fn insert_tree_node(&self, table: &str, node: &NewTreeNode<'_>) -> Result<RecordId, SqliteError> {
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
        self.insert(table, &values).await
    }

    async fn savepoint(&self) -> Result<(), SqliteError> {
        sqlx::query("SAVEPOINT row_upload").execute(&self.pool).await?;
        Ok(())
    }

    async fn release_savepoint(&self) -> Result<(), SqliteError> {
        sqlx::query("RELEASE SAVEPOINT row_upload").execute(&self.pool).await?;
        Ok(())
    }

    async fn rollback_savepoint(&self) -> Result<(), SqliteError> {
        sqlx::query("ROLLBACK TO SAVEPOINT row_upload").execute(&self.pool).await?;
        sqlx::query("RELEASE SAVEPOINT row_upload").execute(&self.pool).await?;
        Ok(())
    }

    async fn renumber_tree(&self, table: &str, treedef_id: i64) -> Result<(), SqliteError> {
        let sql = format!("SELECT id, parent FROM {table} WHERE definition = ?");
        let nodes: Vec<(RecordId, Option<RecordId>)> = sqlx::query(&sql)
            .bind(treedef_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| Ok((row.try_get("id")?, row.try_get("parent")?)))
            .collect::<Result<_, sqlx::Error>>()?;
        let update = format!("UPDATE {table} SET nodenumber = ?, highestchildnodenumber = ? WHERE id = ?");
        for (id, node_number, highest) in assign_node_numbers(&nodes) {
            sqlx::query(&update).bind(node_number).bind(highest).bind(id).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn reset_fullnames(&self, table: &str, definition: &TreeDefinition) -> Result<(), SqliteError> {
        let sql = format!("SELECT id, parent, name, rankid FROM {table} WHERE definition = ?");
        let nodes: Vec<(RecordId, Option<RecordId>, String, i32)> = sqlx::query(&sql)
            .bind(definition.id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| {
                Ok((
                    row.try_get("id")?,
                    row.try_get("parent")?,
                    row.try_get("name")?,
                    row.try_get::<i64, _>("rankid")? as i32,
                ))
            })
            .collect::<Result<_, sqlx::Error>>()?;
        let update = format!("UPDATE {table} SET fullname = ? WHERE id = ?");
        for (id, fullname) in build_fullnames(&nodes, definition) {
            sqlx::query(&update).bind(fullname).bind(id).execute(&self.pool).await?;
        }
        Ok(())
    }
}
