//! Read-only access to the reference tables for downstream consumers.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map, Number, Value};

use crate::error::{DedupError, Result, Stage};
use crate::schema::{quote_ident, SchemaGraph};
use crate::store;

/// One row, keyed by column name.
pub type Record = Map<String, Value>;

pub struct ReferenceReader {
    conn: Connection,
    graph: SchemaGraph,
}

impl ReferenceReader {
    pub fn open(path: &Path, graph: SchemaGraph) -> Result<Self> {
        Ok(Self { conn: store::open_read_only(path)?, graph })
    }

    pub fn from_connection(conn: Connection, graph: SchemaGraph) -> Self {
        Self { conn, graph }
    }

    /// Every row of `table`, ordered by id. Only tables named in the schema
    /// graph are readable.
    pub fn rows(&self, table: &str) -> Result<Vec<Record>> {
        if !self.graph.knows_table(table) {
            return Err(DedupError::UnknownTable(table.to_string()));
        }
        let sql = format!("SELECT * FROM {} ORDER BY \"id\"", quote_ident(table));
        let storage = || DedupError::storage_at(Stage::Read, table);

        let mut stmt = self.conn.prepare(&sql).map_err(storage())?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query([]).map_err(storage())?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(storage())? {
            let mut record = Record::new();
            for (i, name) in names.iter().enumerate() {
                let value = row.get_ref(i).map_err(storage())?;
                record.insert(name.clone(), json_value(value));
            }
            out.push(record);
        }
        Ok(out)
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(b.iter().map(|byte| format!("{byte:02x}")).collect()),
    }
}
