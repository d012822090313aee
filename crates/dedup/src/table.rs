//! Table deduplication: scan, group by equivalence key, keep the smallest id,
//! delete the rest.

use rusqlite::{params_from_iter, Connection, Transaction};
use tracing::{debug, info};

use crate::error::{DedupError, Result};
use crate::group::{resolve, EquivalenceKey, Groups, KeyPart};
use crate::model::{IdMapping, RowId, TableReport};
use crate::normalize::{normalize_value, reference_value};
use crate::schema::{quote_ident, EntityTable, KeyField};

/// Ids per `DELETE ... WHERE id IN (...)` statement.
pub(crate) const DELETE_CHUNK: usize = 500;

/// Read every row's id and key columns and group them by equivalence key.
pub fn scan_entity(conn: &Connection, table: &EntityTable) -> Result<Groups<EquivalenceKey>> {
    let columns = key_columns(table);
    let sql = format!(
        "SELECT \"id\", {} FROM {}",
        columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
        quote_ident(&table.name),
    );
    let mut stmt = conn.prepare(&sql).map_err(DedupError::storage(&table.name))?;
    let mut rows = stmt.query([]).map_err(DedupError::storage(&table.name))?;

    let mut groups = Groups::new();
    while let Some(row) = rows.next().map_err(DedupError::storage(&table.name))? {
        let id: RowId = row.get(0).map_err(DedupError::storage(&table.name))?;

        let mut key = EquivalenceKey::with_capacity(table.key.len());
        for field in &table.key {
            let part = match field {
                KeyField::Text(col) => {
                    let value = column_value(row, &columns, col, &table.name)?;
                    KeyPart::Text(normalize_value(value).map_err(shape(table, col, id))?)
                }
                KeyField::Reference(col) => {
                    let value = column_value(row, &columns, col, &table.name)?;
                    KeyPart::Reference(reference_value(value).map_err(shape(table, col, id))?)
                }
                KeyField::Fallback(cols) => {
                    let mut chosen = String::new();
                    for col in cols {
                        let value = column_value(row, &columns, col, &table.name)?;
                        let normalized = normalize_value(value).map_err(shape(table, col, id))?;
                        if !normalized.is_empty() {
                            chosen = normalized;
                            break;
                        }
                    }
                    KeyPart::Text(chosen)
                }
            };
            key.push(part);
        }
        groups.push(key, id);
    }
    Ok(groups)
}

/// Deduplicate one entity table and return the mapping of removed ids.
///
/// Callers must rewrite every column in `table.referenced_by` with the
/// returned mapping before the transaction commits.
pub fn deduplicate(tx: &Transaction<'_>, table: &EntityTable) -> Result<(IdMapping, TableReport)> {
    let groups = scan_entity(tx, table)?;
    let resolution = resolve(&groups);

    let deleted = delete_ids(tx, &table.name, &resolution.doomed)?;

    info!(
        table = %table.name,
        kind = %table.kind,
        rows = groups.rows(),
        groups = resolution.duplicate_groups,
        deleted,
        "deduplicated table"
    );

    let report = TableReport {
        table: table.name.clone(),
        kind: table.kind,
        rows_scanned: groups.rows(),
        duplicate_groups: resolution.duplicate_groups,
        rows_deleted: deleted,
    };
    Ok((resolution.mapping, report))
}

/// Delete rows by id in bounded batches. Returns the number of rows removed.
pub(crate) fn delete_ids(tx: &Transaction<'_>, table: &str, ids: &[RowId]) -> Result<usize> {
    let mut deleted = 0;
    for chunk in ids.chunks(DELETE_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!("DELETE FROM {} WHERE \"id\" IN ({placeholders})", quote_ident(table));
        deleted += tx
            .execute(&sql, params_from_iter(chunk.iter()))
            .map_err(DedupError::storage(table))?;
        debug!(table, batch = chunk.len(), "deleted duplicate batch");
    }
    Ok(deleted)
}

/// Distinct key columns in first-use order.
fn key_columns(table: &EntityTable) -> Vec<&str> {
    let mut cols: Vec<&str> = Vec::new();
    for field in &table.key {
        for col in field.columns() {
            if !cols.contains(&col) {
                cols.push(col);
            }
        }
    }
    cols
}

fn column_value<'r>(
    row: &'r rusqlite::Row<'_>,
    columns: &[&str],
    col: &str,
    table: &str,
) -> Result<rusqlite::types::ValueRef<'r>> {
    // Offset by one for the leading id column.
    let idx = columns.iter().position(|c| *c == col).map(|i| i + 1).unwrap_or(usize::MAX);
    row.get_ref(idx).map_err(DedupError::storage(table))
}

fn shape<'a>(table: &'a EntityTable, column: &'a str, row_id: RowId) -> impl FnOnce(&'static str) -> DedupError + 'a {
    move |found| DedupError::DataShape {
        stage: None,
        table: table.name.clone(),
        column: column.to_string(),
        row_id,
        found,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableKind;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, category_id INTEGER);
             CREATE TABLE regions (id INTEGER PRIMARY KEY, code TEXT, name TEXT);",
        )
        .unwrap();
        conn
    }

    fn products() -> EntityTable {
        EntityTable {
            name: "products".into(),
            kind: TableKind::Dependent,
            key: vec![KeyField::Text("name".into()), KeyField::Reference("category_id".into())],
            referenced_by: vec![],
        }
    }

    fn regions() -> EntityTable {
        EntityTable {
            name: "regions".into(),
            kind: TableKind::Base,
            key: vec![KeyField::Fallback(vec!["code".into(), "name".into()])],
            referenced_by: vec![],
        }
    }

    fn ids(conn: &Connection, table: &str) -> Vec<i64> {
        let mut stmt = conn.prepare(&format!("SELECT id FROM {table} ORDER BY id")).unwrap();
        stmt.query_map([], |r| r.get(0)).unwrap().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn merges_case_and_whitespace_variants() {
        let mut conn = conn();
        conn.execute_batch(
            "INSERT INTO products VALUES (1, 'Tomato', 10), (2, 'tomato', 10), (3, 'Onion', 10),
                                         (4, ' TOMATO  ', 10), (5, 'Tomatoes', 10);",
        )
        .unwrap();
        let tx = conn.transaction().unwrap();
        let (mapping, report) = deduplicate(&tx, &products()).unwrap();
        tx.commit().unwrap();

        assert_eq!(mapping.get(2), Some(1));
        assert_eq!(mapping.get(4), Some(1));
        assert_eq!(mapping.get(5), None);
        assert_eq!(report.duplicate_groups, 1);
        assert_eq!(report.rows_deleted, 2);
        assert_eq!(report.rows_scanned, 5);
        assert_eq!(ids(&conn, "products"), vec![1, 3, 5]);
    }

    #[test]
    fn reference_component_keeps_categories_apart() {
        let mut conn = conn();
        conn.execute_batch(
            "INSERT INTO products VALUES (1, 'Mil', 10), (2, 'mil', 11), (3, 'MIL', NULL), (4, 'mil', NULL);",
        )
        .unwrap();
        let tx = conn.transaction().unwrap();
        let (mapping, _) = deduplicate(&tx, &products()).unwrap();
        assert_eq!(mapping.iter().collect::<Vec<_>>(), vec![(4, 3)]);
    }

    #[test]
    fn fallback_key_prefers_code() {
        let mut conn = conn();
        conn.execute_batch(
            "INSERT INTO regions VALUES (1, 'DK', 'Dakar'), (2, 'dk', 'Région de Dakar'),
                                        (3, NULL, 'Thiès'), (4, '  ', 'thiès'), (5, 'TH', 'Thiès');",
        )
        .unwrap();
        let tx = conn.transaction().unwrap();
        let (mapping, report) = deduplicate(&tx, &regions()).unwrap();
        assert_eq!(mapping.get(2), Some(1));
        assert_eq!(mapping.get(4), Some(3));
        // Code "th" and name "thiès" are different components.
        assert_eq!(mapping.get(5), None);
        assert_eq!(report.duplicate_groups, 2);
    }

    #[test]
    fn clean_table_is_untouched() {
        let mut conn = conn();
        conn.execute_batch("INSERT INTO products VALUES (1, 'Mil', 10), (2, 'Sorgho', 10);").unwrap();
        let tx = conn.transaction().unwrap();
        let (mapping, report) = deduplicate(&tx, &products()).unwrap();
        assert!(mapping.is_empty());
        assert_eq!(report.rows_deleted, 0);
    }

    #[test]
    fn blob_in_key_is_a_shape_error() {
        let mut conn = conn();
        conn.execute("INSERT INTO products VALUES (1, X'00FF', 10)", []).unwrap();
        let tx = conn.transaction().unwrap();
        match deduplicate(&tx, &products()).unwrap_err() {
            DedupError::DataShape { table, column, row_id, found, .. } => {
                assert_eq!((table.as_str(), column.as_str(), row_id, found), ("products", "name", 1, "a blob"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_column_is_a_storage_error() {
        let mut conn = conn();
        let tx = conn.transaction().unwrap();
        let mut table = products();
        table.key.push(KeyField::Text("colour".into()));
        assert!(deduplicate(&tx, &table).unwrap_err().is_storage());
    }

    #[test]
    fn deletes_in_chunks() {
        let mut conn = conn();
        let tx = conn.transaction().unwrap();
        for id in 1..=(DELETE_CHUNK as i64 * 2 + 3) {
            tx.execute("INSERT INTO products VALUES (?1, 'Mil', 10)", [id]).unwrap();
        }
        let (mapping, report) = deduplicate(&tx, &products()).unwrap();
        assert_eq!(report.rows_deleted, DELETE_CHUNK * 2 + 2);
        assert_eq!(mapping.len(), DELETE_CHUNK * 2 + 2);
        assert_eq!(ids(&tx, "products"), vec![1]);
    }
}
