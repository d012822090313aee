use rusqlite::Transaction;
use tracing::debug;

use crate::error::{DedupError, Result};
use crate::model::IdMapping;
use crate::schema::quote_ident;

/// Point every `table.column` value found in `mapping` at its canonical id.
///
/// Returns the number of rows updated. An empty mapping touches nothing.
pub fn rewrite_references(
    tx: &Transaction<'_>,
    table: &str,
    column: &str,
    mapping: &IdMapping,
) -> Result<usize> {
    if mapping.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "UPDATE {t} SET {c} = ?1 WHERE {c} = ?2",
        t = quote_ident(table),
        c = quote_ident(column),
    );
    let mut stmt = tx.prepare(&sql).map_err(DedupError::storage(table))?;

    let mut updated = 0;
    for (duplicate, canonical) in mapping.iter() {
        updated += stmt
            .execute([canonical, duplicate])
            .map_err(DedupError::storage(table))?;
    }

    debug!(table, column, mapped = mapping.len(), updated, "rewrote references");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE prices (id INTEGER PRIMARY KEY, product_id INTEGER, unit_id INTEGER);
             INSERT INTO prices VALUES (1, 2, 7), (2, 2, 8), (3, 4, 7), (4, 1, NULL), (5, NULL, 7);",
        )
        .unwrap();
        conn
    }

    fn column(conn: &Connection, col: &str) -> Vec<Option<i64>> {
        let mut stmt = conn.prepare(&format!("SELECT {col} FROM prices ORDER BY id")).unwrap();
        stmt.query_map([], |r| r.get(0)).unwrap().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn rewrites_only_mapped_values() {
        let mut conn = conn();
        let tx = conn.transaction().unwrap();
        let mapping: IdMapping = [(2, 1), (4, 1), (99, 1)].into_iter().collect();
        let updated = rewrite_references(&tx, "prices", "product_id", &mapping).unwrap();
        assert_eq!(updated, 3);
        assert_eq!(column(&tx, "product_id"), vec![Some(1), Some(1), Some(1), Some(1), None]);
        // Other columns are untouched.
        assert_eq!(column(&tx, "unit_id"), vec![Some(7), Some(8), Some(7), None, Some(7)]);
    }

    #[test]
    fn empty_mapping_is_noop() {
        let mut conn = conn();
        let tx = conn.transaction().unwrap();
        let updated = rewrite_references(&tx, "missing_table", "x", &IdMapping::new()).unwrap();
        assert_eq!(updated, 0);
    }

    #[test]
    fn unknown_column_is_storage_error() {
        let mut conn = conn();
        let tx = conn.transaction().unwrap();
        let mapping: IdMapping = [(2, 1)].into_iter().collect();
        let err = rewrite_references(&tx, "prices", "store_id", &mapping).unwrap_err();
        assert!(err.is_storage());
        assert!(err.to_string().contains("table 'prices'"), "{err}");
    }
}
