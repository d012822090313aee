//! Leaf collapsing for fact/association tables.
//!
//! Rows are compared by their raw composite FK key. Nothing references a
//! fact row, so no mapping comes out of this step.

use rusqlite::{Connection, Transaction};
use tracing::info;

use crate::error::{DedupError, Result};
use crate::group::{resolve, Groups};
use crate::model::{RowId, TableReport};
use crate::normalize::reference_value;
use crate::schema::{quote_ident, FactTable, TableKind};
use crate::table::delete_ids;

/// Group fact rows by composite key. Rows with a NULL key column are left
/// out: a NULL does not identify a relationship.
pub fn scan_fact(conn: &Connection, fact: &FactTable) -> Result<(Groups<Vec<RowId>>, usize)> {
    let sql = format!(
        "SELECT \"id\", {} FROM {}",
        fact.key.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
        quote_ident(&fact.name),
    );
    let mut stmt = conn.prepare(&sql).map_err(DedupError::storage(&fact.name))?;
    let mut rows = stmt.query([]).map_err(DedupError::storage(&fact.name))?;

    let mut groups = Groups::new();
    let mut scanned = 0;
    'rows: while let Some(row) = rows.next().map_err(DedupError::storage(&fact.name))? {
        scanned += 1;
        let id: RowId = row.get(0).map_err(DedupError::storage(&fact.name))?;
        let mut key = Vec::with_capacity(fact.key.len());
        for (i, col) in fact.key.iter().enumerate() {
            let value = row.get_ref(i + 1).map_err(DedupError::storage(&fact.name))?;
            let reference = reference_value(value).map_err(|found| DedupError::DataShape {
                stage: None,
                table: fact.name.clone(),
                column: col.clone(),
                row_id: id,
                found,
            })?;
            match reference {
                Some(r) => key.push(r),
                None => continue 'rows,
            }
        }
        groups.push(key, id);
    }
    Ok((groups, scanned))
}

/// Keep the smallest id per composite key and delete the other rows.
///
/// Must run after every rewrite into `fact`'s key columns.
pub fn collapse_duplicates(tx: &Transaction<'_>, fact: &FactTable) -> Result<TableReport> {
    let (groups, scanned) = scan_fact(tx, fact)?;
    let resolution = resolve(&groups);
    let deleted = delete_ids(tx, &fact.name, &resolution.doomed)?;

    info!(
        table = %fact.name,
        rows = scanned,
        groups = resolution.duplicate_groups,
        deleted,
        "collapsed fact table"
    );

    Ok(TableReport {
        table: fact.name.clone(),
        kind: TableKind::Fact,
        rows_scanned: scanned,
        duplicate_groups: resolution.duplicate_groups,
        rows_deleted: deleted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product_prices() -> FactTable {
        FactTable {
            name: "product_prices".into(),
            key: vec!["product_id".into(), "store_id".into()],
        }
    }

    #[test]
    fn keeps_smallest_id_per_pair() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE product_prices (id INTEGER PRIMARY KEY, product_id INTEGER, store_id INTEGER, price REAL);
             INSERT INTO product_prices VALUES
                (9, 1, 5, 300.0), (3, 1, 5, 250.0), (7, 1, 5, 275.0),
                (4, 1, 6, 300.0), (5, 2, 5, 100.0),
                (10, NULL, 5, 1.0), (11, NULL, 5, 1.0);",
        )
        .unwrap();
        let tx = conn.transaction().unwrap();
        let report = collapse_duplicates(&tx, &product_prices()).unwrap();
        assert_eq!(report.rows_scanned, 7);
        assert_eq!(report.duplicate_groups, 1);
        assert_eq!(report.rows_deleted, 2);

        let mut stmt = tx.prepare("SELECT id FROM product_prices ORDER BY id").unwrap();
        let left: Vec<i64> = stmt.query_map([], |r| r.get(0)).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(left, vec![3, 4, 5, 10, 11]);
    }

    #[test]
    fn key_is_raw_not_normalized() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE product_prices (id INTEGER PRIMARY KEY, product_id, store_id);
             INSERT INTO product_prices VALUES (1, '1', 5);",
        )
        .unwrap();
        let err = scan_fact(&conn, &product_prices()).unwrap_err();
        assert!(matches!(err, DedupError::DataShape { row_id: 1, found: "text", .. }), "{err}");
    }
}
