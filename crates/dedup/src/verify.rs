//! Integrity checks: schema preflight, FK violations, residual duplicates.

use std::collections::{BTreeMap, HashSet};

use rusqlite::Connection;
use serde::Serialize;

use crate::collapse::scan_fact;
use crate::error::{DedupError, Result, Stage, StorageFault};
use crate::group::resolve;
use crate::schema::{SchemaGraph, TableKind};
use crate::store::table_columns;
use crate::table::scan_entity;

/// One row of `PRAGMA foreign_key_check`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: Option<i64>,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateFinding {
    pub table: String,
    pub kind: TableKind,
    pub duplicate_groups: usize,
    pub redundant_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub schema: String,
    pub violations: Vec<ForeignKeyViolation>,
    pub duplicates: Vec<DuplicateFinding>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty() && self.duplicates.is_empty()
    }

    /// Violation counts per (table, parent).
    pub fn violations_by_table(&self) -> BTreeMap<(&str, &str), usize> {
        let mut counts = BTreeMap::new();
        for v in &self.violations {
            *counts.entry((v.table.as_str(), v.parent.as_str())).or_insert(0) += 1;
        }
        counts
    }
}

/// Every table and column the graph touches must exist before a run starts.
pub fn preflight(conn: &Connection, graph: &SchemaGraph) -> Result<()> {
    let missing = |table: &str, fault: StorageFault| DedupError::Storage {
        stage: Some(Stage::Plan),
        table: table.to_string(),
        fault,
    };
    let check = |table: &str, wanted: &mut dyn Iterator<Item = &str>| -> Result<()> {
        let columns = table_columns(conn, table).map_err(|e| e.in_stage(Stage::Plan))?;
        if columns.is_empty() {
            return Err(missing(table, StorageFault::MissingTable));
        }
        for col in wanted {
            if !columns.iter().any(|c| c == col) {
                return Err(missing(table, StorageFault::MissingColumn { column: col.to_string() }));
            }
        }
        Ok(())
    };

    for table in &graph.entities {
        let cols = table.key.iter().flat_map(|f| f.columns());
        check(&table.name, &mut std::iter::once("id").chain(cols))?;
        for target in &table.referenced_by {
            check(&target.table, &mut std::iter::once(target.column.as_str()))?;
        }
    }
    for fact in &graph.facts {
        check(&fact.name, &mut std::iter::once("id").chain(fact.key.iter().map(String::as_str)))?;
    }
    Ok(())
}

/// All declared foreign-key violations currently in the store.
pub fn foreign_key_violations(conn: &Connection) -> Result<Vec<ForeignKeyViolation>> {
    let mut stmt = conn
        .prepare("PRAGMA foreign_key_check")
        .map_err(DedupError::storage("foreign_key_check"))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })
        .map_err(DedupError::storage("foreign_key_check"))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(DedupError::storage("foreign_key_check"))
}

/// Violations in `current` that were not already present in `baseline`.
pub fn introduced_violations<'a>(
    baseline: &[ForeignKeyViolation],
    current: &'a [ForeignKeyViolation],
) -> Vec<&'a ForeignKeyViolation> {
    let known: HashSet<&ForeignKeyViolation> = baseline.iter().collect();
    current.iter().filter(|v| !known.contains(v)).collect()
}

/// Fail with a storage error if the run left references dangling.
pub fn ensure_no_new_violations(
    baseline: &[ForeignKeyViolation],
    current: &[ForeignKeyViolation],
) -> Result<()> {
    let introduced = introduced_violations(baseline, current);
    let Some(first) = introduced.first() else {
        return Ok(());
    };
    let rows = introduced
        .iter()
        .filter(|v| v.table == first.table && v.parent == first.parent)
        .count();
    Err(DedupError::Storage {
        stage: Some(Stage::Verify),
        table: first.table.clone(),
        fault: StorageFault::DanglingReference { parent: first.parent.clone(), rows },
    })
}

/// Duplicate groups still present, per entity and fact table. Read-only.
pub fn residual_duplicates(conn: &Connection, graph: &SchemaGraph) -> Result<Vec<DuplicateFinding>> {
    let mut findings = Vec::new();
    for table in &graph.entities {
        let groups = scan_entity(conn, table).map_err(|e| e.in_stage(Stage::Verify))?;
        let res = resolve(&groups);
        if res.duplicate_groups > 0 {
            findings.push(DuplicateFinding {
                table: table.name.clone(),
                kind: table.kind,
                duplicate_groups: res.duplicate_groups,
                redundant_rows: res.doomed.len(),
            });
        }
    }
    for fact in &graph.facts {
        let (groups, _) = scan_fact(conn, fact).map_err(|e| e.in_stage(Stage::Verify))?;
        let res = resolve(&groups);
        if res.duplicate_groups > 0 {
            findings.push(DuplicateFinding {
                table: fact.name.clone(),
                kind: TableKind::Fact,
                duplicate_groups: res.duplicate_groups,
                redundant_rows: res.doomed.len(),
            });
        }
    }
    Ok(findings)
}

/// Full read-only health check of a store against `graph`.
pub fn verify(conn: &Connection, graph: &SchemaGraph) -> Result<VerifyReport> {
    graph.validate()?;
    preflight(conn, graph)?;
    Ok(VerifyReport {
        schema: graph.name.clone(),
        violations: foreign_key_violations(conn).map_err(|e| e.in_stage(Stage::Verify))?,
        duplicates: residual_duplicates(conn, graph)?,
    })
}
