use std::collections::BTreeMap;

use serde::Serialize;

use crate::plan::Phase;
use crate::schema::TableKind;

/// Surrogate integer identity of a row.
pub type RowId = i64;

// ---------------------------------------------------------------------------
// Id mapping
// ---------------------------------------------------------------------------

/// Duplicate id -> canonical id for one entity table in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IdMapping {
    entries: BTreeMap<RowId, RowId>,
}

impl IdMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `duplicate -> canonical`. A duplicate maps to exactly one id;
    /// the first recorded target is kept.
    pub fn insert(&mut self, duplicate: RowId, canonical: RowId) {
        self.entries.entry(duplicate).or_insert(canonical);
    }

    pub fn get(&self, id: RowId) -> Option<RowId> {
        self.entries.get(&id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RowId, RowId)> + '_ {
        self.entries.iter().map(|(&from, &to)| (from, to))
    }
}

impl FromIterator<(RowId, RowId)> for IdMapping {
    fn from_iter<I: IntoIterator<Item = (RowId, RowId)>>(iter: I) -> Self {
        let mut mapping = IdMapping::new();
        for (from, to) in iter {
            mapping.insert(from, to);
        }
        mapping
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of deduplicating or collapsing one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: String,
    pub kind: TableKind,
    pub rows_scanned: usize,
    pub duplicate_groups: usize,
    pub rows_deleted: usize,
}

/// Outcome of applying one mapping to one referencing column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteReport {
    pub source: String,
    pub table: String,
    pub column: String,
    pub mapped_ids: usize,
    pub rows_updated: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rewrites: Vec<RewriteReport>,
}

impl PhaseReport {
    pub fn new(phase: Phase) -> Self {
        Self { phase, tables: Vec::new(), rewrites: Vec::new() }
    }
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Committed,
    /// Dry run: every phase executed, then the transaction was discarded.
    RolledBack,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled back"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub duplicate_groups: usize,
    pub rows_deleted: usize,
    pub rows_rewritten: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub schema: String,
    pub database: String,
    pub dry_run: bool,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub meta: RunMeta,
    pub outcome: RunOutcome,
    pub totals: RunTotals,
    pub phases: Vec<PhaseReport>,
}

impl RunSummary {
    pub fn tables(&self) -> impl Iterator<Item = &TableReport> {
        self.phases.iter().flat_map(|p| p.tables.iter())
    }

    pub fn rewrites(&self) -> impl Iterator<Item = &RewriteReport> {
        self.phases.iter().flat_map(|p| p.rewrites.iter())
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables().find(|t| t.table == name)
    }

    /// True when the run found nothing to merge, delete or rewrite.
    pub fn is_clean(&self) -> bool {
        self.totals == RunTotals::default()
    }
}

pub(crate) fn compute_totals(phases: &[PhaseReport]) -> RunTotals {
    let mut totals = RunTotals::default();
    for phase in phases {
        for table in &phase.tables {
            totals.duplicate_groups += table.duplicate_groups;
            totals.rows_deleted += table.rows_deleted;
        }
        for rewrite in &phase.rewrites {
            totals.rows_rewritten += rewrite.rows_updated;
        }
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_a_function() {
        let mut mapping = IdMapping::new();
        mapping.insert(2, 1);
        mapping.insert(2, 5);
        assert_eq!(mapping.get(2), Some(1));
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn totals_sum_tables_and_rewrites() {
        let mut phase = PhaseReport::new(Phase::Base);
        phase.tables.push(TableReport {
            table: "units".into(),
            kind: TableKind::Base,
            rows_scanned: 5,
            duplicate_groups: 1,
            rows_deleted: 2,
        });
        let mut propagation = PhaseReport::new(Phase::BasePropagation);
        propagation.rewrites.push(RewriteReport {
            source: "units".into(),
            table: "prices".into(),
            column: "unit_id".into(),
            mapped_ids: 2,
            rows_updated: 7,
        });
        let totals = compute_totals(&[phase, propagation]);
        assert_eq!(
            totals,
            RunTotals { duplicate_groups: 1, rows_deleted: 2, rows_rewritten: 7 }
        );
    }
}
