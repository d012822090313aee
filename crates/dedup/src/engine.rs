//! The run controller: one transaction, four phases, commit or roll back.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, Transaction};
use tracing::{info, warn};

use crate::collapse::collapse_duplicates;
use crate::error::{DedupError, Result, Stage};
use crate::model::{compute_totals, IdMapping, PhaseReport, RewriteReport, RunMeta, RunOutcome, RunSummary};
use crate::plan::{OrderLedger, Phase, PhasePlan, Step};
use crate::rewrite::rewrite_references;
use crate::schema::SchemaGraph;
use crate::store;
use crate::table::deduplicate;
use crate::verify::{ensure_no_new_violations, foreign_key_violations, preflight};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Execute every phase, then roll back instead of committing.
    pub dry_run: bool,
}

/// Open the store at `path` and run the full cascade against it.
pub fn run_path(path: &Path, graph: &SchemaGraph, options: RunOptions) -> Result<RunSummary> {
    let mut conn = store::open(path)?;
    run_labeled(&mut conn, graph, options, path.display().to_string())
}

/// Run the full cascade on an open connection.
///
/// On any error the transaction is rolled back and the store is left as it
/// was before the call. FK enforcement and the busy timeout are switched for
/// the run and put back afterwards, whatever the outcome.
pub fn run(conn: &mut Connection, graph: &SchemaGraph, options: RunOptions) -> Result<RunSummary> {
    let database = match conn.path() {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => ":memory:".to_string(),
    };
    run_labeled(conn, graph, options, database)
}

fn run_labeled(
    conn: &mut Connection,
    graph: &SchemaGraph,
    options: RunOptions,
    database: String,
) -> Result<RunSummary> {
    let plan = PhasePlan::build(graph)?;
    let saved = store::ConnectionSettings::capture(conn)?;
    let result = store::prepare(conn).and_then(|()| run_prepared(conn, graph, &plan, options, database));
    let restored = saved.restore(conn);
    if let (Err(_), Err(err)) = (&result, &restored) {
        warn!(error = %err, "could not restore connection settings");
    }
    let summary = result?;
    restored?;
    Ok(summary)
}

/// Preflight, transaction and outcome. The caller restores connection
/// settings.
fn run_prepared(
    conn: &mut Connection,
    graph: &SchemaGraph,
    plan: &PhasePlan,
    options: RunOptions,
    database: String,
) -> Result<RunSummary> {
    preflight(conn, graph)?;

    let tx = store::begin(conn)?;
    let phases = match execute(&tx, graph, plan) {
        Ok(phases) => phases,
        Err(err) => {
            warn!(error = %err, "run failed, rolling back");
            if let Err(rollback) = tx.rollback() {
                warn!(error = %rollback, "rollback failed");
            }
            return Err(err);
        }
    };

    let outcome = if options.dry_run {
        tx.rollback().map_err(DedupError::storage_at(Stage::Commit, "rollback"))?;
        RunOutcome::RolledBack
    } else {
        tx.commit().map_err(DedupError::storage_at(Stage::Commit, "commit"))?;
        RunOutcome::Committed
    };

    let totals = compute_totals(&phases);
    info!(
        %outcome,
        groups = totals.duplicate_groups,
        deleted = totals.rows_deleted,
        rewritten = totals.rows_rewritten,
        "run finished"
    );

    Ok(RunSummary {
        meta: RunMeta {
            schema: graph.name.clone(),
            database,
            dry_run: options.dry_run,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
        },
        outcome,
        totals,
        phases,
    })
}

/// All four phases plus the integrity check. Never commits.
fn execute(tx: &Transaction<'_>, graph: &SchemaGraph, plan: &PhasePlan) -> Result<Vec<PhaseReport>> {
    let baseline = foreign_key_violations(tx).map_err(|e| e.in_stage(Stage::Verify))?;

    let mut cascade = Cascade {
        tx,
        graph,
        ledger: OrderLedger::new(graph),
        mappings: HashMap::new(),
    };
    let mut reports = Vec::with_capacity(plan.phases.len());
    for spec in &plan.phases {
        let mut report = PhaseReport::new(spec.phase);
        for step in &spec.steps {
            cascade
                .step(spec.phase, step, &mut report)
                .map_err(|e| e.in_stage(Stage::Phase(spec.phase)))?;
        }
        info!(
            phase = spec.phase.number(),
            label = spec.phase.label(),
            tables = report.tables.len(),
            rewrites = report.rewrites.len(),
            "phase complete"
        );
        reports.push(report);
    }

    let current = foreign_key_violations(tx).map_err(|e| e.in_stage(Stage::Verify))?;
    ensure_no_new_violations(&baseline, &current)?;
    Ok(reports)
}

/// Mutable state of one run: which mappings exist and which steps are done.
struct Cascade<'t, 'c, 'g> {
    tx: &'t Transaction<'c>,
    graph: &'g SchemaGraph,
    ledger: OrderLedger<'g>,
    mappings: HashMap<String, IdMapping>,
}

impl Cascade<'_, '_, '_> {
    fn step(&mut self, phase: Phase, step: &Step, report: &mut PhaseReport) -> Result<()> {
        self.ledger.admit(phase, step)?;

        match step {
            Step::Deduplicate { table } => {
                let entity = self
                    .graph
                    .entity(table)
                    .ok_or_else(|| DedupError::UnknownTable(table.clone()))?;
                let (mapping, table_report) = deduplicate(self.tx, entity)?;
                self.mappings.insert(table.clone(), mapping);
                report.tables.push(table_report);
            }
            Step::Rewrite { source, target } => {
                let mapping = self.mappings.get(source).ok_or_else(|| DedupError::UsageOrder {
                    stage: Stage::Phase(phase),
                    table: target.table.clone(),
                    detail: format!("no mapping recorded for '{source}'"),
                })?;
                let rows_updated = rewrite_references(self.tx, &target.table, &target.column, mapping)?;
                if !mapping.is_empty() {
                    report.rewrites.push(RewriteReport {
                        source: source.clone(),
                        table: target.table.clone(),
                        column: target.column.clone(),
                        mapped_ids: mapping.len(),
                        rows_updated,
                    });
                }
            }
            Step::Collapse { table } => {
                let fact = self
                    .graph
                    .fact(table)
                    .ok_or_else(|| DedupError::UnknownTable(table.clone()))?;
                report.tables.push(collapse_duplicates(self.tx, fact)?);
            }
        }

        self.ledger.record(phase, step);
        Ok(())
    }
}
