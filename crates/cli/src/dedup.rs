//! `lokali-dedup` subcommands.

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Subcommand;
use lokali_dedup::engine::{run_path, RunOptions};
use lokali_dedup::plan::Step;
use lokali_dedup::store;
use lokali_dedup::{load_schema, DedupError, PhasePlan, ReferenceReader, RunSummary, SchemaGraph};
use tracing::{debug, info};

use crate::exit_codes::{DedupErrorOutput, EXIT_DEDUP_FINDINGS, EXIT_ERROR};
use crate::CliError;

#[derive(Subcommand)]
pub enum DedupCommands {
    /// Merge duplicate rows and point every reference at the surviving ids
    #[command(after_help = "\
Examples:
  lokali-dedup run lokali.db
  lokali-dedup run lokali.db --dry-run --json
  lokali-dedup run shop.db --schema shop.dedup.toml --output summary.json")]
    Run {
        /// SQLite database file (must already exist)
        db: PathBuf,

        /// Schema graph TOML (default: built-in Lokali graph)
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Execute every phase, then roll back
        #[arg(long)]
        dry_run: bool,

        /// Output JSON summary to stdout
        #[arg(long)]
        json: bool,

        /// Write JSON summary to file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Report FK violations and remaining duplicates without changing anything
    #[command(after_help = "\
Examples:
  lokali-dedup verify lokali.db
  lokali-dedup verify lokali.db --json")]
    Verify {
        /// SQLite database file
        db: PathBuf,

        /// Schema graph TOML (default: built-in Lokali graph)
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Output JSON report to stdout
        #[arg(long)]
        json: bool,
    },

    /// Print one reference table as JSON lines
    #[command(after_help = "\
Examples:
  lokali-dedup dump lokali.db products
  lokali-dedup dump lokali.db regions | jq .name")]
    Dump {
        /// SQLite database file (opened read-only)
        db: PathBuf,

        /// Table name; must be part of the schema graph
        table: String,

        /// Schema graph TOML (default: built-in Lokali graph)
        #[arg(long)]
        schema: Option<PathBuf>,
    },

    /// Validate a schema graph and print its phase plan
    #[command(after_help = "\
Examples:
  lokali-dedup schema
  lokali-dedup schema --schema shop.dedup.toml --json
  lokali-dedup schema --toml > shop.dedup.toml")]
    Schema {
        /// Schema graph TOML (default: built-in Lokali graph)
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Print the plan as JSON
        #[arg(long, conflicts_with = "toml")]
        json: bool,

        /// Print the schema graph itself as TOML
        #[arg(long)]
        toml: bool,
    },
}

pub fn cmd_dedup(cmd: DedupCommands) -> Result<(), CliError> {
    match cmd {
        DedupCommands::Run { db, schema, dry_run, json, output } => {
            cmd_run(db, schema, dry_run, json, output)
        }
        DedupCommands::Verify { db, schema, json } => cmd_verify(db, schema, json),
        DedupCommands::Dump { db, table, schema } => cmd_dump(db, table, schema),
        DedupCommands::Schema { schema, json, toml } => cmd_schema(schema, json, toml),
    }
}

fn schema_graph(path: Option<&Path>) -> Result<SchemaGraph, CliError> {
    let graph = load_schema(path).map_err(|e| match e {
        DedupError::Io(io) => CliError::io(format!(
            "cannot read schema {}: {io}",
            path.map(|p| p.display().to_string()).unwrap_or_default()
        ))
        .with_hint("omit --schema to use the built-in Lokali graph"),
        other => CliError::dedup(other),
    })?;
    debug!(
        schema = %graph.name,
        source = %path.map(|p| p.display().to_string()).unwrap_or_else(|| "built-in".into()),
        tables = graph.table_names().len(),
        "schema graph loaded"
    );
    Ok(graph)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, CliError> {
    serde_json::to_string_pretty(value).map_err(|e| CliError {
        code: EXIT_ERROR,
        message: format!("JSON serialization error: {e}"),
        hint: None,
    })
}

// ============================================================================
// run
// ============================================================================

fn cmd_run(
    db: PathBuf,
    schema: Option<PathBuf>,
    dry_run: bool,
    json_output: bool,
    output_file: Option<PathBuf>,
) -> Result<(), CliError> {
    let graph = schema_graph(schema.as_deref())?;

    let summary = run_path(&db, &graph, RunOptions { dry_run }).map_err(|e| {
        if json_output {
            if let Ok(out) = serde_json::to_string(&DedupErrorOutput::from_dedup_error(&e)) {
                println!("{out}");
            }
        }
        CliError::dedup(e)
    })?;

    let json_str = to_json(&summary)?;
    if let Some(ref path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| CliError::io(format!("cannot write output: {e}")))?;
        info!(path = %path.display(), "summary written");
    }
    if json_output {
        println!("{json_str}");
    }

    print_run_summary(&summary);
    Ok(())
}

fn print_run_summary(summary: &RunSummary) {
    for table in summary.tables().filter(|t| t.duplicate_groups > 0) {
        eprintln!(
            "  {:<40} {:>5} group(s) {:>6} deleted  ({})",
            table.table, table.duplicate_groups, table.rows_deleted, table.kind
        );
    }
    for rewrite in summary.rewrites().filter(|r| r.rows_updated > 0) {
        eprintln!(
            "  {:<40} {:>6} row(s) rewritten from {}",
            format!("{}.{}", rewrite.table, rewrite.column),
            rewrite.rows_updated,
            rewrite.source
        );
    }
    let t = &summary.totals;
    let verb = if summary.meta.dry_run { "dry run" } else { "dedup" };
    eprintln!(
        "{verb} {}: {} duplicate group(s), {} row(s) deleted, {} reference(s) rewritten",
        summary.outcome, t.duplicate_groups, t.rows_deleted, t.rows_rewritten
    );
}

// ============================================================================
// verify
// ============================================================================

fn cmd_verify(db: PathBuf, schema: Option<PathBuf>, json_output: bool) -> Result<(), CliError> {
    let graph = schema_graph(schema.as_deref())?;
    let conn = store::open_read_only(&db).map_err(CliError::dedup)?;
    let report = lokali_dedup::verify(&conn, &graph).map_err(CliError::dedup)?;

    if json_output {
        println!("{}", to_json(&report)?);
    }

    for ((table, parent), count) in report.violations_by_table() {
        eprintln!("  {table:<40} {count:>6} row(s) reference missing {parent} rows");
    }
    for dup in &report.duplicates {
        eprintln!(
            "  {:<40} {:>5} duplicate group(s), {} redundant row(s)",
            dup.table, dup.duplicate_groups, dup.redundant_rows
        );
    }

    info!(
        violations = report.violations.len(),
        duplicate_tables = report.duplicates.len(),
        "verify finished"
    );
    if report.is_clean() {
        eprintln!("verify: clean");
        return Ok(());
    }
    Err(CliError {
        code: EXIT_DEDUP_FINDINGS,
        message: format!(
            "{} foreign-key violation(s), {} table(s) with duplicates",
            report.violations.len(),
            report.duplicates.len()
        ),
        hint: Some("run `lokali-dedup run` to merge duplicates".to_string()),
    })
}

// ============================================================================
// dump
// ============================================================================

fn cmd_dump(db: PathBuf, table: String, schema: Option<PathBuf>) -> Result<(), CliError> {
    let graph = schema_graph(schema.as_deref())?;
    let reader = ReferenceReader::open(&db, graph).map_err(CliError::dedup)?;
    let rows = reader.rows(&table).map_err(CliError::dedup)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for row in &rows {
        let line = serde_json::to_string(row).map_err(|e| CliError {
            code: EXIT_ERROR,
            message: format!("JSON serialization error: {e}"),
            hint: None,
        })?;
        writeln!(out, "{line}").map_err(|e| CliError::io(e.to_string()))?;
    }
    Ok(())
}

// ============================================================================
// schema
// ============================================================================

fn cmd_schema(schema: Option<PathBuf>, json_output: bool, toml_output: bool) -> Result<(), CliError> {
    let graph = schema_graph(schema.as_deref())?;
    let plan = PhasePlan::build(&graph).map_err(CliError::dedup)?;

    if toml_output {
        print!("{}", graph.to_toml().map_err(CliError::dedup)?);
        return Ok(());
    }
    if json_output {
        println!("{}", to_json(&plan)?);
        return Ok(());
    }

    println!("schema: {}", plan.schema);
    for spec in &plan.phases {
        println!("{}", spec.phase);
        for step in &spec.steps {
            match step {
                Step::Rewrite { .. } => println!("    {step}"),
                _ => println!("  {step}"),
            }
        }
    }
    Ok(())
}
