// End-to-end tests for the `lokali-dedup` binary.
// Run with: cargo test -p lokali-dedup-cli --test cli_tests

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use rusqlite::Connection;
use tempfile::TempDir;

fn lokali_dedup() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_lokali-dedup"));
    cmd.env_remove("RUST_LOG");
    cmd.env("LOKALI_DEDUP_LOG", "warn");
    cmd
}

fn run(args: &[&str]) -> Output {
    lokali_dedup().args(args).output().expect("spawn lokali-dedup")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

fn seeded_store() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lokali.db");
    let schema = Path::new(env!("CARGO_MANIFEST_DIR")).join("../dedup/tests/fixtures/lokali.sql");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(&std::fs::read_to_string(schema).unwrap()).unwrap();
    conn.execute_batch(
        "INSERT INTO product_categories VALUES (10, 'Vegetables');
         INSERT INTO stores VALUES (5, 'Mercado');
         INSERT INTO products VALUES (1, 'Tomato', 10), (2, 'tomato', 10), (3, 'Onion', 10);
         INSERT INTO product_prices VALUES (1, 2, 5, 8.0);",
    )
    .unwrap();
    (dir, path)
}

fn product_ids(path: &Path) -> Vec<i64> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn.prepare("SELECT id FROM products ORDER BY id").unwrap();
    stmt.query_map([], |r| r.get(0)).unwrap().map(|r| r.unwrap()).collect()
}

// ============================================================================
// run
// ============================================================================

#[test]
fn run_commits_and_prints_json() {
    let (_dir, db) = seeded_store();
    let out = run(&["run", db.to_str().unwrap(), "--json"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));

    let summary: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(summary["outcome"], "committed");
    assert_eq!(summary["totals"]["rows_deleted"], 1);
    assert_eq!(summary["meta"]["schema"], "lokali");
    assert_eq!(product_ids(&db), vec![1, 3]);
    assert!(stderr(&out).contains("dedup committed"), "stderr: {}", stderr(&out));
}

#[test]
fn dry_run_writes_output_file_only() {
    let (dir, db) = seeded_store();
    let report = dir.path().join("summary.json");
    let out = run(&["run", db.to_str().unwrap(), "--dry-run", "--output", report.to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(stdout(&out).is_empty());

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(summary["outcome"], "rolled_back");
    assert_eq!(summary["meta"]["dry_run"], true);
    assert_eq!(product_ids(&db), vec![1, 2, 3]);
}

#[test]
fn output_file_write_is_logged_at_info() {
    let (dir, db) = seeded_store();
    let report = dir.path().join("summary.json");
    let out = lokali_dedup()
        .env("LOKALI_DEDUP_LOG", "info")
        .args(["run", db.to_str().unwrap(), "--output", report.to_str().unwrap()])
        .output()
        .expect("spawn lokali-dedup");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(stderr(&out).contains("summary written"), "stderr: {}", stderr(&out));
    assert!(stderr(&out).contains("run finished"), "stderr: {}", stderr(&out));

    let quiet = run(&["run", db.to_str().unwrap(), "--dry-run", "--output", report.to_str().unwrap()]);
    assert!(!stderr(&quiet).contains("summary written"));
}

#[test]
fn missing_database_is_storage_error() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("absent.db");
    let out = run(&["run", db.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(5));
    assert!(stderr(&out).contains("hint:"), "stderr: {}", stderr(&out));
    assert!(!db.exists());
}

#[test]
fn failed_run_reports_json_error() {
    let (_dir, db) = seeded_store();
    Connection::open(&db)
        .unwrap()
        .execute_batch("UPDATE products SET name = x'00' WHERE id = 3;")
        .unwrap();
    let out = run(&["run", db.to_str().unwrap(), "--json"]);
    assert_eq!(out.status.code(), Some(6));

    let err: serde_json::Value = serde_json::from_str(stdout(&out).trim()).unwrap();
    assert_eq!(err["error"], "data_shape");
    assert_eq!(err["stage"], "phase 3 (dependent)");
    assert_eq!(product_ids(&db), vec![1, 2, 3]);
}

// ============================================================================
// verify / dump
// ============================================================================

#[test]
fn verify_exit_code_tracks_findings() {
    let (_dir, db) = seeded_store();
    let out = run(&["verify", db.to_str().unwrap(), "--json"]);
    assert_eq!(out.status.code(), Some(7), "stderr: {}", stderr(&out));
    let report: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(report["duplicates"][0]["table"], "products");

    assert!(run(&["run", db.to_str().unwrap()]).status.success());
    let out = run(&["verify", db.to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(stderr(&out).contains("verify: clean"));
}

#[test]
fn dump_prints_json_lines() {
    let (_dir, db) = seeded_store();
    let out = run(&["dump", db.to_str().unwrap(), "products"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));

    let lines: Vec<serde_json::Value> = stdout(&out)
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1]["name"], "tomato");
    assert_eq!(lines[1]["category_id"], 10);
}

#[test]
fn dump_refuses_tables_outside_graph() {
    let (_dir, db) = seeded_store();
    let out = run(&["dump", db.to_str().unwrap(), "sqlite_master"]);
    assert_eq!(out.status.code(), Some(8));
    assert!(stderr(&out).contains("unknown table: sqlite_master"));
}

// ============================================================================
// schema
// ============================================================================

#[test]
fn schema_prints_phase_plan() {
    let out = run(&["schema"]);
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("phase 1 (base)"));
    assert!(text.contains("deduplicate product_categories"));
    assert!(text.contains("collapse supplier_product_availability"));

    let out = run(&["schema", "--json"]);
    let plan: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(plan["phases"].as_array().unwrap().len(), 4);
    assert_eq!(plan["phases"][1]["phase"], "base_propagation");
}

#[test]
fn schema_toml_round_trips_through_flag() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("lokali.dedup.toml");
    let out = run(&["schema", "--toml"]);
    assert!(out.status.success());
    std::fs::write(&file, out.stdout).unwrap();

    let out = run(&["schema", "--schema", file.to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(stdout(&out).starts_with("schema: lokali"));
}

#[test]
fn bad_schema_files() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("bad.toml");
    std::fs::write(&file, "name = \"x\"\n[[table]]\nname = \"a b\"\nkind = \"base\"\nkey = [{ text = \"n\" }]\n")
        .unwrap();
    let out = run(&["schema", "--schema", file.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(3), "stderr: {}", stderr(&out));

    let out = run(&["schema", "--schema", dir.path().join("missing.toml").to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(2));
}
