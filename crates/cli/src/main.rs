// lokali-dedup CLI - duplicate reconciliation for the Lokali reference store

mod dedup;
mod exit_codes;

use std::process::ExitCode;

use clap::Parser;
use lokali_dedup::{DedupError, Stage};
use tracing_subscriber::EnvFilter;

use dedup::DedupCommands;
use exit_codes::{dedup_exit_code, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "lokali-dedup")]
#[command(about = "Merge duplicate reference rows and cascade the surviving ids")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Log filter, e.g. "debug" or "lokali_dedup=trace" (default: $RUST_LOG, then "info")
    #[arg(long, global = true, env = "LOKALI_DEDUP_LOG")]
    log: Option<String>,

    #[command(subcommand)]
    command: DedupCommands,
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  lokali-dedup ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("TARGET"),
    )
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    match dedup::cmd_dedup(cli.command) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    /// Create error from an engine error with its registered exit code.
    pub fn dedup(err: DedupError) -> Self {
        let code = dedup_exit_code(&err);
        let hint = match &err {
            DedupError::ConfigParse(_) | DedupError::ConfigValidation(_) => {
                Some("`lokali-dedup schema --toml` prints a valid graph to start from".to_string())
            }
            DedupError::UsageOrder { .. } => {
                Some("dependent tables may only key on base tables".to_string())
            }
            DedupError::Storage { stage: Some(Stage::Open), .. } => {
                Some("the database file must already exist and be writable".to_string())
            }
            DedupError::Storage { stage: Some(Stage::Verify), .. } => {
                Some("add the referencing column to the schema graph; nothing was changed".to_string())
            }
            DedupError::DataShape { .. } => {
                Some("fix or clear the offending value and rerun; nothing was changed".to_string())
            }
            DedupError::UnknownTable(_) => {
                Some("`lokali-dedup schema` lists the tables in the graph".to_string())
            }
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
