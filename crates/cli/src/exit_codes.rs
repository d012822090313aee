//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain     | Description                              |
//! |---------|------------|------------------------------------------|
//! | 0       | Universal  | Success                                  |
//! | 1       | Universal  | General error (unspecified)              |
//! | 2       | Universal  | CLI usage error (bad args, missing file) |
//! | 3-9     | dedup      | Run and verify codes                     |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into [`dedup_exit_code`] or the command that raises it

use lokali_dedup::DedupError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unreadable schema file.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Dedup (3-9)
// =============================================================================

/// Schema graph TOML failed to parse or validate.
pub const EXIT_DEDUP_CONFIG: u8 = 3;

/// A phase step was scheduled before its mapping or rewrites existed.
pub const EXIT_DEDUP_ORDER: u8 = 4;

/// Storage failure, missing table/column, or dangling reference at commit.
/// The run was rolled back.
pub const EXIT_DEDUP_STORAGE: u8 = 5;

/// A key column held a value that cannot be compared (blob, non-integer FK).
/// The run was rolled back.
pub const EXIT_DEDUP_DATA_SHAPE: u8 = 6;

/// `verify` found FK violations or residual duplicates.
pub const EXIT_DEDUP_FINDINGS: u8 = 7;

/// `dump` was asked for a table outside the schema graph.
pub const EXIT_DEDUP_UNKNOWN_TABLE: u8 = 8;

/// Map a DedupError to its exit code.
pub fn dedup_exit_code(err: &DedupError) -> u8 {
    match err {
        DedupError::ConfigParse(_) | DedupError::ConfigValidation(_) => EXIT_DEDUP_CONFIG,
        DedupError::UsageOrder { .. } => EXIT_DEDUP_ORDER,
        DedupError::Storage { .. } => EXIT_DEDUP_STORAGE,
        DedupError::DataShape { .. } => EXIT_DEDUP_DATA_SHAPE,
        DedupError::UnknownTable(_) => EXIT_DEDUP_UNKNOWN_TABLE,
        DedupError::Io(_) => EXIT_USAGE,
    }
}

/// Structured error output for `--json` runs.
#[derive(Debug, serde::Serialize)]
pub struct DedupErrorOutput {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub exit_code: u8,
}

impl DedupErrorOutput {
    pub fn from_dedup_error(err: &DedupError) -> Self {
        let error = match err {
            DedupError::ConfigParse(_) => "config_parse",
            DedupError::ConfigValidation(_) => "config_validation",
            DedupError::UsageOrder { .. } => "usage_order",
            DedupError::Storage { .. } => "storage",
            DedupError::DataShape { .. } => "data_shape",
            DedupError::UnknownTable(_) => "unknown_table",
            DedupError::Io(_) => "io",
        };
        Self {
            error,
            message: err.to_string(),
            stage: err.stage().map(|s| s.to_string()),
            exit_code: dedup_exit_code(err),
        }
    }
}
