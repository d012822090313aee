use std::fmt;

use thiserror::Error;

use crate::plan::Phase;

pub type Result<T> = std::result::Result<T, DedupError>;

/// Where in a run an error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Open,
    Plan,
    Phase(Phase),
    Verify,
    Commit,
    Read,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Plan => write!(f, "plan"),
            Self::Phase(phase) => write!(f, "{phase}"),
            Self::Verify => write!(f, "verify"),
            Self::Commit => write!(f, "commit"),
            Self::Read => write!(f, "read"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageFault {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    /// Rows left pointing at ids that no longer exist.
    #[error("{rows} row(s) reference missing rows in '{parent}'")]
    DanglingReference { parent: String, rows: usize },
    #[error("missing column '{column}'")]
    MissingColumn { column: String },
    #[error("table does not exist")]
    MissingTable,
}

#[derive(Debug, Error)]
pub enum DedupError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// Schema graph validation error (bad identifier, duplicate table, ...).
    #[error("config validation error: {0}")]
    ConfigValidation(String),

    /// A step was scheduled before the mapping or rewrites it depends on.
    #[error("{stage}: table '{table}': out of order: {detail}")]
    UsageOrder {
        stage: Stage,
        table: String,
        detail: String,
    },

    #[error("{}table '{table}': {fault}", stage_prefix(.stage))]
    Storage {
        stage: Option<Stage>,
        table: String,
        #[source]
        fault: StorageFault,
    },

    /// A key column held a value the key builder cannot compare.
    #[error("{}table '{table}', row {row_id}: column '{column}' holds {found}", stage_prefix(.stage))]
    DataShape {
        stage: Option<Stage>,
        table: String,
        column: String,
        row_id: i64,
        found: &'static str,
    },

    /// Reference reader asked for a table outside the schema graph.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn stage_prefix(stage: &Option<Stage>) -> String {
    match stage {
        Some(stage) => format!("{stage}: "),
        None => String::new(),
    }
}

impl DedupError {
    /// Map a rusqlite error onto `table`, leaving the stage for the caller.
    pub(crate) fn storage(table: &str) -> impl FnOnce(rusqlite::Error) -> DedupError {
        let table = table.to_string();
        move |err| DedupError::Storage {
            stage: None,
            table,
            fault: StorageFault::Sqlite(err),
        }
    }

    /// Same as [`DedupError::storage`] but with the stage already known.
    pub(crate) fn storage_at(stage: Stage, table: &str) -> impl FnOnce(rusqlite::Error) -> DedupError {
        let table = table.to_string();
        move |err| DedupError::Storage {
            stage: Some(stage),
            table,
            fault: StorageFault::Sqlite(err),
        }
    }

    /// Attach a stage to errors raised by stage-agnostic components.
    /// An already-set stage wins.
    pub fn in_stage(mut self, at: Stage) -> Self {
        match &mut self {
            Self::Storage { stage, .. } | Self::DataShape { stage, .. } => {
                if stage.is_none() {
                    *stage = Some(at);
                }
            }
            _ => {}
        }
        self
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::UsageOrder { stage, .. } => Some(*stage),
            Self::Storage { stage, .. } | Self::DataShape { stage, .. } => *stage,
            _ => None,
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Io(_))
    }
}
