//! `lokali-dedup`: duplicate reconciliation for a relational reference store.
//!
//! Entity tables are deduplicated on normalized natural keys, the surviving
//! (smallest) id of each class replaces every reference to the removed ids,
//! and fact tables are collapsed on their composite FK keys. A run executes
//! in four ordered phases inside one SQLite transaction.

pub mod collapse;
pub mod config;
pub mod engine;
pub mod error;
pub mod group;
pub mod model;
pub mod normalize;
pub mod plan;
pub mod reference;
pub mod rewrite;
pub mod schema;
pub mod store;
pub mod table;
pub mod verify;

pub use config::load_schema;
pub use engine::{run, run_path, RunOptions};
pub use error::{DedupError, Stage};
pub use model::{IdMapping, RunOutcome, RunSummary};
pub use plan::{Phase, PhasePlan};
pub use reference::{Record, ReferenceReader};
pub use schema::SchemaGraph;
pub use verify::{verify, VerifyReport};
