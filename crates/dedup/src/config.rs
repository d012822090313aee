//! Schema graphs loaded from TOML.
//!
//! ```toml
//! name = "shop"
//!
//! [[table]]
//! name = "units"
//! kind = "base"
//! key = [{ text = "name" }]
//! referenced_by = [{ table = "prices", column = "unit_id" }]
//!
//! [[fact]]
//! name = "prices"
//! key = ["unit_id"]
//! ```

use std::path::Path;

use crate::error::{DedupError, Result};
use crate::schema::SchemaGraph;

impl SchemaGraph {
    pub fn from_toml(input: &str) -> Result<Self> {
        let graph: SchemaGraph =
            toml::from_str(input).map_err(|e| DedupError::ConfigParse(e.to_string()))?;
        graph.validate()?;
        Ok(graph)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DedupError::ConfigParse(e.to_string()))
    }
}

/// Read a schema graph file, or fall back to the built-in Lokali graph.
pub fn load_schema(path: Option<&Path>) -> Result<SchemaGraph> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            SchemaGraph::from_toml(&text)
        }
        None => Ok(SchemaGraph::lokali()),
    }
}
