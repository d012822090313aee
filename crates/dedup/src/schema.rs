//! Typed table-descriptor registry.
//!
//! A [`SchemaGraph`] lists every entity table the engine deduplicates, how
//! its equivalence key is derived, and which columns elsewhere reference it.
//! Fact tables are listed with the FK columns forming their composite key.
//! Identifiers are validated once here and always quoted when they reach SQL.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{DedupError, Result};

// ---------------------------------------------------------------------------
// Key fields
// ---------------------------------------------------------------------------

/// One component of an entity table's equivalence key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyField {
    /// A text column, compared after normalization.
    Text(String),
    /// A foreign-key column, compared by raw identity.
    Reference(String),
    /// Ordered text columns; the first non-empty normalized value is the
    /// component.
    Fallback(Vec<String>),
}

impl KeyField {
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Self::Text(col) | Self::Reference(col) => vec![col.as_str()],
            Self::Fallback(cols) => cols.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference(_))
    }
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Base,
    Dependent,
    Fact,
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Base => write!(f, "base"),
            Self::Dependent => write!(f, "dependent"),
            Self::Fact => write!(f, "fact"),
        }
    }
}

/// A column in some table that holds ids of another table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: &str, column: &str) -> Self {
        Self { table: table.into(), column: column.into() }
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityTable {
    pub name: String,
    pub kind: TableKind,
    pub key: Vec<KeyField>,
    /// Every column whose values must follow this table's id mapping.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_by: Vec<ColumnRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FactTable {
    pub name: String,
    pub key: Vec<String>,
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaGraph {
    pub name: String,
    #[serde(default, rename = "table")]
    pub entities: Vec<EntityTable>,
    #[serde(default, rename = "fact")]
    pub facts: Vec<FactTable>,
}

impl SchemaGraph {
    /// The Lokali price-collection schema.
    pub fn lokali() -> Self {
        fn text(col: &str) -> KeyField {
            KeyField::Text(col.into())
        }
        fn reference(col: &str) -> KeyField {
            KeyField::Reference(col.into())
        }
        fn base(name: &str, key: Vec<KeyField>, referenced_by: &[(&str, &str)]) -> EntityTable {
            EntityTable {
                name: name.into(),
                kind: TableKind::Base,
                key,
                referenced_by: referenced_by.iter().map(|(t, c)| ColumnRef::new(t, c)).collect(),
            }
        }
        fn dependent(name: &str, key: Vec<KeyField>, referenced_by: &[(&str, &str)]) -> EntityTable {
            EntityTable {
                kind: TableKind::Dependent,
                ..base(name, key, referenced_by)
            }
        }
        fn fact(name: &str, key: &[&str]) -> FactTable {
            FactTable {
                name: name.into(),
                key: key.iter().map(|c| c.to_string()).collect(),
            }
        }

        Self {
            name: "lokali".into(),
            entities: vec![
                base("product_categories", vec![text("name")], &[("products", "category_id")]),
                base(
                    "regions",
                    vec![KeyField::Fallback(vec!["code".into(), "name".into()])],
                    &[("localities", "region_id")],
                ),
                base("units", vec![text("name")], &[("prices", "unit_id")]),
                base("languages", vec![text("name")], &[]),
                base("stores", vec![text("name")], &[("product_prices", "store_id")]),
                base(
                    "suppliers",
                    vec![text("name")],
                    &[
                        ("supplier_prices", "supplier_id"),
                        ("supplier_product_availability", "supplier_id"),
                        ("supplier_product_availability_history", "supplier_id"),
                    ],
                ),
                dependent(
                    "products",
                    vec![text("name"), reference("category_id")],
                    &[
                        ("product_prices", "product_id"),
                        ("supplier_prices", "product_id"),
                        ("supplier_product_availability", "product_id"),
                        ("supplier_product_availability_history", "product_id"),
                        ("prices", "product_id"),
                    ],
                ),
                dependent(
                    "localities",
                    vec![text("name"), reference("region_id")],
                    &[
                        ("supplier_prices", "locality_id"),
                        ("suppliers", "locality_id"),
                        ("prices", "locality_id"),
                    ],
                ),
            ],
            facts: vec![
                fact("product_prices", &["product_id", "store_id"]),
                fact("supplier_prices", &["supplier_id", "price_id"]),
                fact("supplier_product_availability", &["supplier_id", "product_id"]),
            ],
        }
    }

    pub fn entity(&self, name: &str) -> Option<&EntityTable> {
        self.entities.iter().find(|t| t.name == name)
    }

    pub fn fact(&self, name: &str) -> Option<&FactTable> {
        self.facts.iter().find(|t| t.name == name)
    }

    pub fn entities_of(&self, kind: TableKind) -> impl Iterator<Item = &EntityTable> {
        self.entities.iter().filter(move |t| t.kind == kind)
    }

    /// Entity tables whose mapping is rewritten into `target`.
    pub fn feeders<'a>(&'a self, target: &'a ColumnRef) -> impl Iterator<Item = &'a EntityTable> {
        self.entities.iter().filter(move |t| t.referenced_by.contains(target))
    }

    /// Every table name the graph mentions, including rewrite-only targets.
    pub fn table_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        let all = self
            .entities
            .iter()
            .map(|t| t.name.as_str())
            .chain(self.facts.iter().map(|t| t.name.as_str()))
            .chain(
                self.entities
                    .iter()
                    .flat_map(|t| t.referenced_by.iter().map(|r| r.table.as_str())),
            );
        for name in all {
            if seen.insert(name) {
                names.push(name);
            }
        }
        names
    }

    pub fn knows_table(&self, name: &str) -> bool {
        self.table_names().contains(&name)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(DedupError::ConfigValidation(msg));

        if self.entities.is_empty() && self.facts.is_empty() {
            return invalid(format!("schema '{}' declares no tables", self.name));
        }

        let mut names = HashSet::new();
        for name in self.entities.iter().map(|t| &t.name).chain(self.facts.iter().map(|t| &t.name)) {
            check_ident("table", name)?;
            if !names.insert(name.as_str()) {
                return invalid(format!("table '{name}' is declared more than once"));
            }
        }

        for table in &self.entities {
            if table.kind == TableKind::Fact {
                return invalid(format!(
                    "table '{}': facts go in [[fact]], not [[table]]",
                    table.name
                ));
            }
            if table.key.is_empty() {
                return invalid(format!("table '{}': key is empty", table.name));
            }
            for field in &table.key {
                let cols = field.columns();
                if cols.is_empty() {
                    return invalid(format!("table '{}': fallback key lists no columns", table.name));
                }
                for col in cols {
                    check_ident("column", col)?;
                }
            }
            let has_reference = table.key.iter().any(KeyField::is_reference);
            match (table.kind, has_reference) {
                (TableKind::Base, true) => {
                    return invalid(format!(
                        "table '{}': base tables cannot key on a reference column",
                        table.name
                    ));
                }
                (TableKind::Dependent, false) => {
                    return invalid(format!(
                        "table '{}': dependent tables need a reference column in their key",
                        table.name
                    ));
                }
                _ => {}
            }

            let mut targets = HashSet::new();
            for target in &table.referenced_by {
                check_ident("table", &target.table)?;
                check_ident("column", &target.column)?;
                if !targets.insert(target) {
                    return invalid(format!(
                        "table '{}': reference {target} listed twice",
                        table.name
                    ));
                }
            }
        }

        for fact in &self.facts {
            if fact.key.is_empty() {
                return invalid(format!("fact '{}': key is empty", fact.name));
            }
            for col in &fact.key {
                check_ident("column", col)?;
            }
        }

        // Mappings rewrite FK columns, never primary keys.
        for table in &self.entities {
            for target in &table.referenced_by {
                if target.column == "id" {
                    return invalid(format!(
                        "table '{}': cannot rewrite primary key {target}",
                        table.name
                    ));
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// ASCII letter or underscore, then letters, digits, underscores.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_ident(what: &str, s: &str) -> Result<()> {
    if is_identifier(s) {
        Ok(())
    } else {
        Err(DedupError::ConfigValidation(format!("invalid {what} name: {s:?}")))
    }
}

/// Double-quote an identifier for SQLite.
pub fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}
