//! The run's phase ordering, expressed as data.
//!
//! [`PhasePlan::build`] lays the schema graph out into four phases. The same
//! [`OrderLedger`] admission rules are applied twice: once statically over
//! the whole plan before any transaction opens, and again by the controller
//! before each step executes.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::error::{DedupError, Result, Stage};
use crate::schema::{ColumnRef, SchemaGraph, TableKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Deduplicate tables whose keys hold no FK.
    Base,
    /// Rewrite every column referencing a base table.
    BasePropagation,
    /// Deduplicate tables keyed on (now canonical) FKs.
    Dependent,
    /// Rewrite columns referencing dependent tables, then collapse facts.
    DependentPropagation,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Base,
        Phase::BasePropagation,
        Phase::Dependent,
        Phase::DependentPropagation,
    ];

    pub fn number(self) -> u8 {
        match self {
            Self::Base => 1,
            Self::BasePropagation => 2,
            Self::Dependent => 3,
            Self::DependentPropagation => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::BasePropagation => "base propagation",
            Self::Dependent => "dependent",
            Self::DependentPropagation => "dependent propagation + leaf",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase {} ({})", self.number(), self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Deduplicate { table: String },
    Rewrite { source: String, target: ColumnRef },
    Collapse { table: String },
}

impl Step {
    /// The table this step mutates.
    pub fn table(&self) -> &str {
        match self {
            Self::Deduplicate { table } | Self::Collapse { table } => table,
            Self::Rewrite { target, .. } => &target.table,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deduplicate { table } => write!(f, "deduplicate {table}"),
            Self::Rewrite { source, target } => write!(f, "rewrite {target} <- {source}"),
            Self::Collapse { table } => write!(f, "collapse {table}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseSpec {
    pub phase: Phase,
    pub steps: Vec<Step>,
}

impl PhaseSpec {
    /// Tables this phase may mutate, in step order.
    pub fn touches(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for step in &self.steps {
            if !out.contains(&step.table()) {
                out.push(step.table());
            }
        }
        out
    }

    /// Mappings that must exist before this phase starts.
    pub fn requires(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for step in &self.steps {
            if let Step::Rewrite { source, .. } = step {
                if !out.contains(&source.as_str()) {
                    out.push(source);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhasePlan {
    pub schema: String,
    pub phases: Vec<PhaseSpec>,
}

impl PhasePlan {
    /// Lay `graph` out into the four phases and check the ordering.
    pub fn build(graph: &SchemaGraph) -> Result<Self> {
        graph.validate()?;

        let dedup_phase = |kind: TableKind| -> Vec<Step> {
            graph
                .entities_of(kind)
                .map(|t| Step::Deduplicate { table: t.name.clone() })
                .collect()
        };
        let rewrite_phase = |kind: TableKind| -> Vec<Step> {
            graph
                .entities_of(kind)
                .flat_map(|t| {
                    t.referenced_by.iter().map(move |target| Step::Rewrite {
                        source: t.name.clone(),
                        target: target.clone(),
                    })
                })
                .collect()
        };

        let mut leaf = rewrite_phase(TableKind::Dependent);
        leaf.extend(graph.facts.iter().map(|f| Step::Collapse { table: f.name.clone() }));

        let plan = Self {
            schema: graph.name.clone(),
            phases: vec![
                PhaseSpec { phase: Phase::Base, steps: dedup_phase(TableKind::Base) },
                PhaseSpec { phase: Phase::BasePropagation, steps: rewrite_phase(TableKind::Base) },
                PhaseSpec { phase: Phase::Dependent, steps: dedup_phase(TableKind::Dependent) },
                PhaseSpec { phase: Phase::DependentPropagation, steps: leaf },
            ],
        };
        plan.check(graph)?;
        Ok(plan)
    }

    /// Replay the plan against a fresh ledger without touching storage.
    pub fn check(&self, graph: &SchemaGraph) -> Result<()> {
        let mut ledger = OrderLedger::new(graph);
        let mut last = None;
        for spec in &self.phases {
            if last.is_some_and(|prev| prev >= spec.phase) {
                return Err(DedupError::UsageOrder {
                    stage: Stage::Plan,
                    table: self.schema.clone(),
                    detail: format!("{} listed after {}", spec.phase, last.unwrap_or(spec.phase)),
                });
            }
            last = Some(spec.phase);
        }
        for (phase, step) in self.steps() {
            ledger.admit(phase, step)?;
            ledger.record(phase, step);
        }
        Ok(())
    }

    pub fn steps(&self) -> impl Iterator<Item = (Phase, &Step)> {
        self.phases.iter().flat_map(|p| p.steps.iter().map(move |s| (p.phase, s)))
    }
}

// ---------------------------------------------------------------------------
// Ordering ledger
// ---------------------------------------------------------------------------

/// Tracks which mappings exist and which columns have been rewritten, and
/// refuses steps whose inputs are not ready yet.
#[derive(Debug)]
pub struct OrderLedger<'g> {
    graph: &'g SchemaGraph,
    produced: HashMap<String, Phase>,
    rewritten: HashSet<(String, ColumnRef)>,
    collapsed: HashSet<String>,
}

impl<'g> OrderLedger<'g> {
    pub fn new(graph: &'g SchemaGraph) -> Self {
        Self {
            graph,
            produced: HashMap::new(),
            rewritten: HashSet::new(),
            collapsed: HashSet::new(),
        }
    }

    pub fn admit(&self, phase: Phase, step: &Step) -> Result<()> {
        let refuse = |table: &str, detail: String| {
            Err(DedupError::UsageOrder { stage: Stage::Phase(phase), table: table.into(), detail })
        };

        match step {
            Step::Deduplicate { table } => {
                let Some(entity) = self.graph.entity(table) else {
                    return refuse(table, "not an entity table in the schema graph".into());
                };
                let expected = match entity.kind {
                    TableKind::Base => Phase::Base,
                    _ => Phase::Dependent,
                };
                if phase != expected {
                    return refuse(table, format!("{} tables are deduplicated in {expected}", entity.kind));
                }
                if self.produced.contains_key(table) {
                    return refuse(table, "already deduplicated in this run".into());
                }
                for field in entity.key.iter().filter(|f| f.is_reference()) {
                    for col in field.columns() {
                        self.require_rewritten(phase, &ColumnRef::new(table, col))?;
                    }
                }
            }
            Step::Rewrite { source, target } => {
                match self.produced.get(source) {
                    Some(&produced_in) if produced_in < phase => {}
                    Some(&produced_in) => {
                        return refuse(
                            &target.table,
                            format!("mapping for '{source}' comes from {produced_in}, not an earlier phase"),
                        );
                    }
                    None => {
                        return refuse(&target.table, format!("mapping for '{source}' does not exist yet"));
                    }
                }
                if self.graph.entity(&target.table).is_some_and(|t| self.produced.contains_key(&t.name))
                    && self.keys_on(target)
                {
                    return refuse(
                        &target.table,
                        format!("{target} is part of a key that was already deduplicated"),
                    );
                }
                if self.collapsed.contains(&target.table) {
                    return refuse(&target.table, "fact table already collapsed".into());
                }
            }
            Step::Collapse { table } => {
                let Some(fact) = self.graph.fact(table) else {
                    return refuse(table, "not a fact table in the schema graph".into());
                };
                for col in &fact.key {
                    self.require_rewritten(phase, &ColumnRef::new(table, col))?;
                }
            }
        }
        Ok(())
    }

    pub fn record(&mut self, phase: Phase, step: &Step) {
        match step {
            Step::Deduplicate { table } => {
                self.produced.insert(table.clone(), phase);
            }
            Step::Rewrite { source, target } => {
                self.rewritten.insert((source.clone(), target.clone()));
            }
            Step::Collapse { table } => {
                self.collapsed.insert(table.clone());
            }
        }
    }

    /// `column` has been rewritten by every table that feeds it.
    fn require_rewritten(&self, phase: Phase, column: &ColumnRef) -> Result<()> {
        for feeder in self.graph.feeders(column) {
            let done = self.produced.contains_key(&feeder.name)
                && self.rewritten.contains(&(feeder.name.clone(), column.clone()));
            if !done {
                return Err(DedupError::UsageOrder {
                    stage: Stage::Phase(phase),
                    table: column.table.clone(),
                    detail: format!("{column} still waits for the '{}' mapping", feeder.name),
                });
            }
        }
        Ok(())
    }

    fn keys_on(&self, column: &ColumnRef) -> bool {
        self.graph.entity(&column.table).is_some_and(|t| {
            t.key.iter().any(|f| f.is_reference() && f.columns().contains(&column.column.as_str()))
        })
    }
}
