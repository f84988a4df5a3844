//! DAG Compiler (C3).
//!
//! Parses a `MetaWorkflow`'s steps into a dependency graph and produces a
//! topological order for a requested set of terminal steps. See spec
//! Section 4.3. Grounded in
//! `original_source/wfl_utils/wfl_parser.py`'s `Wfl`/`Step`,
//! `_build_wfl_run`, and `_order_wfl_run`.

use crate::types::{MetaWorkflow, Step};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("ERR_SCHEMA: step '{step}' is missing required field '{field}'")]
    Schema { step: String, field: String },
    #[error("ERR_DUPLICATE_STEP: step '{0}' is declared more than once")]
    DuplicateStep(String),
    #[error("ERR_MISSING_DEP: step '{step}' depends on undeclared step '{dependency}'")]
    MissingDependency { step: String, dependency: String },
}

/// A compiled DAG: steps indexed by name, validated for uniqueness.
///
/// Dependencies are stored on each `Step` as name sets rather than
/// indices into this map, matching the teacher's preference for owned,
/// serializable data over cross-referencing pointers; lookups go through
/// `steps` (spec Section 9: "arena + index" is the general pattern, here
/// realized as a name-keyed arena since step names are the stable handle
/// used throughout the spec's wire formats).
#[derive(Debug, Clone)]
pub struct CompiledDag {
    steps: HashMap<String, Step>,
    /// Insertion order from the meta-workflow definition, used to break
    /// topological-sort ties (spec Section 4.3: "Ties broken by insertion
    /// order").
    insertion_order: Vec<String>,
}

impl CompiledDag {
    /// Parse all steps of a `MetaWorkflow` into a `CompiledDag`.
    ///
    /// Fails with `ERR_DUPLICATE_STEP` on name collisions. Per-step
    /// required-field validation (`ERR_SCHEMA`) is enforced at
    /// deserialization time by `Step`'s required fields; this function
    /// focuses on cross-step structural validation. Each step's
    /// `is_scatter`/`gather_from`/`dependencies` are (re)derived from its
    /// `declared_args` here (spec Section 4.3's Parse sub-algorithm, see
    /// `Step::derive_attributes`) — they are never trusted from the wire.
    pub fn compile(meta_workflow: &MetaWorkflow) -> Result<Self, CompileError> {
        let mut steps = HashMap::new();
        let mut insertion_order = Vec::new();
        for step in &meta_workflow.steps {
            if step.name.is_empty() {
                return Err(CompileError::Schema {
                    step: step.uuid.clone(),
                    field: "name".to_string(),
                });
            }
            if steps.contains_key(&step.name) {
                return Err(CompileError::DuplicateStep(step.name.clone()));
            }
            let mut step = step.clone();
            step.derive_attributes();
            insertion_order.push(step.name.clone());
            steps.insert(step.name.clone(), step);
        }
        Ok(Self {
            steps,
            insertion_order,
        })
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    /// Walk dependencies backward from `end_steps` to the reachable set,
    /// then return that set in topological order (a step appears only
    /// after every dependency has appeared). Ties broken by the meta-
    /// workflow's declaration order.
    pub fn order(&self, end_steps: &[String]) -> Result<Vec<Step>, CompileError> {
        let reachable = self.reachable_set(end_steps)?;

        let mut ordered = Vec::with_capacity(reachable.len());
        let mut placed: HashSet<&str> = HashSet::new();
        // Fixed-point pass over insertion order: a step is placeable once
        // all its dependencies are already placed. Since the graph is
        // acyclic and finite, this terminates with every reachable step
        // placed.
        while ordered.len() < reachable.len() {
            let mut progressed = false;
            for name in &self.insertion_order {
                if !reachable.contains(name.as_str()) || placed.contains(name.as_str()) {
                    continue;
                }
                let step = &self.steps[name];
                if step
                    .dependencies
                    .iter()
                    .all(|dep| placed.contains(dep.as_str()))
                {
                    ordered.push(step.clone());
                    placed.insert(name.as_str());
                    progressed = true;
                }
            }
            if !progressed {
                // Every remaining reachable step has an unplaced
                // dependency with no further placements possible: a
                // cycle. The spec assumes acyclic input (Section 3
                // invariant); surface it via the closest existing error.
                let stuck = self
                    .insertion_order
                    .iter()
                    .find(|n| reachable.contains(n.as_str()) && !placed.contains(n.as_str()))
                    .cloned()
                    .unwrap_or_default();
                return Err(CompileError::MissingDependency {
                    step: stuck,
                    dependency: "<cycle>".to_string(),
                });
            }
        }
        Ok(ordered)
    }

    fn reachable_set(&self, end_steps: &[String]) -> Result<HashSet<String>, CompileError> {
        let mut reachable = HashSet::new();
        let mut queue: Vec<String> = Vec::new();
        for end_step in end_steps {
            if !self.steps.contains_key(end_step) {
                return Err(CompileError::MissingDependency {
                    step: end_step.clone(),
                    dependency: end_step.clone(),
                });
            }
            queue.push(end_step.clone());
        }
        while let Some(name) = queue.pop() {
            if !reachable.insert(name.clone()) {
                continue;
            }
            let step = self.steps.get(&name).ok_or_else(|| CompileError::MissingDependency {
                step: name.clone(),
                dependency: name.clone(),
            })?;
            for dep in &step.dependencies {
                if !self.steps.contains_key(dep) {
                    return Err(CompileError::MissingDependency {
                        step: name.clone(),
                        dependency: dep.clone(),
                    });
                }
                if !reachable.contains(dep) {
                    queue.push(dep.clone());
                }
            }
        }
        Ok(reachable)
    }
}
