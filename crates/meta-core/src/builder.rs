//! Run Builder (C4).
//!
//! Combines the Shape Analyzer, Shard Enumerator, and DAG Compiler into a
//! run plan: a flat list of `ShardRecord`s with concrete dependency edges
//! that respect scatter/gather rules. See spec Section 4.4. Grounded in
//! `original_source/wfl_utils/wfl_parser.py::write_wfl_run`.

use crate::dag::{CompileError, CompiledDag};
use crate::shape::{enumerate_shards, ShapeError};
use crate::types::{render_coord, ShardCoord, ShardRecord, ShardStatus, Shape, Step};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// Build the run plan for `end_steps` against `shape`.
///
/// Steps are visited in the DAG Compiler's topological order. A running
/// `scatter` map records each visited step's effective scatter dimension,
/// since later steps may inherit or gather from it (spec Section 4.4,
/// steps 1-2; Section 9 "scatter inheritance"/"gather dimension
/// reduction").
pub fn build(
    dag: &CompiledDag,
    end_steps: &[String],
    shape: &Shape,
) -> Result<Vec<ShardRecord>, BuildError> {
    let steps = dag.order(end_steps)?;
    let mut scatter: HashMap<String, u8> = HashMap::new();
    let mut records = Vec::new();

    for step in &steps {
        let scatter_dimension = effective_scatter_dimension(step, &scatter);
        if scatter_dimension > 0 {
            scatter.insert(step.name.clone(), scatter_dimension);
        }

        let shards = shards_for_dimension(shape, scatter_dimension)?;
        for coord in &shards {
            let dependencies = dependencies_for_shard(step, coord, scatter_dimension, &scatter, shape)?;
            records.push(ShardRecord {
                step_name: step.name.clone(),
                shard_coord: render_coord(coord),
                status: ShardStatus::Pending,
                output_handle: None,
                engine_job_id: None,
                dependencies,
            });
        }
    }
    Ok(records)
}

fn shards_for_dimension(shape: &Shape, dimension: u8) -> Result<Vec<ShardCoord>, ShapeError> {
    if dimension == 0 {
        Ok(vec![vec![]])
    } else {
        enumerate_shards(shape, dimension)
    }
}

/// Spec Section 4.4 step 1: determine the effective scatter dimension of
/// `step`, given the scatter dimensions already recorded for its
/// dependencies.
fn effective_scatter_dimension(step: &Step, scatter: &HashMap<String, u8>) -> u8 {
    if step.is_scatter > 0 {
        return step.is_scatter;
    }
    let mut scatter_dimension = 0u8;
    let mut in_gather = true;
    let mut gather_dimensions = Vec::new();
    // `step.dependencies` is a `BTreeSet`, so this walks predecessors in a
    // fixed (alphabetical) order, giving "first such predecessor" a
    // deterministic meaning.
    for dep in &step.dependencies {
        if let Some(&dep_dim) = scatter.get(dep) {
            scatter_dimension = dep_dim;
            if let Some(&k) = step.gather_from.get(dep) {
                gather_dimensions.push(dep_dim.saturating_sub(k));
            } else {
                in_gather = false;
                break;
            }
        }
    }
    if in_gather {
        if let Some(&max) = gather_dimensions.iter().max() {
            scatter_dimension = max;
        }
    }
    scatter_dimension
}

/// Spec Section 4.4 step 3: wire up one shard's dependency list.
fn dependencies_for_shard(
    step: &Step,
    coord: &ShardCoord,
    scatter_dimension: u8,
    scatter: &HashMap<String, u8>,
    shape: &Shape,
) -> Result<Vec<String>, ShapeError> {
    let mut dependencies = Vec::new();
    for dep in &step.dependencies {
        if let Some(&k) = step.gather_from.get(dep) {
            let dep_dimension = scatter.get(dep).copied().unwrap_or(0);
            let gather_dimension = dep_dimension.saturating_sub(k);
            let dep_shards = shards_for_dimension(shape, dep_dimension)?;
            let full_gather = scatter_dimension == 0 || scatter_dimension > gather_dimension;
            for dep_coord in &dep_shards {
                let matches = full_gather
                    || prefix_matches(dep_coord, coord, scatter_dimension as usize);
                if matches {
                    dependencies.push(format!("{dep}:{}", render_coord(dep_coord)));
                }
            }
        } else {
            // No gather: the predecessor shard shares this step's own
            // coordinate (only sound when the predecessor's scatter
            // dimension matches, which inheritance guarantees).
            dependencies.push(format!("{dep}:{}", render_coord(coord)));
        }
    }
    Ok(dependencies)
}

fn prefix_matches(dep_coord: &ShardCoord, coord: &ShardCoord, len: usize) -> bool {
    dep_coord.get(..len) == coord.get(..len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MetaWorkflow, Step, StepArgument};

    /// Builds a step whose `is_scatter`/`gather_from`/`dependencies` are
    /// derived (by `compile`, via `dag()` below) from synthetic
    /// `declared_args` rather than set directly — exercising the same
    /// Parse path (`Step::derive_attributes`) real meta-workflow
    /// documents go through.
    fn step(name: &str, is_scatter: u8, deps: &[&str], gather_from: &[(&str, u8)]) -> Step {
        let mut declared_args = Vec::new();
        if is_scatter > 0 {
            declared_args.push(StepArgument {
                argument_name: "scattered_input".to_string(),
                argument_type: Some("scattered_input".to_string()),
                source_step: None,
                source_argument_name: None,
                scatter: Some(is_scatter),
                gather: None,
            });
        }
        for dep in deps {
            let gather = gather_from.iter().find(|(d, _)| d == dep).map(|(_, k)| *k);
            declared_args.push(StepArgument {
                argument_name: format!("from_{dep}"),
                argument_type: None,
                source_step: Some(dep.to_string()),
                source_argument_name: Some("output".to_string()),
                scatter: None,
                gather,
            });
        }
        Step {
            name: name.to_string(),
            uuid: format!("uuid-{name}"),
            declared_args,
            outputs: vec![],
            is_scatter: 0,
            gather_from: Default::default(),
            dependencies: Default::default(),
        }
    }

    fn dag(steps: Vec<Step>) -> CompiledDag {
        CompiledDag::compile(&MetaWorkflow {
            uuid: "mwf".to_string(),
            title: "test".to_string(),
            steps,
            input: vec![],
        })
        .unwrap()
    }

    fn ids(records: &[ShardRecord]) -> Vec<String> {
        records.iter().map(ShardRecord::id).collect()
    }

    #[test]
    fn scenario_1_linear_unscattered_pipeline() {
        let dag = dag(vec![
            step("A", 0, &[], &[]),
            step("B", 0, &["A"], &[]),
            step("C", 0, &["B"], &[]),
        ]);
        let shape = Shape::default();
        let records = build(&dag, &["C".to_string()], &shape).unwrap();
        assert_eq!(ids(&records), vec!["A:0", "B:0", "C:0"]);
        let b = records.iter().find(|r| r.step_name == "B").unwrap();
        assert_eq!(b.dependencies, vec!["A:0"]);
        let c = records.iter().find(|r| r.step_name == "C").unwrap();
        assert_eq!(c.dependencies, vec!["B:0"]);
    }

    #[test]
    fn scenario_2_scatter_depth_one() {
        let dag = dag(vec![step("A", 1, &[], &[]), step("B", 0, &["A"], &[])]);
        let shape = Shape {
            dim1: vec![3],
            dim2: None,
            dim3: None,
        };
        let records = build(&dag, &["B".to_string()], &shape).unwrap();
        assert_eq!(
            ids(&records),
            vec!["A:0", "A:1", "A:2", "B:0", "B:1", "B:2"]
        );
        for i in 0..3 {
            let b = records
                .iter()
                .find(|r| r.step_name == "B" && r.shard_coord == i.to_string())
                .unwrap();
            assert_eq!(b.dependencies, vec![format!("A:{i}")]);
        }
    }

    #[test]
    fn scenario_3_gather_reduces_to_single_shard() {
        let dag = dag(vec![
            step("A", 1, &[], &[]),
            step("B", 0, &["A"], &[("A", 1)]),
        ]);
        let shape = Shape {
            dim1: vec![3],
            dim2: None,
            dim3: None,
        };
        let records = build(&dag, &["B".to_string()], &shape).unwrap();
        assert_eq!(ids(&records), vec!["A:0", "A:1", "A:2", "B:0"]);
        let b = records.iter().find(|r| r.step_name == "B").unwrap();
        assert_eq!(b.dependencies, vec!["A:0", "A:1", "A:2"]);
    }

    #[test]
    fn scenario_4_two_dim_scatter_with_prefix_matched_partial_gather() {
        let dag = dag(vec![
            step("A", 2, &[], &[]),
            step("B", 1, &["A"], &[("A", 1)]),
        ]);
        let shape = Shape {
            dim1: vec![2],
            dim2: Some(vec![2, 3]),
            dim3: None,
        };
        let records = build(&dag, &["B".to_string()], &shape).unwrap();
        let a_ids: Vec<&str> = records
            .iter()
            .filter(|r| r.step_name == "A")
            .map(|r| r.shard_coord.as_str())
            .collect();
        assert_eq!(a_ids, vec!["0:0", "0:1", "1:0", "1:1", "1:2"]);

        let b0 = records
            .iter()
            .find(|r| r.step_name == "B" && r.shard_coord == "0")
            .unwrap();
        assert_eq!(b0.dependencies, vec!["A:0:0", "A:0:1"]);

        let b1 = records
            .iter()
            .find(|r| r.step_name == "B" && r.shard_coord == "1")
            .unwrap();
        assert_eq!(b1.dependencies, vec!["A:1:0", "A:1:1", "A:1:2"]);
    }

    #[test]
    fn compiler_totality_every_ordered_step_yields_at_least_one_shard() {
        let dag = dag(vec![step("A", 0, &[], &[]), step("B", 0, &["A"], &[])]);
        let shape = Shape::default();
        let records = build(&dag, &["B".to_string()], &shape).unwrap();
        assert_eq!(records.iter().filter(|r| r.step_name == "A").count(), 1);
        assert_eq!(records.iter().filter(|r| r.step_name == "B").count(), 1);
    }

    #[test]
    fn scatter_inheritance_propagates_through_non_gathering_step() {
        let dag = dag(vec![
            step("A", 1, &[], &[]),
            step("B", 0, &["A"], &[]),
            step("C", 0, &["B"], &[]),
        ]);
        let shape = Shape {
            dim1: vec![2],
            dim2: None,
            dim3: None,
        };
        let records = build(&dag, &["C".to_string()], &shape).unwrap();
        assert_eq!(
            records.iter().filter(|r| r.step_name == "C").count(),
            2,
            "C inherits A's scatter dimension transitively through B"
        );
    }

    #[test]
    fn dependency_cardinality_matches_gather_vs_non_gather_edges() {
        let dag = dag(vec![
            step("A", 1, &[], &[]),
            step("B_gathered", 0, &["A"], &[("A", 1)]),
            step("B_scattered", 0, &["A"], &[]),
        ]);
        let shape = Shape {
            dim1: vec![4],
            dim2: None,
            dim3: None,
        };
        let records = build(
            &dag,
            &["B_gathered".to_string(), "B_scattered".to_string()],
            &shape,
        )
        .unwrap();
        let gathered = records
            .iter()
            .find(|r| r.step_name == "B_gathered")
            .unwrap();
        assert_eq!(gathered.dependencies.len(), 4);

        let per_shard_scattered: Vec<_> = records
            .iter()
            .filter(|r| r.step_name == "B_scattered")
            .collect();
        assert_eq!(per_shard_scattered.len(), 4);
        for shard in per_shard_scattered {
            assert_eq!(shard.dependencies.len(), 1);
        }
    }
}
