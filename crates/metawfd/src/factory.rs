//! Run Factory (C8).
//!
//! Bootstraps a fresh Run document from a source entity and a
//! meta-workflow. See spec Section 4.8. Grounded in
//! `original_source/magma_ff/create_metawfr.py`'s
//! `MetaWorkflowRunFromSampleProcessing.post_metawfr`.

use std::collections::HashMap;

use meta_core::{
    analyze, build, BuildError, CompiledDag, FinalStatus, InputObject, MaterializeError,
    MetaWorkflow, Run, Shape, ShapeError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::adapters::InputAdapter;
use crate::store::{StoreClient, StoreError};

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error("ERR_NOT_FOUND: {0}")]
    NotFound(String),
    #[error("ERR_SCHEMA: {0}")]
    Schema(String),
}

const RUN_COLLECTION: &str = "meta-workflow-run";

/// Identifying/propagated fields copied from the source entity onto the
/// new Run (spec Section 4.8 step 5).
#[derive(Debug, Clone, Default)]
pub struct RunSeed {
    pub project: Option<String>,
    pub institution: Option<String>,
    pub title: String,
    pub input_samples: Vec<String>,
    pub common_fields: HashMap<String, String>,
}

/// Generic source-entity document; only the fields the factory needs.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntity {
    pub uuid: String,
}

#[derive(Debug, Serialize)]
struct SourceEntityPatch {
    meta_workflow_runs: Vec<String>,
}

/// Bootstraps a Run from `(source_entity_id, meta_workflow_id,
/// input_adapter)` per spec Section 4.8's five steps.
pub async fn create_run(
    store: &StoreClient,
    source_entity_id: &str,
    meta_workflow_id: &str,
    adapter: &dyn InputAdapter,
    primary_file_input: &str,
    seed: RunSeed,
) -> Result<Run, FactoryError> {
    // Step 1: fetch source entity & meta-workflow.
    let source_entity: SourceEntity = store
        .get_item(source_entity_id)
        .await
        .map_err(|_| FactoryError::NotFound(source_entity_id.to_string()))?;
    let meta_workflow: MetaWorkflow = store
        .get_item(meta_workflow_id)
        .await
        .map_err(|_| FactoryError::NotFound(meta_workflow_id.to_string()))?;

    // Step 2: Input Adapter derives the InputObject's raw values.
    let input = derive_input_object(&meta_workflow, adapter);

    // Step 3: Input Materializer over meta-workflow inputs without an
    // S/s, producing the Run's seed `input` block for later
    // reconciliation passes.
    let seed_input = materialize_seed_input(&meta_workflow, &input)?;

    // Step 4: Run Builder using the primary file input's Shape.
    let file_by_sample = input
        .file_input(primary_file_input)
        .ok_or_else(|| FactoryError::Schema(format!("no value for '{primary_file_input}'")))?;
    let shape = shape_of(file_by_sample)?;
    let dag = CompiledDag::compile(&meta_workflow)?;
    let end_steps: Vec<String> = terminal_step_names(&meta_workflow, &dag);
    let shards = build(&dag, &end_steps, &shape)?;

    // Step 5: assemble and persist the Run document.
    let run = Run {
        uuid: Uuid::new_v4().to_string(),
        meta_workflow_id: meta_workflow_id.to_string(),
        input: seed_input,
        shards,
        final_status: FinalStatus::Pending,
        associated_sample_processing: Some(source_entity.uuid.clone()),
        input_samples: seed.input_samples,
        project: seed.project,
        institution: seed.institution,
        title: seed.title,
        common_fields: seed.common_fields,
    };

    let created: Run = store.create(RUN_COLLECTION, &run).await?;

    store
        .patch(
            &source_entity.uuid,
            &SourceEntityPatch {
                meta_workflow_runs: vec![created.uuid.clone()],
            },
        )
        .await?;

    Ok(created)
}

fn derive_input_object(meta_workflow: &MetaWorkflow, adapter: &dyn InputAdapter) -> InputObject {
    let mut input = InputObject::default();
    for decl in &meta_workflow.input {
        match adapter.value_of(&decl.name) {
            Some(crate::adapters::AdapterValue::File(files)) => {
                input.files.insert(decl.name.clone(), files);
            }
            Some(crate::adapters::AdapterValue::Parameter(value)) => {
                input.parameters.insert(decl.name.clone(), value);
            }
            None => {}
        }
    }
    input
}

/// Run the Input Materializer once per declared input, ignoring
/// step-local/upstream wiring (there is no shard yet), to produce the
/// Run's persisted seed `input` block.
fn materialize_seed_input(
    meta_workflow: &MetaWorkflow,
    input: &InputObject,
) -> Result<InputObject, FactoryError> {
    let mut seed = InputObject::default();
    for decl in &meta_workflow.input {
        if let Some(files) = input.file_input(&decl.name) {
            seed.files.insert(decl.name.clone(), files.clone());
        }
        if let Some(param) = input.parameter(&decl.name) {
            seed.parameters.insert(decl.name.clone(), param.clone());
        }
    }
    Ok(seed)
}

fn shape_of(file_by_sample: &meta_core::FileBySample) -> Result<Shape, FactoryError> {
    analyze(file_by_sample).map_err(FactoryError::from)
}

/// A step is terminal when no other step's derived `dependencies` name
/// it. Reads dependencies off `dag` (post-`compile`, post-derivation)
/// rather than `meta_workflow.steps` directly: `Step.dependencies` is
/// only populated after `Step::derive_attributes` runs inside
/// `CompiledDag::compile`, and is always empty on the raw wire struct.
fn terminal_step_names(meta_workflow: &MetaWorkflow, dag: &CompiledDag) -> Vec<String> {
    let depended_on: std::collections::HashSet<&String> = meta_workflow
        .steps
        .iter()
        .filter_map(|s| dag.step(&s.name))
        .flat_map(|s| s.dependencies.iter())
        .collect();
    meta_workflow
        .steps
        .iter()
        .map(|s| &s.name)
        .filter(|name| !depended_on.contains(*name))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_step_names_excludes_depended_on_steps() {
        use meta_core::{Step, StepArgument};
        use std::collections::HashMap;

        let a = Step {
            name: "A".to_string(),
            uuid: "uuid-A".to_string(),
            declared_args: vec![],
            outputs: vec![],
            is_scatter: 0,
            gather_from: HashMap::new(),
            dependencies: Default::default(),
        };
        let b = Step {
            name: "B".to_string(),
            uuid: "uuid-B".to_string(),
            declared_args: vec![StepArgument {
                argument_name: "from_a".to_string(),
                argument_type: None,
                source_step: Some("A".to_string()),
                source_argument_name: Some("output".to_string()),
                scatter: None,
                gather: None,
            }],
            outputs: vec![],
            is_scatter: 0,
            gather_from: HashMap::new(),
            dependencies: Default::default(),
        };
        let mwf = MetaWorkflow {
            uuid: "mwf".to_string(),
            title: "t".to_string(),
            steps: vec![a, b],
            input: vec![],
        };
        let dag = CompiledDag::compile(&mwf).unwrap();
        assert_eq!(terminal_step_names(&mwf, &dag), vec!["B".to_string()]);
    }
}
