//! Input Materializer (C6).
//!
//! Builds the argument list for one shard about to be launched. See spec
//! Section 4.6. Grounded in
//! `original_source/magma_ff/create_metawfr.py`'s
//! `InputPropertiesFromSampleProcessing` (`fetch_files`,
//! `format_file_input_value`, `cast_parameter_value`).

use crate::types::{ArgumentRecord, InputObject, InputType, MetaWorkflow, ShardRecord, Step};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaterializeError {
    #[error("ERR_MISSING_INPUT: no value supplied for argument '{0}'")]
    MissingInput(String),
    #[error("ERR_SCHEMA: {0}")]
    Schema(String),
    #[error("ERR_FILE_CARDINALITY: sample {sample} of argument '{argument_name}' has {count} files, expected exactly 1")]
    FileCardinality {
        argument_name: String,
        sample: usize,
        count: usize,
    },
    #[error("ERR_DIM_UNSUPPORTED: argument '{argument_name}' declares unsupported dim {dim}")]
    DimUnsupported { argument_name: String, dim: u8 },
}

/// Build the argument list for `shard` of `step`, per spec Section 4.6's
/// four traversal rules.
pub fn materialize(
    step: &Step,
    shard: &ShardRecord,
    meta_workflow: &MetaWorkflow,
    input: &InputObject,
    all_shards: &[ShardRecord],
) -> Result<Vec<ArgumentRecord>, MaterializeError> {
    let mut records = Vec::with_capacity(step.declared_args.len());
    for arg in &step.declared_args {
        if let Some(source_step) = &arg.source_step {
            records.extend(materialize_upstream_arg(step, arg, source_step, shard, all_shards)?);
            continue;
        }
        let Some(input_name) = &arg.argument_type else {
            return Err(MaterializeError::Schema(format!(
                "argument '{}' has neither source_step nor argument_type",
                arg.argument_name
            )));
        };
        let decl = meta_workflow.input_decl(input_name).ok_or_else(|| {
            MaterializeError::Schema(format!("unknown meta-workflow input '{input_name}'"))
        })?;
        match decl.input_type {
            InputType::Parameter => {
                records.push(materialize_parameter_arg(arg, decl, input)?);
            }
            InputType::File => {
                records.extend(materialize_file_arg(arg, decl, input)?);
            }
        }
    }
    Ok(records)
}

fn materialize_parameter_arg(
    arg: &crate::types::StepArgument,
    decl: &crate::types::InputDecl,
    input: &InputObject,
) -> Result<ArgumentRecord, MaterializeError> {
    use crate::types::ParameterValue;

    let value = if let Some(default) = &decl.default_value {
        ParameterValue::Scalar(default.clone())
    } else {
        input
            .parameter(&decl.name)
            .cloned()
            .ok_or_else(|| MaterializeError::MissingInput(arg.argument_name.clone()))?
    };
    let value_type = decl
        .value_type
        .clone()
        .unwrap_or_else(|| value.value_type_hint().to_string());
    Ok(ArgumentRecord::Parameter {
        argument_name: arg.argument_name.clone(),
        value: value.render(),
        value_type,
    })
}

fn materialize_file_arg(
    arg: &crate::types::StepArgument,
    decl: &crate::types::InputDecl,
    input: &InputObject,
) -> Result<Vec<ArgumentRecord>, MaterializeError> {
    if let Some(default_files) = &decl.default_files {
        return Ok(default_files
            .iter()
            .enumerate()
            .map(|(i, file)| ArgumentRecord::File {
                argument_name: arg.argument_name.clone(),
                file: file.clone(),
                dimension: i.to_string(),
            })
            .collect());
    }

    let file_by_sample = input
        .file_input(&decl.name)
        .ok_or_else(|| MaterializeError::MissingInput(arg.argument_name.clone()))?;
    let dim = decl.dim.ok_or_else(|| {
        MaterializeError::Schema(format!(
            "file argument '{}' has no declared dim",
            arg.argument_name
        ))
    })?;

    let mut samples: Vec<_> = file_by_sample.iter().collect();
    samples.sort_by_key(|(i, _)| **i);

    match dim {
        1 => samples
            .into_iter()
            .map(|(i, files)| {
                if files.len() != 1 {
                    return Err(MaterializeError::FileCardinality {
                        argument_name: arg.argument_name.clone(),
                        sample: *i,
                        count: files.len(),
                    });
                }
                Ok(ArgumentRecord::File {
                    argument_name: arg.argument_name.clone(),
                    file: files[0].clone(),
                    dimension: i.to_string(),
                })
            })
            .collect(),
        2 => Ok(samples
            .into_iter()
            .flat_map(|(i, files)| {
                files.iter().enumerate().map(move |(j, file)| ArgumentRecord::File {
                    argument_name: arg.argument_name.clone(),
                    file: file.clone(),
                    dimension: format!("{i},{j}"),
                })
            })
            .collect()),
        other => Err(MaterializeError::DimUnsupported {
            argument_name: arg.argument_name.clone(),
            dim: other,
        }),
    }
}

fn materialize_upstream_arg(
    step: &Step,
    arg: &crate::types::StepArgument,
    source_step: &str,
    shard: &ShardRecord,
    all_shards: &[ShardRecord],
) -> Result<Vec<ArgumentRecord>, MaterializeError> {
    let _ = step; // gather reduction is already baked into `shard.dependencies` by the Run Builder.
    let mut records = Vec::new();
    for dep_id in &shard.dependencies {
        let Some((dep_step, _)) = dep_id.split_once(':') else {
            continue;
        };
        if dep_step != source_step {
            continue;
        }
        let dep_shard = all_shards
            .iter()
            .find(|s| &s.id() == dep_id)
            .ok_or_else(|| MaterializeError::MissingInput(arg.argument_name.clone()))?;
        let output = dep_shard
            .output_handle
            .clone()
            .ok_or_else(|| MaterializeError::MissingInput(arg.argument_name.clone()))?;
        records.push(ArgumentRecord::File {
            argument_name: arg.argument_name.clone(),
            file: output,
            dimension: dep_shard.shard_coord.clone(),
        });
    }
    if records.is_empty() {
        return Err(MaterializeError::MissingInput(arg.argument_name.clone()));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        FileBySample, InputDecl, MetaWorkflow, ParameterValue, ShardStatus, StepArgument,
    };
    use std::collections::{BTreeSet, HashMap};

    fn meta_workflow(input: Vec<InputDecl>) -> MetaWorkflow {
        MetaWorkflow {
            uuid: "mwf".to_string(),
            title: "test".to_string(),
            steps: vec![],
            input,
        }
    }

    fn step_with_args(args: Vec<StepArgument>) -> Step {
        Step {
            name: "B".to_string(),
            uuid: "uuid-B".to_string(),
            declared_args: args,
            outputs: vec![],
            is_scatter: 0,
            gather_from: HashMap::new(),
            dependencies: BTreeSet::new(),
        }
    }

    fn shard(step_name: &str, coord: &str, deps: &[&str]) -> ShardRecord {
        ShardRecord {
            step_name: step_name.to_string(),
            shard_coord: coord.to_string(),
            status: ShardStatus::Pending,
            output_handle: None,
            engine_job_id: None,
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn parameter_arg_pulls_from_caller_input() {
        let mwf = meta_workflow(vec![InputDecl {
            name: "counts".to_string(),
            input_type: InputType::Parameter,
            dim: None,
            value_type: Some("array".to_string()),
            default_value: None,
            default_files: None,
        }]);
        let step = step_with_args(vec![StepArgument {
            argument_name: "counts_arg".to_string(),
            argument_type: Some("counts".to_string()),
            source_step: None,
            source_argument_name: None,
            scatter: None,
            gather: None,
        }]);
        let mut input = InputObject::default();
        input.parameters.insert(
            "counts".to_string(),
            ParameterValue::Json(serde_json::json!([1, 2, 3])),
        );
        let shard = shard("B", "0", &[]);
        let records = materialize(&step, &shard, &mwf, &input, &[]).unwrap();
        match &records[0] {
            ArgumentRecord::Parameter {
                argument_name,
                value,
                value_type,
            } => {
                assert_eq!(argument_name, "counts_arg");
                assert_eq!(value, "[1, 2, 3]");
                assert_eq!(value_type, "array");
            }
            ArgumentRecord::File { .. } => panic!("expected parameter record"),
        }
    }

    #[test]
    fn missing_parameter_is_missing_input_error() {
        let mwf = meta_workflow(vec![InputDecl {
            name: "counts".to_string(),
            input_type: InputType::Parameter,
            dim: None,
            value_type: None,
            default_value: None,
            default_files: None,
        }]);
        let step = step_with_args(vec![StepArgument {
            argument_name: "counts_arg".to_string(),
            argument_type: Some("counts".to_string()),
            source_step: None,
            source_argument_name: None,
            scatter: None,
            gather: None,
        }]);
        let input = InputObject::default();
        let shard = shard("B", "0", &[]);
        assert_eq!(
            materialize(&step, &shard, &mwf, &input, &[]),
            Err(MaterializeError::MissingInput("counts_arg".to_string()))
        );
    }

    #[test]
    fn file_arg_dim_one_requires_exactly_one_file_per_sample() {
        let mwf = meta_workflow(vec![InputDecl {
            name: "fastqs".to_string(),
            input_type: InputType::File,
            dim: Some(1),
            value_type: None,
            default_value: None,
            default_files: None,
        }]);
        let step = step_with_args(vec![StepArgument {
            argument_name: "fastq".to_string(),
            argument_type: Some("fastqs".to_string()),
            source_step: None,
            source_argument_name: None,
            scatter: None,
            gather: None,
        }]);
        let mut input = InputObject::default();
        let mut files: FileBySample = HashMap::new();
        files.insert(0, vec!["a.fastq.gz".to_string(), "b.fastq.gz".to_string()]);
        input.files.insert("fastqs".to_string(), files);
        let shard = shard("B", "0", &[]);
        assert_eq!(
            materialize(&step, &shard, &mwf, &input, &[]),
            Err(MaterializeError::FileCardinality {
                argument_name: "fastq".to_string(),
                sample: 0,
                count: 2,
            })
        );
    }

    #[test]
    fn file_arg_dim_two_emits_one_record_per_file() {
        let mwf = meta_workflow(vec![InputDecl {
            name: "fastqs".to_string(),
            input_type: InputType::File,
            dim: Some(2),
            value_type: None,
            default_value: None,
            default_files: None,
        }]);
        let step = step_with_args(vec![StepArgument {
            argument_name: "fastq".to_string(),
            argument_type: Some("fastqs".to_string()),
            source_step: None,
            source_argument_name: None,
            scatter: None,
            gather: None,
        }]);
        let mut input = InputObject::default();
        let mut files: FileBySample = HashMap::new();
        files.insert(0, vec!["a_r1.fastq.gz".to_string(), "a_r2.fastq.gz".to_string()]);
        input.files.insert("fastqs".to_string(), files);
        let shard = shard("B", "0", &[]);
        let records = materialize(&step, &shard, &mwf, &input, &[]).unwrap();
        assert_eq!(records.len(), 2);
        match &records[0] {
            ArgumentRecord::File { dimension, .. } => assert_eq!(dimension, "0,0"),
            ArgumentRecord::Parameter { .. } => panic!("expected file record"),
        }
    }

    #[test]
    fn upstream_arg_pulls_output_handle_from_predecessor_shard() {
        let step = step_with_args(vec![StepArgument {
            argument_name: "bam".to_string(),
            argument_type: None,
            source_step: Some("A".to_string()),
            source_argument_name: Some("output_bam".to_string()),
            scatter: None,
            gather: None,
        }]);
        let mwf = meta_workflow(vec![]);
        let input = InputObject::default();
        let mut a_shard = shard("A", "0", &[]);
        a_shard.output_handle = Some("s3://bucket/a.bam".to_string());
        let b_shard = shard("B", "0", &["A:0"]);
        let records = materialize(&step, &b_shard, &mwf, &input, &[a_shard]).unwrap();
        match &records[0] {
            ArgumentRecord::File { file, dimension, .. } => {
                assert_eq!(file, "s3://bucket/a.bam");
                assert_eq!(dimension, "0");
            }
            ArgumentRecord::Parameter { .. } => panic!("expected file record"),
        }
    }

    #[test]
    fn upstream_arg_with_absent_output_is_missing_input() {
        let step = step_with_args(vec![StepArgument {
            argument_name: "bam".to_string(),
            argument_type: None,
            source_step: Some("A".to_string()),
            source_argument_name: None,
            scatter: None,
            gather: None,
        }]);
        let mwf = meta_workflow(vec![]);
        let input = InputObject::default();
        let a_shard = shard("A", "0", &[]); // output_handle left None
        let b_shard = shard("B", "0", &["A:0"]);
        assert_eq!(
            materialize(&step, &b_shard, &mwf, &input, &[a_shard]),
            Err(MaterializeError::MissingInput("bam".to_string()))
        );
    }
}
