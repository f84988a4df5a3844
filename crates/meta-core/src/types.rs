//! Core data model for the meta-workflow orchestration core.
//!
//! These types match the data model defined in the spec (Section 3).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Type of a declared meta-workflow input argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    File,
    Parameter,
}

/// A single input declaration on a `MetaWorkflow`.
///
/// `dim` only applies to `File` inputs. A literal default (`value` for
/// parameters, `files` for file inputs) means the input is not sourced
/// from the caller at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub input_type: InputType,
    /// Declared dimensionality, only meaningful for `File` inputs.
    pub dim: Option<u8>,
    /// Declared value type for `Parameter` inputs (e.g. "string", "array").
    pub value_type: Option<String>,
    /// Literal default parameter value, if the input isn't caller-supplied.
    pub default_value: Option<String>,
    /// Literal default file list, if the input isn't caller-supplied.
    pub default_files: Option<Vec<String>>,
}

impl InputDecl {
    pub fn has_literal_default(&self) -> bool {
        self.default_value.is_some() || self.default_files.is_some()
    }
}

/// A single step (workflow) in a meta-workflow DAG.
///
/// `is_scatter`, `gather_from`, and `dependencies` are never part of the
/// wire format: a real meta-workflow document only carries
/// `declared_args`. They are derived from it by [`Step::derive_attributes`]
/// (spec Section 4.3's Parse sub-algorithm, called by
/// `CompiledDag::compile`), so they are skipped on (de)serialization and
/// default empty until derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub uuid: String,
    /// Arguments declared on this step, as parsed from the meta-workflow.
    pub declared_args: Vec<StepArgument>,
    pub outputs: Vec<String>,
    /// 0 = not scattered; 1..=3 = scattered along that input dimension.
    #[serde(skip, default)]
    pub is_scatter: u8,
    /// `gather_from[pred] = k`: collapse `k` dimensions of predecessor `pred`'s shards.
    #[serde(skip, default)]
    pub gather_from: HashMap<String, u8>,
    #[serde(skip, default)]
    pub dependencies: BTreeSet<String>,
}

impl Step {
    /// Derive `is_scatter`, `gather_from`, and `dependencies` from
    /// `declared_args` (spec Section 4.3 Parse sub-algorithm). Grounded in
    /// `original_source/wfl_utils/wfl_parser.py::Step._attributes`: the
    /// first non-zero `scatter` across arguments wins; `dependencies` is
    /// the union of argument `source_step`s; `gather_from[source_step]`
    /// is set to the first non-zero `gather` seen for that predecessor.
    pub fn derive_attributes(&mut self) {
        let mut is_scatter = 0u8;
        let mut gather_from: HashMap<String, u8> = HashMap::new();
        let mut dependencies: BTreeSet<String> = BTreeSet::new();

        for arg in &self.declared_args {
            if is_scatter == 0 {
                if let Some(scatter) = arg.scatter {
                    if scatter != 0 {
                        is_scatter = scatter;
                    }
                }
            }
            if let Some(source_step) = &arg.source_step {
                dependencies.insert(source_step.clone());
                if let Some(gather) = arg.gather {
                    if gather != 0 {
                        gather_from.entry(source_step.clone()).or_insert(gather);
                    }
                }
            }
        }

        self.is_scatter = is_scatter;
        self.gather_from = gather_from;
        self.dependencies = dependencies;
    }
}

/// A single argument entry as declared on a `Step`.
///
/// Mirrors the wire shape of a workflow's `arguments` entries: an
/// argument either names a `source_step` (wiring it to an upstream
/// step's output) or is sourced from the meta-workflow/caller inputs
/// directly (`source_step` absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepArgument {
    pub argument_name: String,
    /// Meta-workflow input name this argument is bound to, when not
    /// sourced from a predecessor step.
    pub argument_type: Option<String>,
    pub source_step: Option<String>,
    pub source_argument_name: Option<String>,
    pub scatter: Option<u8>,
    pub gather: Option<u8>,
}

/// A meta-workflow: an identified DAG of steps plus its input declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaWorkflow {
    pub uuid: String,
    pub title: String,
    pub steps: Vec<Step>,
    pub input: Vec<InputDecl>,
}

impl MetaWorkflow {
    pub fn input_decl(&self, name: &str) -> Option<&InputDecl> {
        self.input.iter().find(|d| d.name.eq_ignore_ascii_case(name))
    }
}

/// A scalar, list, or nested-structure parameter value.
///
/// Lists/structures are serialized to compact JSON text when placed
/// onto a shard (spec Section 3, 4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Scalar(String),
    Json(serde_json::Value),
}

impl ParameterValue {
    /// Render per spec 4.6 rule 1: JSON-encode lists/structures, else use string form.
    ///
    /// Matches the source system's `json.dumps(value)` text exactly,
    /// including its `", "`/`": "` separators (spec Section 8, scenario 5:
    /// `counts = [1, 2, 3]` -> `"[1, 2, 3]"`).
    pub fn render(&self) -> String {
        match self {
            Self::Scalar(s) => s.clone(),
            Self::Json(v) if v.is_array() || v.is_object() => python_json_dumps(v),
            Self::Json(v) => json_scalar_to_string(v),
        }
    }

    /// Rough value-type tag for the rendered value, used when a declaration
    /// doesn't supply one explicitly (observed only for literal defaults).
    pub fn value_type_hint(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "string",
            Self::Json(v) if v.is_array() => "array",
            Self::Json(v) if v.is_object() => "object",
            Self::Json(_) => "string",
        }
    }
}

fn json_scalar_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render JSON text with Python `json.dumps`' default separators
/// (`", "` between items, `": "` between object keys and values).
fn python_json_dumps(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(python_json_dumps).collect();
            format!("[{}]", rendered.join(", "))
        }
        serde_json::Value::Object(map) => {
            let rendered: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", serde_json::to_string(k).unwrap(), python_json_dumps(v)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        other => other.to_string(),
    }
}

/// Per-sample ordered file handle list, keyed by sample index.
pub type FileBySample = HashMap<usize, Vec<String>>;

/// The caller-supplied input object (spec Section 3).
///
/// `files` holds one `FileBySample` per `FILE` input name; `parameters`
/// holds one `ParameterValue` per `PARAMETER` input name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputObject {
    pub files: HashMap<String, FileBySample>,
    pub parameters: HashMap<String, ParameterValue>,
}

impl InputObject {
    /// Case-insensitive lookup, per spec 4.6 rule 1.
    pub fn file_input(&self, name: &str) -> Option<&FileBySample> {
        lookup_ci(&self.files, name)
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterValue> {
        lookup_ci(&self.parameters, name)
    }
}

fn lookup_ci<'a, V>(map: &'a HashMap<String, V>, name: &str) -> Option<&'a V> {
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

/// Per-dimension cardinality of a FILE input, computed by the Shape Analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Shape {
    /// `dim1 = [n]`
    pub dim1: Vec<usize>,
    /// `dim2 = [m0, m1, ...]`, one entry per sample.
    pub dim2: Option<Vec<usize>>,
    /// `dim3 = [[...], ...]`, one sublist of entries per sample.
    pub dim3: Option<Vec<Vec<usize>>>,
}

/// A coordinate tuple identifying one shard of a step.
pub type ShardCoord = Vec<usize>;

/// Render a shard coordinate the way the spec's `ShardRecord.shard_coord`
/// is rendered: colon-delimited, or `"0"` for the unscattered case.
pub fn render_coord(coord: &ShardCoord) -> String {
    if coord.is_empty() {
        "0".to_string()
    } else {
        coord
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Shard lifecycle status (spec Section 3, 4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One concrete parallel instance of a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardRecord {
    pub step_name: String,
    pub shard_coord: String,
    pub status: ShardStatus,
    pub output_handle: Option<String>,
    pub engine_job_id: Option<String>,
    /// Ordered list of `"step_name:shard_coord"` strings.
    pub dependencies: Vec<String>,
}

impl ShardRecord {
    /// The `"step_name:shard_coord"` identifier used in dependency lists.
    pub fn id(&self) -> String {
        format!("{}:{}", self.step_name, self.shard_coord)
    }
}

/// `Run.final_status` (spec Section 3, 4.5). `Stopped` and
/// `QualityMetricFailed` are set only by explicit caller command, never
/// derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
    QualityMetricFailed,
}

/// A single submitted argument record, built by the Input Materializer
/// (spec Section 9: "tagged union for argument values").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "argument_type", rename_all = "lowercase")]
pub enum ArgumentRecord {
    File {
        argument_name: String,
        file: String,
        dimension: String,
    },
    Parameter {
        argument_name: String,
        value: String,
        value_type: String,
    },
}

impl ArgumentRecord {
    pub fn argument_name(&self) -> &str {
        match self {
            Self::File { argument_name, .. } | Self::Parameter { argument_name, .. } => {
                argument_name
            }
        }
    }
}

/// A run of a meta-workflow against a fixed `InputObject`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub uuid: String,
    pub meta_workflow_id: String,
    pub input: InputObject,
    pub shards: Vec<ShardRecord>,
    pub final_status: FinalStatus,
    /// Linkage to the source entity the run was created from (e.g. a
    /// SampleProcessing uuid).
    pub associated_sample_processing: Option<String>,
    pub input_samples: Vec<String>,
    pub project: Option<String>,
    pub institution: Option<String>,
    pub title: String,
    /// Fields propagated onto each launched job's submission object.
    pub common_fields: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_coord_empty_is_zero() {
        assert_eq!(render_coord(&[]), "0");
    }

    #[test]
    fn render_coord_joins_with_colon() {
        assert_eq!(render_coord(&[0, 2]), "0:2");
    }

    #[test]
    fn parameter_value_renders_array_as_json() {
        let v = ParameterValue::Json(serde_json::json!([1, 2, 3]));
        assert_eq!(v.render(), "[1, 2, 3]");
    }

    #[test]
    fn parameter_value_renders_scalar_as_is() {
        let v = ParameterValue::Scalar("hello".to_string());
        assert_eq!(v.render(), "hello");
    }

    #[test]
    fn input_object_lookup_is_case_insensitive() {
        let mut obj = InputObject::default();
        obj.parameters.insert(
            "Counts".to_string(),
            ParameterValue::Scalar("3".to_string()),
        );
        assert!(obj.parameter("counts").is_some());
        assert!(obj.parameter("COUNTS").is_some());
    }

    #[test]
    fn shard_record_id_joins_step_and_coord() {
        let record = ShardRecord {
            step_name: "A".to_string(),
            shard_coord: "0:1".to_string(),
            status: ShardStatus::Pending,
            output_handle: None,
            engine_job_id: None,
            dependencies: vec![],
        };
        assert_eq!(record.id(), "A:0:1");
    }
}
