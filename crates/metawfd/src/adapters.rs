//! Input Adapters.
//!
//! The biology-specific logic (sample ordering, pedigree reshaping,
//! file-format filtering) lives here, never in `meta-core`. See spec
//! Section 9 ("Polymorphic input adapters"). Grounded in
//! `original_source/magma_ff/create_metawfr.py`'s
//! `InputPropertiesFromSampleProcessing` (pedigree-based sample
//! ordering) and `MetaWorkflowRunInput.fetch_files`.

use async_trait::async_trait;
use meta_core::{FileBySample, ParameterValue};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("ERR_SCHEMA: {0}")]
    Schema(String),
}

/// One resolved value an adapter can hand back for a meta-workflow input
/// name (spec Section 9: "capability set `{value_of(name) -> InputValue}`").
#[derive(Debug, Clone)]
pub enum AdapterValue {
    File(FileBySample),
    Parameter(ParameterValue),
}

/// Derives an `InputObject`'s raw values from a source entity. Each
/// source-entity kind (SampleProcessing, Cohort, ...) gets one
/// implementation; this is the only place biology-specific logic lives.
#[async_trait]
pub trait InputAdapter: Send + Sync {
    /// Resolve the value for meta-workflow input `name`, or `None` if
    /// this source entity has nothing for it.
    fn value_of(&self, name: &str) -> Option<AdapterValue>;
}

/// Pedigree relationship of a sample within a SampleProcessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    Proband,
    Mother,
    Father,
    Other,
}

/// A single sample carried by a SampleProcessing, with the per-file-type
/// handles needed to build FILE inputs.
#[derive(Debug, Clone)]
pub struct SampleRecord {
    pub bam_sample_id: String,
    pub relationship: Relationship,
    /// File handles keyed by file-type input name (e.g. "fastqs", "cram",
    /// "gvcf"), ordered as declared on the sample.
    pub files: HashMap<String, Vec<String>>,
}

/// Input Adapter for a SampleProcessing source entity: a cohort of
/// related samples (typically a proband and, if sequenced as a trio,
/// the parents).
///
/// Sorts samples `proband, mother, father, ...others` (spec Section 9;
/// `original_source/magma_ff/create_metawfr.py::sort_by_sample_name`)
/// before indexing them into FILE inputs, so sample index `0` is always
/// the proband regardless of submission order.
pub struct SampleProcessingAdapter {
    sorted_samples: Vec<SampleRecord>,
    parameters: HashMap<String, ParameterValue>,
}

impl SampleProcessingAdapter {
    /// Build an adapter from a SampleProcessing's unsorted sample list.
    /// Requires exactly one proband; fails with `ERR_SCHEMA` otherwise.
    pub fn new(
        samples: Vec<SampleRecord>,
        parameters: HashMap<String, ParameterValue>,
    ) -> Result<Self, AdapterError> {
        let proband_count = samples
            .iter()
            .filter(|s| s.relationship == Relationship::Proband)
            .count();
        if proband_count != 1 {
            return Err(AdapterError::Schema(format!(
                "expected exactly one proband, found {proband_count}"
            )));
        }
        let sorted_samples = sort_by_relationship(samples);
        Ok(Self {
            sorted_samples,
            parameters,
        })
    }

    fn file_input(&self, name: &str) -> Option<FileBySample> {
        if !self
            .sorted_samples
            .iter()
            .any(|s| s.files.contains_key(name))
        {
            return None;
        }
        let mut by_sample = FileBySample::new();
        for (idx, sample) in self.sorted_samples.iter().enumerate() {
            by_sample.insert(idx, sample.files.get(name).cloned().unwrap_or_default());
        }
        Some(by_sample)
    }
}

#[async_trait]
impl InputAdapter for SampleProcessingAdapter {
    fn value_of(&self, name: &str) -> Option<AdapterValue> {
        if let Some(file_by_sample) = self.file_input(name) {
            return Some(AdapterValue::File(file_by_sample));
        }
        self.parameters
            .get(name)
            .cloned()
            .map(AdapterValue::Parameter)
    }
}

/// `proband, mother, father, ...others` (others keep their relative
/// input order).
fn sort_by_relationship(mut samples: Vec<SampleRecord>) -> Vec<SampleRecord> {
    samples.sort_by_key(|s| match s.relationship {
        Relationship::Proband => 0,
        Relationship::Mother => 1,
        Relationship::Father => 2,
        Relationship::Other => 3,
    });
    samples
}
