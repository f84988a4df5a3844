//! HTTP client for the execution backend.
//!
//! Contract from spec Section 6: `submit(job_spec) -> engine_job_id`,
//! `status(engine_job_id) -> {run_status, output_files?}`. Grounded in
//! `original_source/magma_ff/wfrutils.py`'s `FFWfrUtils` (status lookup,
//! `filter_wfr_output_minimal_processed`) and `magma_ff/utils.py`'s
//! `make_embed_request`/`check_status`.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("ERR_BACKEND_IO: {0}")]
    Io(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// One entry of an engine job's raw output list.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputFile {
    pub workflow_argument_name: String,
    #[serde(rename = "type")]
    pub output_type: String,
    pub value: OutputFileValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputFileValue {
    pub uuid: String,
}

/// The engine's run status vocabulary (spec Section 4.7: `{started,
/// complete} -> running/completed`, `{error, ...} -> failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineRunStatus {
    Started,
    Complete,
    Error,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobStatus {
    pub run_status: EngineRunStatus,
    #[serde(default)]
    pub output_files: Option<Vec<OutputFile>>,
}

impl JobStatus {
    /// Processed-file output only (`type = "Output processed file"`),
    /// reduced to `{argument_name, file}` pairs. Matches
    /// `filter_wfr_output_minimal_processed` exactly.
    pub fn processed_outputs(&self) -> Vec<(String, String)> {
        self.output_files
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .filter(|f| f.output_type == "Output processed file")
            .map(|f| (f.workflow_argument_name.clone(), f.value.uuid.clone()))
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct JobSpec {
    pub step_name: String,
    pub shard_coord: String,
    pub arguments: serde_json::Value,
    pub config: serde_json::Value,
    pub common_fields: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    engine_job_id: String,
}

/// HTTP client for the execution backend.
pub struct BackendClient {
    base_url: String,
    auth_token: Option<String>,
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: &str, auth_token: Option<&str>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.map(String::from),
            http: reqwest::Client::new(),
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.auth_token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    /// `submit(job_spec) -> engine_job_id`.
    pub async fn submit(&self, job_spec: &JobSpec) -> Result<String, BackendError> {
        let url = format!("{}/jobs", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(job_spec)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Io(format!("submit failed: {status}: {body}")));
        }
        let body: SubmitResponse = response.json().await?;
        Ok(body.engine_job_id)
    }

    /// `status(engine_job_id) -> {run_status, output_files?}`.
    pub async fn status(&self, engine_job_id: &str) -> Result<JobStatus, BackendError> {
        let url = format!("{}/jobs/{engine_job_id}", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Io(format!("status failed: {status}: {body}")));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processed_outputs_filters_by_exact_type_string() {
        let status = JobStatus {
            run_status: EngineRunStatus::Complete,
            output_files: Some(vec![
                OutputFile {
                    workflow_argument_name: "output_bam".to_string(),
                    output_type: "Output processed file".to_string(),
                    value: OutputFileValue {
                        uuid: "uuid-1".to_string(),
                    },
                },
                OutputFile {
                    workflow_argument_name: "log".to_string(),
                    output_type: "Output QC file".to_string(),
                    value: OutputFileValue {
                        uuid: "uuid-2".to_string(),
                    },
                },
            ]),
        };
        assert_eq!(
            status.processed_outputs(),
            vec![("output_bam".to_string(), "uuid-1".to_string())]
        );
    }

    #[test]
    fn processed_outputs_is_empty_when_no_output_files() {
        let status = JobStatus {
            run_status: EngineRunStatus::Started,
            output_files: None,
        };
        assert!(status.processed_outputs().is_empty());
    }

    #[test]
    fn engine_run_status_maps_unknown_values_to_other() {
        let parsed: EngineRunStatus = serde_json::from_str("\"stopped\"").unwrap();
        assert_eq!(parsed, EngineRunStatus::Other);
    }
}
