//! HTTP client for metawfd's local control plane.
//!
//! Talks to `metawfd` via its loopback HTTP API (SPEC_FULL.md Section 6).

use meta_core::Run;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running at {addr}\n  → start with: metawfd\n  → or set METAWFD_ADDR if using a different address")]
    ConnectionFailed { addr: String },

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("unauthorized: check METAWFD_TOKEN env var or --token flag")]
    Unauthorized,

    #[error(
        "daemon not ready after {timeout_ms}ms at {addr}\n  → ensure metawfd is running\n  → check METAWFD_TOKEN if auth is enabled"
    )]
    DaemonNotReady { addr: String, timeout_ms: u64 },
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            let addr = e
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            ClientError::ConnectionFailed { addr }
        } else {
            ClientError::HttpError {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}

/// Request payload for `POST /runs` (spec Section 4.8).
#[derive(Debug, Serialize)]
pub struct CreateRunRequest {
    pub source_entity_id: String,
    pub meta_workflow_id: String,
    pub primary_file_input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Default total timeout for daemon readiness probe.
const DEFAULT_READY_TIMEOUT_MS: u64 = 5000;
/// Initial backoff delay for readiness probe.
const INITIAL_BACKOFF_MS: u64 = 200;

/// HTTP client for `metawfd`.
pub struct Client {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            http: reqwest::Client::new(),
        }
    }

    /// Returns the daemon address (for error messages).
    pub fn addr(&self) -> &str {
        &self.base_url
    }

    /// Probe `/health`. `Ok(true)` healthy, `Ok(false)` unhealthy
    /// response, `Err` connection failed.
    pub async fn check_health(&self) -> Result<bool, ClientError> {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        Ok(response.status().is_success())
    }

    /// Wait for the daemon to become ready, with exponential backoff
    /// starting at 200ms up to a 5s total window.
    pub async fn wait_for_ready(&self) -> Result<(), ClientError> {
        self.wait_for_ready_with_timeout(DEFAULT_READY_TIMEOUT_MS)
            .await
    }

    pub async fn wait_for_ready_with_timeout(&self, timeout_ms: u64) -> Result<(), ClientError> {
        let start = std::time::Instant::now();
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            match self.check_health().await {
                Ok(true) => return Ok(()),
                Ok(false) | Err(_) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    if elapsed >= timeout_ms {
                        return Err(ClientError::DaemonNotReady {
                            addr: self.base_url.clone(),
                            timeout_ms,
                        });
                    }
                    eprintln!(
                        "waiting for daemon at {} (retrying in {}ms)",
                        self.base_url, backoff_ms
                    );
                    let remaining = timeout_ms.saturating_sub(elapsed);
                    let sleep_ms = backoff_ms.min(remaining);
                    tokio::time::sleep(std::time::Duration::from_millis(sleep_ms)).await;
                    backoff_ms = backoff_ms.saturating_mul(2);
                }
            }
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    async fn handle_error(&self, response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();
        if status == 401 {
            return ClientError::Unauthorized;
        }
        if status == 404 {
            return ClientError::RunNotFound("resource not found".to_string());
        }
        let message = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| "unknown error".to_string());
        ClientError::HttpError { status, message }
    }

    /// `POST /runs`.
    pub async fn create_run(&self, req: CreateRunRequest) -> Result<Run, ClientError> {
        let url = format!("{}/runs", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(&req)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// `GET /runs`.
    pub async fn list_runs(&self) -> Result<Vec<Run>, ClientError> {
        let url = format!("{}/runs", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// `GET /runs/:id`.
    pub async fn get_run(&self, run_id: &str) -> Result<Run, ClientError> {
        let url = format!("{}/runs/{run_id}", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// `POST /runs/:id/reconcile`.
    pub async fn reconcile_run(&self, run_id: &str) -> Result<Run, ClientError> {
        let url = format!("{}/runs/{run_id}/reconcile", self.base_url);
        let response = self.http.post(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// `POST /runs/:id/reset-failed`.
    pub async fn reset_failed(&self, run_id: &str) -> Result<Run, ClientError> {
        let url = format!("{}/runs/{run_id}/reset-failed", self.base_url);
        let response = self.http.post(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}
