//! Local control-plane HTTP server for `metawfd`.
//!
//! Ambient — not named in spec.md, added because the CLI surface (§6)
//! needs something to talk to. Bound to `127.0.0.1` only. See
//! SPEC_FULL.md Section 6. Grounded in the teacher's `server.rs`
//! (`AppState`, `create_router`, `check_auth` texture), trimmed to the
//! read-mostly endpoint set this system actually needs (no SSE
//! streaming: there is no step-level event log here, only shard status).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use meta_core::Run;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::factory::{self, RunSeed};
use crate::scheduler::{ReconcileLimits, Scheduler};
use crate::store::StoreClient;

/// Shared state for HTTP handlers.
pub struct AppState {
    pub store: Arc<StoreClient>,
    pub scheduler: Arc<Scheduler>,
    pub auth_token: Option<String>,
    pub maxcount: Option<usize>,
}

/// Build the axum router (spec Section 6: `GET /runs`, `GET /runs/:id`,
/// `POST /runs`, `POST /runs/:id/reconcile`, `POST /runs/:id/reset-failed`,
/// `GET /health`).
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/runs", get(list_runs).post(create_run))
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/reconcile", post(reconcile_run))
        .route("/runs/{id}/reset-failed", post(reset_failed))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Bind and serve the control plane on `127.0.0.1:{port}`.
pub async fn start_server(
    state: Arc<AppState>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let router = create_router(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("control plane listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

fn check_auth(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    let Some(expected) = &state.auth_token else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s));
    match provided {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "invalid auth token".to_string(),
            }),
        )),
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "missing auth token".to_string(),
            }),
        )),
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    pub source_entity_id: String,
    pub meta_workflow_id: String,
    pub primary_file_input: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub institution: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn list_runs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;
    let runs: Vec<Run> = state
        .store
        .search("MetaWorkflowRun", &[])
        .await
        .map_err(store_error)?;
    Ok(Json(runs))
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;
    let run: Run = state.store.get_item(&id).await.map_err(store_error)?;
    Ok(Json(run))
}

async fn create_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateRunRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;
    let meta_workflow: meta_core::MetaWorkflow = state
        .store
        .get_item(&req.meta_workflow_id)
        .await
        .map_err(store_error)?;
    let adapter = fetch_adapter(&state, &req.source_entity_id, &meta_workflow)
        .await
        .map_err(factory_error)?;
    let seed = RunSeed {
        project: req.project,
        institution: req.institution,
        title: req.title.unwrap_or_default(),
        input_samples: vec![],
        common_fields: std::collections::HashMap::new(),
    };
    let run = factory::create_run(
        &state.store,
        &req.source_entity_id,
        &req.meta_workflow_id,
        adapter.as_ref(),
        &req.primary_file_input,
        seed,
    )
    .await
    .map_err(factory_error)?;
    Ok((StatusCode::CREATED, Json(run)))
}

async fn reconcile_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;
    let meta_workflow = fetch_meta_workflow_for_run(&state, &id)
        .await
        .map_err(store_error)?;
    let run = state
        .scheduler
        .reconcile(
            &id,
            &meta_workflow,
            ReconcileLimits {
                maxcount: state.maxcount,
            },
        )
        .await
        .map_err(scheduler_error)?;
    Ok(Json(run))
}

async fn reset_failed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;
    let mut run: Run = state.store.get_item(&id).await.map_err(store_error)?;
    for shard in &mut run.shards {
        if shard.status == meta_core::ShardStatus::Failed {
            shard.status = meta_core::ShardStatus::Pending;
            shard.engine_job_id = None;
        }
    }
    {
        let mut state_machine = meta_core::RunState::new(&mut run);
        state_machine.refresh_final_status();
    }
    state.store.patch(&id, &run).await.map_err(store_error)?;
    Ok(Json(run))
}

/// Fetches the meta-workflow for the run named by `run_id` (control-plane
/// handlers only have the run id; the reconcile loop needs the full
/// meta-workflow, not just its steps, to materialize ready shards'
/// meta-workflow-input-sourced arguments).
async fn fetch_meta_workflow_for_run(
    state: &AppState,
    run_id: &str,
) -> Result<meta_core::MetaWorkflow, crate::store::StoreError> {
    let run: Run = state.store.get_item(run_id).await?;
    state.store.get_item(&run.meta_workflow_id).await
}

/// Wire shape of a SampleProcessing source entity in the metadata
/// store, trimmed to what `SampleProcessingAdapter` needs.
#[derive(Debug, Deserialize)]
struct SampleProcessingDoc {
    #[serde(default)]
    samples: Vec<SampleWire>,
    #[serde(default)]
    parameters: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SampleWire {
    bam_sample_id: String,
    relationship: String,
    #[serde(default)]
    files: std::collections::HashMap<String, Vec<String>>,
}

fn parse_relationship(s: &str) -> crate::adapters::Relationship {
    match s.to_ascii_lowercase().as_str() {
        "proband" => crate::adapters::Relationship::Proband,
        "mother" => crate::adapters::Relationship::Mother,
        "father" => crate::adapters::Relationship::Father,
        _ => crate::adapters::Relationship::Other,
    }
}

/// Resolves the concrete `InputAdapter` for a source entity (spec
/// Section 9, "polymorphic input adapters"). Only SampleProcessing
/// source entities exist today, so this always fetches and adapts one;
/// a future source-entity kind would branch here on `meta_workflow` or
/// a discriminator field on the fetched document.
async fn fetch_adapter(
    state: &AppState,
    source_entity_id: &str,
    _meta_workflow: &meta_core::MetaWorkflow,
) -> Result<Box<dyn crate::adapters::InputAdapter>, crate::factory::FactoryError> {
    let doc: SampleProcessingDoc = state
        .store
        .get_item(source_entity_id)
        .await
        .map_err(|_| crate::factory::FactoryError::NotFound(source_entity_id.to_string()))?;

    let samples = doc
        .samples
        .into_iter()
        .map(|s| crate::adapters::SampleRecord {
            bam_sample_id: s.bam_sample_id,
            relationship: parse_relationship(&s.relationship),
            files: s.files,
        })
        .collect();

    let parameters = doc
        .parameters
        .into_iter()
        .map(|(k, v)| (k, meta_core::ParameterValue::Scalar(v)))
        .collect();

    crate::adapters::SampleProcessingAdapter::new(samples, parameters)
        .map(|a| Box::new(a) as Box<dyn crate::adapters::InputAdapter>)
        .map_err(|e| crate::factory::FactoryError::Schema(e.to_string()))
}

fn store_error(e: crate::store::StoreError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        crate::store::StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        crate::store::StoreError::Io(_) => StatusCode::BAD_GATEWAY,
    };
    error!(error = %e, "store error");
    (status, Json(ErrorResponse { error: e.to_string() }))
}

fn factory_error(e: crate::factory::FactoryError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        crate::factory::FactoryError::NotFound(_) => StatusCode::NOT_FOUND,
        crate::factory::FactoryError::Schema(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    error!(error = %e, "run factory error");
    (status, Json(ErrorResponse { error: e.to_string() }))
}

fn scheduler_error(e: crate::scheduler::SchedulerError) -> (StatusCode, Json<ErrorResponse>) {
    error!(error = %e, "scheduler error");
    (StatusCode::BAD_GATEWAY, Json(ErrorResponse { error: e.to_string() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state(auth_token: Option<String>) -> Arc<AppState> {
        let store = Arc::new(StoreClient::new("http://localhost:0", None));
        let backend = Arc::new(crate::backend::BackendClient::new("http://localhost:0", None));
        Arc::new(AppState {
            store: Arc::clone(&store),
            scheduler: Arc::new(Scheduler::new(store, backend)),
            auth_token,
            maxcount: None,
        })
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let router = create_router(test_state(None));
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_run_requires_auth_when_configured() {
        let router = create_router(test_state(Some("secret".to_string())));
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/runs/abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
