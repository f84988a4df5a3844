//! Scheduler / Reconciler (C7).
//!
//! Single-pass, idempotent reconciliation of one Run against the
//! execution backend. See spec Section 4.7, Section 5 (concurrency
//! model: serialize per-run, no backward shard transitions).

use std::collections::HashMap;
use std::sync::Arc;

use meta_core::{materialize, MaterializeError, MetaWorkflow, Run, RunState, ShardStatus, StateError};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::backend::{BackendClient, BackendError, EngineRunStatus, JobSpec};
use crate::store::{StoreClient, StoreError};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("ERR_SCHEMA: no step named '{0}' on the meta-workflow")]
    UnknownStep(String),
}

/// The collection name the Run document lives under in the metadata store.
const RUN_COLLECTION: &str = "meta-workflow-run";

/// Caps the number of shards submitted per reconciliation pass, per spec
/// Section 4.7 ("until an optional `maxcount` is reached").
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileLimits {
    pub maxcount: Option<usize>,
}

/// Drives reconciliation passes against the metadata store and execution
/// backend. Holds no per-run state of its own; every pass re-fetches and
/// re-persists the full Run document (spec Section 5: "full-document
/// PATCHes performed last in a cycle").
pub struct Scheduler {
    store: Arc<StoreClient>,
    backend: Arc<BackendClient>,
    /// Serializes reconciliation at run granularity (spec Section 5:
    /// "Concurrent reconciliation of the same Run is disallowed"),
    /// mirroring the teacher's `claim_lock: Mutex<()>`.
    run_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Scheduler {
    pub fn new(store: Arc<StoreClient>, backend: Arc<BackendClient>) -> Self {
        Self {
            store,
            backend,
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, run_uuid: &str) -> Arc<Mutex<()>> {
        let mut locks = self.run_locks.lock().await;
        locks
            .entry(run_uuid.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run one reconciliation pass for `run_uuid` against `meta_workflow`.
    /// Returns the persisted Run.
    pub async fn reconcile(
        &self,
        run_uuid: &str,
        meta_workflow: &MetaWorkflow,
        limits: ReconcileLimits,
    ) -> Result<Run, SchedulerError> {
        let run_lock = self.lock_for(run_uuid).await;
        let _guard = run_lock.lock().await;

        let mut run: Run = self.store.get_item(run_uuid).await?;

        self.poll_running_shards(&mut run).await?;

        if !matches!(
            run.final_status,
            meta_core::FinalStatus::Stopped | meta_core::FinalStatus::QualityMetricFailed
        ) {
            self.submit_ready_shards(&mut run, meta_workflow, limits).await?;
        }

        {
            let mut state = RunState::new(&mut run);
            state.refresh_final_status();
        }

        self.store.patch(run_uuid, &run).await?;
        Ok(run)
    }

    /// Step 2: for each `running` shard, poll the engine and map its
    /// status; on completion, record the processed output as the shard's
    /// output handle (spec Section 4.7 step 2).
    async fn poll_running_shards(&self, run: &mut Run) -> Result<(), SchedulerError> {
        let running_ids: Vec<String> = run
            .shards
            .iter()
            .filter(|s| s.status == ShardStatus::Running)
            .map(|s| s.id())
            .collect();

        for shard_id in running_ids {
            let engine_job_id = run
                .shards
                .iter()
                .find(|s| s.id() == shard_id)
                .and_then(|s| s.engine_job_id.clone());
            let Some(engine_job_id) = engine_job_id else {
                continue;
            };

            let status = self.backend.status(&engine_job_id).await?;
            match status.run_status {
                EngineRunStatus::Complete => {
                    let output = status
                        .processed_outputs()
                        .into_iter()
                        .next()
                        .map(|(_, file)| file);
                    let mut state = RunState::new(run);
                    state.transition(&shard_id, ShardStatus::Completed, output)?;
                }
                EngineRunStatus::Error => {
                    let mut state = RunState::new(run);
                    state.transition(&shard_id, ShardStatus::Failed, None)?;
                }
                EngineRunStatus::Started | EngineRunStatus::Other => {
                    // still running; nothing to update.
                }
            }
        }
        Ok(())
    }

    /// Step 3: materialize and submit as many `ready()` shards as
    /// `limits.maxcount` allows, in deterministic order.
    async fn submit_ready_shards(
        &self,
        run: &mut Run,
        meta_workflow: &MetaWorkflow,
        limits: ReconcileLimits,
    ) -> Result<(), SchedulerError> {
        let ready_ids: Vec<String> = {
            let state = RunState::new(run);
            let mut ready = state.ready();
            ready.sort_by(|a, b| (&a.step_name, &a.shard_coord).cmp(&(&b.step_name, &b.shard_coord)));
            if let Some(max) = limits.maxcount {
                ready.truncate(max);
            }
            ready.into_iter().map(|s| s.id()).collect()
        };

        for shard_id in ready_ids {
            let shard = run
                .shards
                .iter()
                .find(|s| s.id() == shard_id)
                .expect("ready() id came from run.shards")
                .clone();
            let step = meta_workflow
                .steps
                .iter()
                .find(|s| s.name == shard.step_name)
                .ok_or_else(|| SchedulerError::UnknownStep(shard.step_name.clone()))?;

            let args = materialize(step, &shard, meta_workflow, &run.input, &run.shards)?;
            let job_spec = JobSpec {
                step_name: step.name.clone(),
                shard_coord: shard.shard_coord.clone(),
                arguments: serde_json::to_value(&args).unwrap_or(serde_json::Value::Null),
                config: serde_json::Value::Null,
                common_fields: run.common_fields.clone(),
            };

            match self.backend.submit(&job_spec).await {
                Ok(engine_job_id) => {
                    let target = run
                        .shards
                        .iter_mut()
                        .find(|s| s.id() == shard_id)
                        .expect("shard present");
                    target.engine_job_id = Some(engine_job_id);
                    let mut state = RunState::new(run);
                    state.transition(&shard_id, ShardStatus::Running, None)?;
                }
                Err(_) => {
                    // Submission failure marks the shard failed directly
                    // (spec Section 4.7: "no retries ... on submission
                    // failure the shard is marked failed"). The state
                    // machine only allows pending->running->failed, so
                    // route through running first.
                    let mut state = RunState::new(run);
                    state.transition(&shard_id, ShardStatus::Running, None)?;
                    state.transition(&shard_id, ShardStatus::Failed, None)?;
                }
            }
        }
        Ok(())
    }
}

pub fn run_collection_name() -> &'static str {
    RUN_COLLECTION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_limits_default_is_unbounded() {
        assert!(ReconcileLimits::default().maxcount.is_none());
    }

    #[test]
    fn run_collection_name_matches_store_contract() {
        assert_eq!(run_collection_name(), "meta-workflow-run");
    }
}
