//! Run State (C5).
//!
//! Holds a run's shard list and enforces the shard lifecycle state
//! machine. See spec Section 4.5, Section 9 ("State machine" property).

use crate::types::{FinalStatus, Run, ShardRecord, ShardStatus};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("ERR_ILLEGAL_TRANSITION: shard '{shard_id}' cannot move from {from:?} to {to:?}")]
    IllegalTransition {
        shard_id: String,
        from: ShardStatus,
        to: ShardStatus,
    },
    #[error("ERR_NOT_FOUND: no shard with id '{0}'")]
    ShardNotFound(String),
}

/// Thin wrapper around `Run` exposing the Run State operations. Holds no
/// data of its own; all mutation happens in place on the wrapped `Run` so
/// callers can persist it unchanged.
#[derive(Debug)]
pub struct RunState<'a> {
    run: &'a mut Run,
}

impl<'a> RunState<'a> {
    pub fn new(run: &'a mut Run) -> Self {
        Self { run }
    }

    /// Shards whose status is `pending` and whose every dependency shard
    /// is `completed`.
    pub fn ready(&self) -> Vec<&ShardRecord> {
        self.run
            .shards
            .iter()
            .filter(|shard| shard.status == ShardStatus::Pending)
            .filter(|shard| {
                shard.dependencies.iter().all(|dep_id| {
                    self.run
                        .shards
                        .iter()
                        .find(|s| &s.id() == dep_id)
                        .is_some_and(|dep| dep.status == ShardStatus::Completed)
                })
            })
            .collect()
    }

    /// Enforce `pending -> running -> {completed, failed}`; any other
    /// transition, including no-ops, is `ERR_ILLEGAL_TRANSITION`.
    pub fn transition(
        &mut self,
        shard_id: &str,
        new_status: ShardStatus,
        output: Option<String>,
    ) -> Result<(), StateError> {
        let shard = self
            .run
            .shards
            .iter_mut()
            .find(|s| s.id() == shard_id)
            .ok_or_else(|| StateError::ShardNotFound(shard_id.to_string()))?;

        let allowed = matches!(
            (shard.status, new_status),
            (ShardStatus::Pending, ShardStatus::Running)
                | (ShardStatus::Running, ShardStatus::Completed)
                | (ShardStatus::Running, ShardStatus::Failed)
        );
        if !allowed {
            return Err(StateError::IllegalTransition {
                shard_id: shard_id.to_string(),
                from: shard.status,
                to: new_status,
            });
        }
        shard.status = new_status;
        if output.is_some() {
            shard.output_handle = output;
        }
        Ok(())
    }

    /// Derive `Run.final_status` from shard statuses (spec Section 4.5).
    /// `Stopped`/`QualityMetricFailed` are never derived here; they are
    /// set only by explicit caller command elsewhere.
    pub fn final_status(&self) -> FinalStatus {
        derive_final_status(&self.run.shards, self.run.final_status)
    }

    /// Recompute and persist `final_status` onto the wrapped `Run`,
    /// unless it currently holds a caller-set terminal value.
    pub fn refresh_final_status(&mut self) {
        self.run.final_status = derive_final_status(&self.run.shards, self.run.final_status);
    }
}

fn derive_final_status(shards: &[ShardRecord], current: FinalStatus) -> FinalStatus {
    if matches!(
        current,
        FinalStatus::Stopped | FinalStatus::QualityMetricFailed
    ) {
        return current;
    }
    if shards.iter().any(|s| s.status == ShardStatus::Failed) {
        return FinalStatus::Failed;
    }
    if shards
        .iter()
        .all(|s| s.status == ShardStatus::Completed)
    {
        return FinalStatus::Completed;
    }
    if shards.iter().any(|s| s.status == ShardStatus::Running) {
        return FinalStatus::Running;
    }
    FinalStatus::Pending
}
