//! metawfd - meta-workflow orchestration daemon.
//!
//! Library components for the reconciliation daemon process. See
//! SPEC_FULL.md Sections 4.7, 4.8, 5, 6.

pub mod adapters;
pub mod backend;
pub mod config;
pub mod factory;
pub mod scheduler;
pub mod server;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info, warn};

use backend::BackendClient;
use config::Config;
use scheduler::{ReconcileLimits, Scheduler};
use server::AppState;
use store::StoreClient;

/// Type alias for application-level errors with context and backtraces.
pub type AppResult<T> = eyre::Result<T>;

/// Daemon: owns the metadata-store/execution-backend clients, the
/// Scheduler, and the control-plane HTTP server. See SPEC_FULL.md
/// Section 5 (concurrency model): the reconciliation loop and the HTTP
/// server share the same `Scheduler`/`StoreClient`, so a manual
/// `POST /runs/:id/reconcile` and the periodic sweep never race on the
/// same run (the Scheduler's per-run lock covers both paths).
pub struct Daemon {
    config: Config,
    state: Arc<AppState>,
    shutdown: Arc<Notify>,
}

impl Daemon {
    /// Construct a daemon from `config`. Does not bind the HTTP listener
    /// or start reconciling; call `run()` for that.
    pub fn new(config: Config) -> Self {
        let store = Arc::new(StoreClient::new(
            &config.store_base_url,
            config.auth_token.as_deref(),
        ));
        let backend = Arc::new(BackendClient::new(
            &config.backend_base_url,
            config.auth_token.as_deref(),
        ));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&store), backend));
        let state = Arc::new(AppState {
            store,
            scheduler,
            auth_token: config.auth_token.clone(),
            maxcount: config.maxcount,
        });
        Self {
            config,
            state,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the reconciliation loop and HTTP server to stop after the
    /// current pass. Running shards are left in place for the execution
    /// backend to finish (SPEC_FULL.md Section 5).
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Runs the HTTP control plane and the periodic reconciliation sweep
    /// until `shutdown()` is called or either task fails.
    pub async fn run(&self) -> AppResult<()> {
        info!(
            "metawfd starting, control plane on {}",
            self.config.control_plane_addr
        );
        info!(store = %self.config.store_base_url, backend = %self.config.backend_base_url, "connected endpoints");
        if self.config.auth_token.is_some() {
            info!("auth token: enabled");
        }

        let addr: std::net::SocketAddr = self
            .config
            .control_plane_addr
            .parse()
            .map_err(|e| eyre::eyre!("invalid control_plane_addr: {e}"))?;

        let http_state = Arc::clone(&self.state);
        let http_shutdown = Arc::clone(&self.shutdown);
        let http_handle = tokio::spawn(async move {
            let router = server::create_router(http_state);
            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!("failed to bind control plane: {e}");
                    return;
                }
            };
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                http_shutdown.notified().await;
            });
            if let Err(e) = serve.await {
                error!("control plane error: {e}");
            }
        });

        let poll_interval = Duration::from_secs(self.config.poll_interval_sec);
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("shutdown requested, stopping reconciliation loop");
                    break;
                }
                _ = tokio::time::sleep(poll_interval) => {
                    if let Err(e) = self.reconcile_all().await {
                        warn!("reconciliation sweep failed: {e}");
                    }
                }
            }
        }

        let _ = http_handle.await;
        Ok(())
    }

    /// One sweep: list all non-terminal runs and reconcile each in turn.
    /// Sequential on purpose (SPEC_FULL.md Section 5: the core itself is
    /// single-threaded; the execution backend is where real parallelism
    /// happens).
    async fn reconcile_all(&self) -> AppResult<()> {
        let runs: Vec<meta_core::Run> = self
            .state
            .store
            .search("MetaWorkflowRun", &[("final_status", "pending")])
            .await?;
        let mut running: Vec<meta_core::Run> = self
            .state
            .store
            .search("MetaWorkflowRun", &[("final_status", "running")])
            .await?;
        let mut runs = runs;
        runs.append(&mut running);

        for run in runs {
            let meta_workflow: meta_core::MetaWorkflow =
                self.state.store.get_item(&run.meta_workflow_id).await?;
            let limits = ReconcileLimits {
                maxcount: self.config.maxcount,
            };
            if let Err(e) = self
                .state
                .scheduler
                .reconcile(&run.uuid, &meta_workflow, limits)
                .await
            {
                warn!(run = %run.uuid, error = %e, "run reconciliation failed");
            }
        }
        Ok(())
    }
}
