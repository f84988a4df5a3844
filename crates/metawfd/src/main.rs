//! metawfd - meta-workflow orchestration daemon.
//!
//! Main entry point for the daemon binary.

use metawfd::config::Config;
use metawfd::Daemon;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

fn main() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::default_path()
        .filter(|p| p.exists())
        .map(|p| Config::from_file(&p))
        .transpose()
        .unwrap_or_else(|e| {
            error!("failed to load config, using defaults: {e}");
            None
        })
        .unwrap_or_default();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    runtime.block_on(async {
        let daemon = Daemon::new(config);
        tokio::select! {
            result = daemon.run() => {
                if let Err(e) = result {
                    error!("daemon error: {e}");
                    std::process::exit(1);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT");
                daemon.shutdown();
            }
        }
    });
}
