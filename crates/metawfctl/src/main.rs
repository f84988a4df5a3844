//! metawfctl - CLI client for metawfd
//!
//! Local control plane client for the meta-workflow orchestrator
//! daemon. See SPEC_FULL.md Section 6.

mod client;
mod render;

use clap::{Parser, Subcommand};
use client::{Client, ClientError};

/// Default daemon address if none is configured.
const DEFAULT_ADDR: &str = "http://127.0.0.1:4700";

/// CLI client for the metawfd orchestrator daemon.
#[derive(Parser)]
#[command(name = "metawfctl")]
#[command(about = "Control plane for metawfd meta-workflow orchestrator")]
#[command(version)]
struct Cli {
    /// Daemon address (default: http://127.0.0.1:4700)
    #[arg(long, global = true, env = "METAWFD_ADDR")]
    addr: Option<String>,

    /// Auth token for daemon API
    #[arg(long, global = true, env = "METAWFD_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bootstrap a new Run from a source entity and a meta-workflow
    /// (spec Section 4.8).
    CreateRun {
        /// Source entity id (e.g. a SampleProcessing uuid)
        sp_id: String,

        /// Meta-workflow id
        mwf_id: String,

        /// Name of the declared FILE input whose Shape drives shard
        /// construction
        #[arg(long)]
        primary_file_input: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        institution: Option<String>,
    },

    /// Run one reconciliation pass on an existing Run (spec Section 4.7)
    Run {
        /// Run id
        run_id: String,
    },

    /// Flip failed shards back to pending on a Run (spec Section 4.7,
    /// "manual retry")
    ResetFailed {
        /// Run id
        run_id: String,
    },

    /// Show detailed status of a Run
    Status {
        /// Run id
        run_id: String,
    },

    /// List all runs
    List,
}

fn main() {
    let cli = Cli::parse();
    let addr = cli.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let client = Client::new(&addr, cli.token.as_deref());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    let exit_code = runtime.block_on(async { run_command(&client, cli.command).await });
    std::process::exit(exit_code);
}

async fn run_command(client: &Client, command: Command) -> i32 {
    if let Err(e) = client.wait_for_ready().await {
        eprintln!("error: {e}");
        return exit_code_for(&e);
    }

    match command {
        Command::CreateRun {
            sp_id,
            mwf_id,
            primary_file_input,
            title,
            project,
            institution,
        } => {
            let req = client::CreateRunRequest {
                source_entity_id: sp_id,
                meta_workflow_id: mwf_id,
                primary_file_input,
                project,
                institution,
                title,
            };
            match client.create_run(req).await {
                Ok(run) => {
                    render::print_run_created(&run);
                    0
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    exit_code_for(&e)
                }
            }
        }
        Command::Run { run_id } => match client.reconcile_run(&run_id).await {
            Ok(run) => {
                render::print_run_details(&run);
                0
            }
            Err(e) => {
                eprintln!("error: {e}");
                exit_code_for(&e)
            }
        },
        Command::ResetFailed { run_id } => match client.reset_failed(&run_id).await {
            Ok(run) => {
                render::print_run_details(&run);
                0
            }
            Err(e) => {
                eprintln!("error: {e}");
                exit_code_for(&e)
            }
        },
        Command::Status { run_id } => match client.get_run(&run_id).await {
            Ok(run) => {
                render::print_run_details(&run);
                0
            }
            Err(e) => {
                eprintln!("error: {e}");
                exit_code_for(&e)
            }
        },
        Command::List => match client.list_runs().await {
            Ok(runs) => {
                render::print_run_list(&runs);
                0
            }
            Err(e) => {
                eprintln!("error: {e}");
                exit_code_for(&e)
            }
        },
    }
}

/// Exit codes per spec Section 6: `0` success, `1` user error
/// (not-found / schema / cardinality), `2` backend I/O failure.
fn exit_code_for(e: &ClientError) -> i32 {
    match e {
        ClientError::RunNotFound(_) | ClientError::HttpError { status: 400..=499, .. } => 1,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_user_error() {
        assert_eq!(exit_code_for(&ClientError::RunNotFound("x".to_string())), 1);
    }

    #[test]
    fn connection_failure_maps_to_backend_io_error() {
        assert_eq!(
            exit_code_for(&ClientError::ConnectionFailed {
                addr: "http://localhost".to_string()
            }),
            2
        );
    }
}
