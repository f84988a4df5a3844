//! Output rendering for the metawfctl CLI.
//!
//! Formats run and shard information for terminal display. See
//! SPEC_FULL.md Section 6 ("human-readable by default").

use meta_core::{FinalStatus, Run, ShardStatus};

pub fn print_run_created(run: &Run) {
    println!("Created run: {}", run.uuid);
    println!("  Meta-workflow: {}", run.meta_workflow_id);
    println!("  Title:         {}", run.title);
    println!("  Status:        {}", format_final_status(run.final_status));
    println!("  Shards:        {}", run.shards.len());
}

pub fn print_run_list(runs: &[Run]) {
    if runs.is_empty() {
        println!("No runs found.");
        return;
    }

    println!(
        "{:<36}  {:<20}  {:<12}  {:<8}",
        "ID", "TITLE", "STATUS", "SHARDS"
    );
    println!("{}", "-".repeat(82));

    for run in runs {
        println!(
            "{:<36}  {:<20}  {:<12}  {:<8}",
            run.uuid,
            truncate(&run.title, 20),
            format_final_status(run.final_status),
            run.shards.len(),
        );
    }

    println!();
    println!("{} run(s)", runs.len());
}

pub fn print_run_details(run: &Run) {
    println!("Run: {}", run.uuid);
    println!();
    println!("  Meta-workflow: {}", run.meta_workflow_id);
    println!("  Title:         {}", run.title);
    println!("  Status:        {}", format_final_status(run.final_status));
    if let Some(ref project) = run.project {
        println!("  Project:       {project}");
    }
    if let Some(ref institution) = run.institution {
        println!("  Institution:   {institution}");
    }
    if let Some(ref associated) = run.associated_sample_processing {
        println!("  Source entity: {associated}");
    }

    if !run.shards.is_empty() {
        println!();
        println!("  Shards:");
        println!(
            "    {:<24}  {:<8}  {:<10}  {:<24}",
            "STEP", "COORD", "STATUS", "ENGINE JOB"
        );
        println!("    {}", "-".repeat(72));
        for shard in &run.shards {
            println!(
                "    {:<24}  {:<8}  {:<10}  {:<24}",
                shard.step_name,
                shard.shard_coord,
                format_shard_status(shard.status),
                shard.engine_job_id.as_deref().unwrap_or("-"),
            );
        }
    }
}

fn format_final_status(status: FinalStatus) -> &'static str {
    match status {
        FinalStatus::Pending => "PENDING",
        FinalStatus::Running => "RUNNING",
        FinalStatus::Completed => "COMPLETED",
        FinalStatus::Failed => "FAILED",
        FinalStatus::Stopped => "STOPPED",
        FinalStatus::QualityMetricFailed => "QC_FAILED",
    }
}

fn format_shard_status(status: ShardStatus) -> &'static str {
    match status {
        ShardStatus::Pending => "PENDING",
        ShardStatus::Running => "RUNNING",
        ShardStatus::Completed => "COMPLETED",
        ShardStatus::Failed => "FAILED",
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len.saturating_sub(3)])
    }
}
