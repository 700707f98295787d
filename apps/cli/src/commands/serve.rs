//! `refine serve` implementation.

use anyhow::Result;
use colored::Colorize;
use refinery_core::Engine;
use refinery_training::RunStatus;
use std::time::Duration;
use tracing::{info, warn};

/// Runs the engine until Ctrl-C: starts pending jobs oldest first while
/// capacity allows, with the stuck-job sweeper in the background.
pub async fn execute(engine: &Engine, poll_secs: u64) -> Result<()> {
    let sweep_interval = Duration::from_secs(engine.config.orchestrator.sweep_interval_secs);
    let sweeper = engine.orchestrator.spawn_stuck_sweeper(sweep_interval);

    println!(
        "{} Serving workspace {} (max {} concurrent jobs)",
        "▶".cyan(),
        engine.config.workspace_root().display().to_string().bold(),
        engine.orchestrator.config().max_concurrent_jobs
    );
    println!("  {}", "Press Ctrl-C to stop.".dimmed());

    let mut ticker = tokio::time::interval(Duration::from_secs(poll_secs.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                match start_pending(engine).await {
                    Ok(0) => {}
                    Ok(started) => info!(started, active = engine.orchestrator.active_jobs().len(), "Scheduled pending jobs"),
                    Err(e) => warn!(error = %e, "Failed to schedule pending jobs"),
                }
            }
        }
    }

    println!("{}", "Shutting down...".dimmed());
    sweeper.shutdown().await;
    for job_id in engine.orchestrator.active_jobs() {
        match engine.orchestrator.stop(job_id).await {
            Ok(_) => println!("  {} Stopped job {}", "■".yellow(), job_id),
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to stop job"),
        }
    }
    let pending = engine.pending_evaluations();
    if pending > 0 {
        println!("  {} Waiting for {pending} evaluation(s) to finish", "…".dimmed());
    }
    Ok(())
}

/// Starts pending jobs while capacity remains.
///
/// # Returns
/// Number of executions started.
async fn start_pending(engine: &Engine) -> Result<usize> {
    let mut pending = engine.store.list_jobs_with_status(RunStatus::Pending).await?;
    pending.reverse();

    let active = engine.orchestrator.active_jobs();
    let mut started = 0;
    for job in pending {
        if !engine.orchestrator.has_capacity() {
            break;
        }
        if active.contains(&job.id) {
            continue;
        }
        match engine.orchestrator.start(job.id).await {
            Ok(true) => {
                info!(job_id = %job.id, name = %job.name, "Started pending job");
                started += 1;
            }
            Ok(false) => warn!(job_id = %job.id, "Pending job failed to schedule"),
            Err(e) => warn!(job_id = %job.id, error = %e, "Could not start pending job"),
        }
    }
    Ok(started)
}
