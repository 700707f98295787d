//! `refine jobs` implementation.

use crate::commands::display::{self, field, heading, percent, status_cell, status_label};
use crate::commands::types::{CreateJobArgs, JobsCommand};
use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use colored::Colorize;
use comfy_table::Cell;
use indicatif::{ProgressBar, ProgressStyle};
use refinery_core::Engine;
use refinery_training::{
    DatasetId, Evaluation, Job, JobId, JobType, JobUpdate, NewJob, RunStatus,
};
use serde_json::{Map, Value, json};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What a Ctrl-C press means while following a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    /// First press: ask the orchestrator to stop the job.
    RequestStop,
    /// Later presses: stop following; the job stops at its next stage boundary.
    Detach,
}

#[derive(Debug, Default)]
struct InterruptState {
    presses: u32,
}

impl InterruptState {
    fn press(&mut self) -> Interrupt {
        self.presses += 1;
        if self.presses == 1 { Interrupt::RequestStop } else { Interrupt::Detach }
    }
}

pub async fn execute(engine: &Engine, command: JobsCommand) -> Result<()> {
    match command {
        JobsCommand::Create(args) => create(engine, args).await,
        JobsCommand::List { status, json } => list(engine, status.as_deref(), json).await,
        JobsCommand::Show { id, json } => show(engine, JobId(id), json).await,
        JobsCommand::Run { id, no_evaluation, json } => follow(engine, JobId(id), !no_evaluation, json).await,
        JobsCommand::Stop { id } => stop(engine, JobId(id)).await,
        JobsCommand::Status { id, json } => status(engine, JobId(id), json).await,
        JobsCommand::Delete { id, json } => delete(engine, JobId(id), json).await,
        JobsCommand::Sweep { json } => sweep(engine, json).await,
    }
}

/// Builds the configuration blob from the flags that were given.
fn job_config(args: &CreateJobArgs) -> Value {
    let mut config = Map::new();
    config.insert("selectedDatasets".to_string(), json!(args.datasets));
    if let Some(role) = &args.role {
        config.insert("roleDefinition".to_string(), json!(role));
    }
    if let Some(temperature) = args.temperature {
        config.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = args.top_p {
        config.insert("topP".to_string(), json!(top_p));
    }
    if let Some(context_length) = args.context_length {
        config.insert("contextLength".to_string(), json!(context_length));
    }
    if let Some(epochs) = args.epochs {
        config.insert("epochs".to_string(), json!(epochs));
    }
    if let Some(learning_rate) = args.learning_rate {
        config.insert("learning_rate".to_string(), json!(learning_rate));
    }
    if let Some(batch_size) = args.batch_size {
        config.insert("batch_size".to_string(), json!(batch_size));
    }
    if let Some(lora_rank) = args.lora_rank {
        config.insert("lora_rank".to_string(), json!(lora_rank));
    }
    Value::Object(config)
}

async fn create(engine: &Engine, args: CreateJobArgs) -> Result<()> {
    let job_type: JobType = args.job_type.parse()?;
    let mut new_job = NewJob::new(args.name.clone(), job_type, args.base_model.clone())
        .with_config(job_config(&args));
    if let Some(version) = &args.version {
        new_job = new_job.with_version(version.clone());
    }
    new_job.validate()?;

    for id in &args.datasets {
        engine
            .store
            .get_dataset(DatasetId(*id))
            .await?
            .ok_or_else(|| anyhow!("Dataset {id} not found"))?;
    }

    let job = engine.store.create_job(new_job).await.context("Failed to create job")?;

    if args.run {
        return follow(engine, job.id, true, args.json).await;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }

    println!("{} Created job {} ({})", "✓".green(), job.id.to_string().bold(), job.target_name.cyan());
    println!("  {}", format!("Start it with `refine jobs run {}`", job.id).dimmed());
    Ok(())
}

async fn list(engine: &Engine, status: Option<&str>, json_output: bool) -> Result<()> {
    let jobs = match status {
        Some(status) => {
            let status: RunStatus = status.parse()?;
            engine.store.list_jobs_with_status(status).await?
        }
        None => engine.store.list_jobs().await?,
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    heading(&format!("Jobs ({})", jobs.len()));
    if jobs.is_empty() {
        println!("  {}", "No jobs found.".dimmed());
        println!();
        println!("  {}", "Tip: import a dataset with `refine datasets import`, then `refine jobs create`.".dimmed());
        return Ok(());
    }

    let mut table = display::table(&["ID", "Name", "Type", "Status", "Progress", "Target", "Created"]);
    for job in &jobs {
        table.add_row(vec![
            Cell::new(job.id),
            Cell::new(&job.name),
            Cell::new(job.job_type),
            status_cell(job.status),
            Cell::new(percent(job.progress)),
            Cell::new(job.resolved_artifact.as_deref().unwrap_or(&job.target_name)),
            Cell::new(display::timestamp(Some(job.created_at))),
        ]);
    }
    println!("{table}");
    println!();
    Ok(())
}

async fn load(engine: &Engine, id: JobId) -> Result<Job> {
    engine.store.get_job(id).await?.ok_or_else(|| anyhow!("Job {id} not found"))
}

async fn show(engine: &Engine, id: JobId, json_output: bool) -> Result<()> {
    let job = load(engine, id).await?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }
    print_job(&job);
    Ok(())
}

fn print_job(job: &Job) {
    heading(&format!("Job {}: {}", job.id, job.name));
    field("Type", job.job_type);
    field("Status", status_label(job.status));
    field("Progress", percent(job.progress));
    field("Base model", &job.base_model);
    field("Target", &job.target_name);
    if let Some(artifact) = &job.resolved_artifact {
        field("Artifact", artifact.green());
    }
    if let Ok(config) = job.job_config() {
        let datasets: Vec<String> = config.selected_datasets.iter().map(ToString::to_string).collect();
        field("Datasets", if datasets.is_empty() { "-".to_string() } else { datasets.join(", ") });
    }
    field("Created", display::timestamp(Some(job.created_at)));
    field("Started", display::timestamp(job.started_at));
    field("Completed", display::timestamp(job.completed_at));
    if let Some(error) = &job.error_message {
        field("Error", error.red());
    }
    println!();
}

/// Starts a job, renders its progress until it settles, then prints the
/// final record and any chained evaluation.
async fn follow(engine: &Engine, id: JobId, wait_for_evaluation: bool, json_output: bool) -> Result<()> {
    let started = engine.orchestrator.start(id).await?;

    if started {
        let bar = if json_output { ProgressBar::hidden() } else { ProgressBar::new(100) };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
                .progress_chars("█▓░"),
        );
        bar.set_message(format!("job {id}"));
        bar.enable_steady_tick(Duration::from_millis(100));

        let finished = engine.orchestrator.wait(id);
        tokio::pin!(finished);
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        let mut interrupts = InterruptState::default();
        loop {
            tokio::select! {
                _ = &mut finished => break,
                _ = ticker.tick() => {
                    if let Some(job) = engine.store.get_job(id).await? {
                        bar.set_position((job.progress * 100.0).round() as u64);
                    }
                }
                _ = tokio::signal::ctrl_c() => match interrupts.press() {
                    Interrupt::RequestStop => {
                        bar.set_message("stopping... (Ctrl-C again to detach)");
                        engine.orchestrator.stop(id).await?;
                    }
                    Interrupt::Detach => {
                        bar.finish_and_clear();
                        bail!("Interrupted; job {id} stop requested");
                    }
                },
            }
        }
        bar.finish_and_clear();
    }

    let job = load(engine, id).await?;
    let evaluation = if wait_for_evaluation && job.status == RunStatus::Completed {
        wait_for_chained_evaluation(engine, id, json_output).await?
    } else {
        None
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&json!({ "job": job, "evaluation": evaluation }))?);
    } else {
        print_job(&job);
        if let Some(evaluation) = &evaluation {
            crate::commands::evaluations::print_summary(evaluation);
        }
    }

    match job.status {
        RunStatus::Failed => bail!(
            "Job {id} failed: {}",
            job.error_message.as_deref().unwrap_or("unknown error")
        ),
        RunStatus::Stopped => bail!("Job {id} was stopped"),
        _ => Ok(()),
    }
}

async fn chained_evaluation(engine: &Engine, id: JobId) -> Result<Option<Evaluation>> {
    let evaluations = engine.store.list_evaluations().await?;
    Ok(evaluations.into_iter().find(|e| e.job_id == Some(id)))
}

async fn wait_for_chained_evaluation(engine: &Engine, id: JobId, quiet: bool) -> Result<Option<Evaluation>> {
    let Some(mut evaluation) = chained_evaluation(engine, id).await? else {
        return Ok(None);
    };

    let spinner = if quiet { ProgressBar::hidden() } else { ProgressBar::new_spinner() };
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.set_message(format!("Evaluating {} against {}...", evaluation.model_name, evaluation.base_model));
    spinner.enable_steady_tick(Duration::from_millis(100));

    while !evaluation.status.is_terminal() {
        tokio::select! {
            () = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => {
                spinner.finish_and_clear();
                println!(
                    "  {}",
                    "Evaluation still running; it finishes before exit (Ctrl-C again to abandon it).".dimmed()
                );
                return Ok(None);
            }
        }
        match engine.store.get_evaluation(evaluation.id).await? {
            Some(latest) => evaluation = latest,
            None => break,
        }
    }
    spinner.finish_and_clear();
    Ok(Some(evaluation))
}

async fn stop(engine: &Engine, id: JobId) -> Result<()> {
    if engine.orchestrator.stop(id).await? {
        println!("{} Stopped job {}", "✓".green(), id);
        return Ok(());
    }

    // Executions owned by another process see the persisted status at their
    // next stage boundary.
    let job = load(engine, id).await?;
    if job.status != RunStatus::Running {
        println!("  {}", format!("Job {id} is not running ({})", job.status).dimmed());
        return Ok(());
    }
    let update = JobUpdate::new()
        .status(RunStatus::Stopped)
        .completed_at(Utc::now())
        .when_status(RunStatus::Running);
    if engine.store.update_job(id, &update).await? {
        println!("{} Stop requested for job {}", "✓".green(), id);
    } else {
        println!("  {}", format!("Job {id} finished before it could be stopped").dimmed());
    }
    Ok(())
}

async fn status(engine: &Engine, id: JobId, json_output: bool) -> Result<()> {
    let view = engine.orchestrator.status(id).await?.ok_or_else(|| anyhow!("Job {id} not found"))?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    heading(&format!("Job {id}"));
    field("Status", status_label(view.status));
    field("Progress", view.progress.map_or_else(|| "-".to_string(), percent));
    field("Started", display::timestamp(view.started_at));
    field("Completed", display::timestamp(view.completed_at));
    println!();
    Ok(())
}

async fn delete(engine: &Engine, id: JobId, json_output: bool) -> Result<()> {
    let report = engine.orchestrator.delete(id).await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for outcome in &report.outcomes {
            println!("  {} {}", "•".dimmed(), outcome);
        }
        if report.success() {
            println!("{} Deleted job {} ({})", "✓".green(), id, report.job_name);
        }
    }

    if !report.success() {
        bail!("Job {id} record was not deleted");
    }
    Ok(())
}

async fn sweep(engine: &Engine, json_output: bool) -> Result<()> {
    let failed = engine.orchestrator.sweep_stuck_jobs().await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&failed)?);
        return Ok(());
    }

    if failed.is_empty() {
        println!("  {}", "No stuck jobs found.".dimmed());
    } else {
        for id in &failed {
            println!("{} Marked job {} as failed", "!".yellow(), id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use refinery_training::JobConfig;

    fn args() -> CreateJobArgs {
        CreateJobArgs {
            name: "Support Bot".to_string(),
            job_type: "adapter".to_string(),
            base_model: "llama3:8b".to_string(),
            version: None,
            datasets: vec![3, 5],
            role: Some("You answer support questions.".to_string()),
            temperature: Some(0.2),
            top_p: None,
            context_length: None,
            epochs: Some(2),
            learning_rate: None,
            batch_size: None,
            lora_rank: Some(8),
            run: false,
            json: false,
        }
    }

    #[test]
    fn test_second_interrupt_detaches() {
        let mut interrupts = InterruptState::default();
        assert_eq!(interrupts.press(), Interrupt::RequestStop);
        assert_eq!(interrupts.press(), Interrupt::Detach);
        assert_eq!(interrupts.press(), Interrupt::Detach);
    }

    #[test]
    fn test_job_config_parses_back() {
        let config = JobConfig::from_value(&job_config(&args())).unwrap();

        assert_eq!(config.selected_datasets, vec![DatasetId(3), DatasetId(5)]);
        assert_eq!(config.role_definition.as_deref(), Some("You answer support questions."));
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.top_p, None);
        assert_eq!(config.hyperparameters.epochs, 2);
        assert_eq!(config.hyperparameters.lora_rank, 8);
        assert_eq!(config.hyperparameters.batch_size, 4);
    }

    #[test]
    fn test_job_config_omits_unset_flags() {
        let mut args = args();
        args.role = None;
        args.temperature = None;
        let config = job_config(&args);

        assert!(config.get("roleDefinition").is_none());
        assert!(config.get("temperature").is_none());
    }
}
