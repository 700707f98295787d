//! `refine evaluations` implementation.

use crate::commands::display::{self, field, heading, percent, points, status_cell, status_label};
use crate::commands::types::EvaluationsCommand;
use anyhow::{Result, anyhow};
use colored::Colorize;
use comfy_table::Cell;
use refinery_core::Engine;
use refinery_training::{Evaluation, EvaluationId, EvaluationMetrics, JobId};

pub async fn execute(engine: &Engine, command: EvaluationsCommand) -> Result<()> {
    match command {
        EvaluationsCommand::List { job, json } => list(engine, job.map(JobId), json).await,
        EvaluationsCommand::Show { id, json } => show(engine, EvaluationId(id), json).await,
    }
}

async fn list(engine: &Engine, job: Option<JobId>, json_output: bool) -> Result<()> {
    let mut evaluations = engine.store.list_evaluations().await?;
    if let Some(job) = job {
        evaluations.retain(|e| e.job_id == Some(job));
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&evaluations)?);
        return Ok(());
    }

    heading(&format!("Evaluations ({})", evaluations.len()));
    if evaluations.is_empty() {
        println!("  {}", "No evaluations found.".dimmed());
        println!();
        println!("  {}", "Tip: evaluations are created when a job with datasets completes.".dimmed());
        return Ok(());
    }

    let mut table = display::table(&["ID", "Job", "Model", "Base", "Status", "Before", "After", "Change"]);
    for evaluation in &evaluations {
        table.add_row(vec![
            Cell::new(evaluation.id),
            Cell::new(evaluation.job_id.map_or_else(|| "-".to_string(), |id| id.to_string())),
            Cell::new(&evaluation.model_name),
            Cell::new(&evaluation.base_model),
            status_cell(evaluation.status),
            Cell::new(accuracy(evaluation.before_metrics.as_ref())),
            Cell::new(accuracy(evaluation.after_metrics.as_ref())),
            Cell::new(evaluation.improvement.map_or_else(|| "-".to_string(), points)),
        ]);
    }
    println!("{table}");
    println!();
    Ok(())
}

fn accuracy(metrics: Option<&EvaluationMetrics>) -> String {
    metrics.map_or_else(|| "-".to_string(), |m| percent(m.accuracy))
}

async fn show(engine: &Engine, id: EvaluationId, json_output: bool) -> Result<()> {
    let evaluation =
        engine.store.get_evaluation(id).await?.ok_or_else(|| anyhow!("Evaluation {id} not found"))?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&evaluation)?);
        return Ok(());
    }

    heading(&format!("Evaluation {}", evaluation.id));
    field("Model", &evaluation.model_name);
    field("Base model", &evaluation.base_model);
    field("Kind", evaluation.kind);
    field("Status", status_label(evaluation.status));
    if let Some(job_id) = evaluation.job_id {
        field("Job", job_id);
    }
    if let Some(dataset_id) = evaluation.dataset_id {
        field("Dataset", dataset_id);
    }
    field("Started", display::timestamp(evaluation.started_at));
    field("Completed", display::timestamp(evaluation.completed_at));

    if let (Some(before), Some(after)) = (&evaluation.before_metrics, &evaluation.after_metrics) {
        println!();
        println!("  {:<16} {:>10} {:>10}", "", "Before".bold(), "After".bold());
        println!("  {}", "─".repeat(38));
        metric_row("Accuracy", percent(before.accuracy), percent(after.accuracy));
        metric_row("Precision", percent(before.precision), percent(after.precision));
        metric_row("Recall", percent(before.recall), percent(after.recall));
        metric_row("F1", percent(before.f1), percent(after.f1));
        metric_row(
            "Latency",
            format!("{:.0}ms", before.inference_time * 1000.0),
            format!("{:.0}ms", after.inference_time * 1000.0),
        );
        metric_row("Samples", before.samples.to_string(), after.samples.to_string());
    }
    if let Some(improvement) = evaluation.improvement {
        println!();
        field("Change", colored_points(improvement));
    }
    if let Some(notes) = &evaluation.notes {
        field("Notes", notes);
    }
    if let Some(error) = &evaluation.error_message {
        field("Error", error.red());
    }
    println!();
    Ok(())
}

fn metric_row(label: &str, before: String, after: String) {
    println!("  {:<16} {:>10} {:>10}", label, before, after);
}

fn colored_points(delta: f64) -> colored::ColoredString {
    let text = points(delta);
    if delta > 0.0 {
        text.green()
    } else if delta < 0.0 {
        text.red()
    } else {
        text.normal()
    }
}

/// One-paragraph outcome printed after a followed job completes.
pub fn print_summary(evaluation: &Evaluation) {
    match (&evaluation.before_metrics, &evaluation.after_metrics, evaluation.improvement) {
        (Some(before), Some(after), Some(improvement)) => {
            println!(
                "{} Evaluation {}: {} -> {} ({})",
                "✓".green(),
                evaluation.id,
                percent(before.accuracy),
                percent(after.accuracy).bold(),
                colored_points(improvement)
            );
        }
        _ => {
            println!(
                "{} Evaluation {} {}: {}",
                "!".yellow(),
                evaluation.id,
                status_label(evaluation.status),
                evaluation.error_message.as_deref().unwrap_or("no metrics recorded")
            );
        }
    }
    println!("  {}", format!("Details: `refine evaluations show {}`", evaluation.id).dimmed());
    println!();
}
