//! `refine datasets` implementation.

use crate::commands::display::{self, field, heading};
use crate::commands::types::DatasetsCommand;
use anyhow::{Context, Result, anyhow, bail};
use colored::Colorize;
use comfy_table::Cell;
use refinery_core::Engine;
use refinery_training::{DatasetId, NewDataset};
use serde_json::Value;
use std::path::Path;

pub async fn execute(engine: &Engine, command: DatasetsCommand) -> Result<()> {
    match command {
        DatasetsCommand::Import { file, name, description, json } => {
            import(engine, &file, name, description, json).await
        }
        DatasetsCommand::List { json } => list(engine, json).await,
        DatasetsCommand::Show { id, preview, json } => show(engine, DatasetId(id), preview, json).await,
        DatasetsCommand::Delete { id } => delete(engine, DatasetId(id)).await,
    }
}

/// Reads samples from a JSON document or a JSON Lines file.
///
/// A JSON document is either an array of samples or an object with a
/// `samples` array. Files ending in `.jsonl` hold one sample per line.
fn read_samples(path: &Path) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let is_jsonl = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"));
    if !is_jsonl {
        let document: Value =
            serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))?;
        return match document {
            Value::Array(samples) => Ok(samples),
            Value::Object(mut object) => match object.remove("samples") {
                Some(Value::Array(samples)) => Ok(samples),
                _ => bail!("Expected a JSON array of samples or an object with a \"samples\" array"),
            },
            _ => bail!("Expected a JSON array of samples or an object with a \"samples\" array"),
        };
    }

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid JSON on line {}", index + 1))
        })
        .collect()
}

async fn import(
    engine: &Engine,
    file: &Path,
    name: Option<String>,
    description: Option<String>,
    json_output: bool,
) -> Result<()> {
    let samples = read_samples(file)?;
    let name = name
        .or_else(|| file.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .ok_or_else(|| anyhow!("Dataset name is required"))?;

    let new_dataset = NewDataset { name, description, samples };
    new_dataset.validate()?;
    let dataset = engine.store.create_dataset(new_dataset).await.context("Failed to import dataset")?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&dataset)?);
        return Ok(());
    }

    let usable = dataset.training_samples().len();
    println!(
        "{} Imported dataset {} ({}) with {} samples",
        "✓".green(),
        dataset.id.to_string().bold(),
        dataset.name.cyan(),
        dataset.sample_count
    );
    if usable < dataset.raw_samples().len() {
        println!(
            "  {}",
            format!("{usable} samples have a recognizable instruction/output shape").yellow()
        );
    }
    Ok(())
}

async fn list(engine: &Engine, json_output: bool) -> Result<()> {
    let datasets = engine.store.list_datasets().await?;

    if json_output {
        // Summaries only; `datasets show --json` includes the samples.
        let summaries: Vec<Value> = datasets
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.id,
                    "name": d.name,
                    "description": d.description,
                    "sample_count": d.sample_count,
                    "created_at": d.created_at,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    heading(&format!("Datasets ({})", datasets.len()));
    if datasets.is_empty() {
        println!("  {}", "No datasets found.".dimmed());
        return Ok(());
    }

    let mut table = display::table(&["ID", "Name", "Samples", "Description", "Created"]);
    for dataset in &datasets {
        table.add_row(vec![
            Cell::new(dataset.id),
            Cell::new(&dataset.name),
            Cell::new(dataset.sample_count),
            Cell::new(dataset.description.as_deref().unwrap_or("-")),
            Cell::new(display::timestamp(Some(dataset.created_at))),
        ]);
    }
    println!("{table}");
    println!();
    Ok(())
}

async fn show(engine: &Engine, id: DatasetId, preview: usize, json_output: bool) -> Result<()> {
    let dataset = engine.store.get_dataset(id).await?.ok_or_else(|| anyhow!("Dataset {id} not found"))?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&dataset)?);
        return Ok(());
    }

    heading(&format!("Dataset {}: {}", dataset.id, dataset.name));
    field("Samples", dataset.sample_count);
    field("Usable", dataset.training_samples().len());
    field("Description", dataset.description.as_deref().unwrap_or("-"));
    field("Created", display::timestamp(Some(dataset.created_at)));

    let samples = dataset.training_samples();
    if !samples.is_empty() && preview > 0 {
        println!();
        for sample in samples.iter().take(preview) {
            println!("  {} {}", "Q:".bold(), sample.instruction);
            if !sample.input.is_empty() {
                println!("     {}", sample.input.dimmed());
            }
            println!("  {} {}", "A:".bold(), sample.output);
            println!();
        }
    }
    Ok(())
}

async fn delete(engine: &Engine, id: DatasetId) -> Result<()> {
    if !engine.store.delete_dataset(id).await? {
        bail!("Dataset {id} not found");
    }
    println!("{} Deleted dataset {}", "✓".green(), id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_json_array_and_wrapped_object() {
        let temp = TempDir::new().unwrap();
        let array = temp.path().join("faq.json");
        std::fs::write(&array, r#"[{"instruction": "a", "output": "b"}, {"question": "c", "answer": "d"}]"#).unwrap();
        let wrapped = temp.path().join("wrapped.json");
        std::fs::write(&wrapped, r#"{"samples": [{"instruction": "a", "output": "b"}]}"#).unwrap();

        assert_eq!(read_samples(&array).unwrap().len(), 2);
        assert_eq!(read_samples(&wrapped).unwrap().len(), 1);
    }

    #[test]
    fn test_reads_jsonl_skipping_blank_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("faq.jsonl");
        std::fs::write(&path, "{\"instruction\": \"a\", \"output\": \"b\"}\n\n{\"instruction\": \"c\", \"output\": \"d\"}\n").unwrap();

        assert_eq!(read_samples(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_reports_bad_jsonl_line() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("faq.jsonl");
        std::fs::write(&path, "{\"instruction\": \"a\"}\nnot json\n").unwrap();

        let err = read_samples(&path).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_rejects_scalar_document() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("faq.json");
        std::fs::write(&path, "42").unwrap();

        assert!(read_samples(&path).is_err());
    }
}
