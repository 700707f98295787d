//! Adapter trainer that shells out to an external training program.
//!
//! The program receives the job's paths and hyperparameters as flags and
//! reports on stdout with `key=value` lines:
//!
//! ```text
//! progress=0.25
//! step=120
//! loss=1.734
//! ```
//!
//! Any other stdout line is forwarded as a progress message.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use refinery_training::{
    AdapterOutput, AdapterTrainer, AdapterTrainingRequest, ProgressEvent, ProgressSink,
    TrainingError, TrainingMetrics, TrainingResult,
};
use regex::Regex;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

use crate::config::TrainerSection;

static REPORT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(progress|step|loss)\s*[=:]\s*([-+0-9.eE]+)\s*$").expect("valid report regex")
});

/// Lines of stderr kept for the failure message.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, PartialEq)]
enum ReportLine {
    Progress(f64),
    Step(u64),
    Loss(f64),
    Message(String),
}

fn parse_report_line(line: &str) -> Option<ReportLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let Some(caps) = REPORT_LINE.captures(trimmed) else {
        return Some(ReportLine::Message(trimmed.to_string()));
    };
    let value = &caps[2];
    let parsed = match &caps[1] {
        "progress" => value.parse::<f64>().ok().map(|v| ReportLine::Progress(v.clamp(0.0, 1.0))),
        "step" => value.parse::<u64>().ok().map(ReportLine::Step),
        _ => value.parse::<f64>().ok().map(ReportLine::Loss),
    };
    Some(parsed.unwrap_or_else(|| ReportLine::Message(trimmed.to_string())))
}

/// Runs a configured program once per adapter-tuning job.
#[derive(Debug, Clone)]
pub struct CommandTrainer {
    program: String,
    args: Vec<String>,
}

impl CommandTrainer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    /// Builds a trainer from the `[trainer]` section, or `None` when no command is configured.
    pub fn from_config(config: &TrainerSection) -> Option<Self> {
        config.command.as_ref().map(|command| Self::new(command.clone(), config.args.clone()))
    }

    fn command_args(&self, request: &AdapterTrainingRequest) -> Vec<String> {
        let hp = &request.hyperparameters;
        let mut args = self.args.clone();
        args.extend([
            "--base-model".to_string(),
            request.base_model.clone(),
            "--train".to_string(),
            request.train_path.display().to_string(),
            "--val".to_string(),
            request.val_path.display().to_string(),
            "--output".to_string(),
            request.output_dir.display().to_string(),
            "--epochs".to_string(),
            hp.epochs.to_string(),
            "--learning-rate".to_string(),
            hp.learning_rate.to_string(),
            "--batch-size".to_string(),
            hp.batch_size.to_string(),
            "--lora-rank".to_string(),
            hp.lora_rank.to_string(),
        ]);
        args
    }
}

#[async_trait]
impl AdapterTrainer for CommandTrainer {
    fn id(&self) -> &'static str {
        "command"
    }

    async fn train(
        &self,
        request: &AdapterTrainingRequest,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<AdapterOutput> {
        let job_id = request.job_id;
        tokio::fs::create_dir_all(&request.output_dir).await?;

        let args = self.command_args(request);
        info!(job_id = %job_id, program = %self.program, "Launching adapter trainer");
        let mut child = TokioCommand::new(&self.program)
            .args(&args)
            .env("REFINERY_JOB_ID", job_id.to_string())
            .env("REFINERY_TARGET_NAME", &request.target_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TrainingError::Trainer(format!("Failed to launch '{}': {}", self.program, e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TrainingError::Trainer("Trainer stdout unavailable".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| TrainingError::Trainer("Trainer stderr unavailable".to_string()))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        progress.on_event(ProgressEvent::Started { job_id });
        let mut metrics = TrainingMetrics::default();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            match parse_report_line(&line) {
                Some(ReportLine::Progress(value)) => {
                    progress.on_event(ProgressEvent::Fraction { job_id, value });
                }
                Some(ReportLine::Step(step)) => metrics.steps = Some(step),
                Some(ReportLine::Loss(loss)) => metrics.final_loss = Some(loss),
                Some(ReportLine::Message(message)) => {
                    debug!(job_id = %job_id, "{message}");
                    progress.on_event(ProgressEvent::Message { job_id, message });
                }
                None => {}
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            let tail: Vec<&str> = stderr.lines().rev().take(STDERR_TAIL_LINES).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            warn!(job_id = %job_id, %status, "Adapter trainer failed");
            return Err(TrainingError::Trainer(format!(
                "Trainer exited with {}: {}",
                status,
                tail.join("\n").trim()
            )));
        }
        if !request.output_dir.exists() {
            return Err(TrainingError::Trainer(format!(
                "Trainer produced no adapter at {}",
                request.output_dir.display()
            )));
        }

        progress.on_event(ProgressEvent::Finished { job_id });
        info!(job_id = %job_id, steps = ?metrics.steps, loss = ?metrics.final_loss, "Adapter trainer finished");
        Ok(AdapterOutput { adapter_dir: request.output_dir.clone(), metrics })
    }
}
