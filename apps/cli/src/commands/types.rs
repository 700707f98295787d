//! Shared subcommand definitions.

use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Job subcommands.
#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// Create a new customization job
    ///
    /// The target model name is derived from the job name and version,
    /// e.g. "Support Bot" with version 1.0 becomes support-bot:1.0.
    Create(CreateJobArgs),

    /// List jobs, newest first
    List {
        /// Only show jobs with this status (pending, running, completed, failed, stopped)
        #[arg(short, long)]
        status: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a job record
    Show {
        /// Job ID
        id: i64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start a pending job and follow it until it finishes
    Run {
        /// Job ID
        id: i64,

        /// Return once the job finishes instead of waiting for its evaluation
        #[arg(long)]
        no_evaluation: bool,

        /// Output the final job record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stop a running job
    Stop {
        /// Job ID
        id: i64,
    },

    /// Show the live status of a job
    Status {
        /// Job ID
        id: i64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a job and everything it produced
    Delete {
        /// Job ID
        id: i64,

        /// Output the cleanup report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fail running jobs that stopped making progress
    Sweep {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Arguments for `refine jobs create`.
#[derive(Args, Debug)]
pub struct CreateJobArgs {
    /// Display name of the customized model
    pub name: String,

    /// Job type (adapter_tuning, knowledge_augmentation)
    #[arg(short = 't', long = "type")]
    pub job_type: String,

    /// Base model to customize (e.g. llama3:8b)
    #[arg(short, long)]
    pub base_model: String,

    /// Version tag for the target name (defaults to latest)
    #[arg(long)]
    pub version: Option<String>,

    /// Dataset to train on; repeat for several
    #[arg(short, long = "dataset")]
    pub datasets: Vec<i64>,

    /// System prompt baked into the customized model
    #[arg(long)]
    pub role: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Nucleus sampling threshold
    #[arg(long)]
    pub top_p: Option<f64>,

    /// Context window size in tokens
    #[arg(long)]
    pub context_length: Option<u32>,

    /// Training epochs
    #[arg(long)]
    pub epochs: Option<u32>,

    /// Optimizer learning rate
    #[arg(long)]
    pub learning_rate: Option<f64>,

    /// Training batch size
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Adapter rank
    #[arg(long)]
    pub lora_rank: Option<u32>,

    /// Start the job right away and follow it
    #[arg(long)]
    pub run: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Dataset subcommands.
#[derive(Subcommand, Debug)]
pub enum DatasetsCommand {
    /// Import samples from a JSON array or a JSONL file
    Import {
        /// File to import (.json or .jsonl)
        file: PathBuf,

        /// Dataset name (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,

        /// Free-form description
        #[arg(short, long)]
        description: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List datasets
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a dataset and a preview of its samples
    Show {
        /// Dataset ID
        id: i64,

        /// Number of samples to preview
        #[arg(long, default_value_t = 3)]
        preview: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a dataset
    Delete {
        /// Dataset ID
        id: i64,
    },
}

/// Evaluation subcommands.
#[derive(Subcommand, Debug)]
pub enum EvaluationsCommand {
    /// List evaluations, newest first
    List {
        /// Only show evaluations chained from this job
        #[arg(short, long)]
        job: Option<i64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show an evaluation with its before/after metrics
    Show {
        /// Evaluation ID
        id: i64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
