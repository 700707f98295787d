//! Refinery Core - reference adapters for the job orchestration engine.
//!
//! This crate provides the concrete collaborators used by the `refine` binary:
//! - SQLite persistence for jobs, datasets and evaluations
//! - An Ollama model backend
//! - A directory-backed knowledge store
//! - A subprocess adapter trainer
//! - The before/after evaluation executor
//! - TOML configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use refinery_core::{Engine, RefineryConfig};
//!
//! fn main() -> refinery_core::Result<()> {
//!     let config = RefineryConfig::discover_and_load()?;
//!     let engine = Engine::bootstrap(config)?;
//!     println!("{} active jobs", engine.orchestrator.active_jobs().len());
//!     Ok(())
//! }
//! ```

pub mod backends;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod knowledge;
pub mod storage;
pub mod training;

pub use backends::OllamaBackend;
pub use config::{ConfigError, RefineryConfig};
pub use engine::Engine;
pub use error::{CoreError, Result};
pub use evaluation::BackendEvaluator;
pub use knowledge::FileKnowledgeStore;
pub use storage::{Database, SqliteJobStore, StorageError};
pub use training::{CommandTrainer, UnconfiguredTrainer};
