//! Configuration module for Refinery Core.

pub mod refinery_config;

pub use refinery_config::{
    ConfigError, ConfigResult, KnowledgeSection, OllamaSection, OrchestratorSection,
    RefineryConfig, StuckSection, TrainerSection,
};
