//! Command implementations for the Refinery CLI.

pub mod datasets;
pub mod display;
pub mod evaluations;
pub mod jobs;
pub mod serve;
pub mod settings;
pub mod types;
