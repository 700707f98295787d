//! Evaluation executor.

pub mod evaluator;
pub mod scoring;

pub use evaluator::{BackendEvaluator, DEFAULT_SAMPLE_LIMIT};
pub use scoring::{build_prompt, is_correct};
