//! Prompt construction and response scoring for accuracy evaluations.

use refinery_training::{EvaluationMetrics, SampleRecord};

/// Share of expected terms a response must contain to count as correct.
pub const MATCH_RATIO: f64 = 0.5;

/// Builds the instruction prompt sent to the model for one sample.
pub fn build_prompt(sample: &SampleRecord) -> String {
    if sample.input.trim().is_empty() {
        format!("### Instruction:\n{}\n\n### Response:", sample.instruction)
    } else {
        format!(
            "### Instruction:\n{}\n\n### Input:\n{}\n\n### Response:",
            sample.instruction, sample.input
        )
    }
}

/// Keyword match: at least half of the expected output's terms longer than
/// two characters must appear in the response (case-insensitive).
pub fn is_correct(expected: &str, response: &str) -> bool {
    let expected = expected.to_lowercase();
    let actual = response.to_lowercase();
    let terms: Vec<&str> =
        expected.split_whitespace().filter(|term| term.chars().count() > 2).collect();
    if terms.is_empty() {
        return false;
    }
    let matches = terms.iter().filter(|term| actual.contains(**term)).count();
    matches as f64 / terms.len() as f64 >= MATCH_RATIO
}

/// Running tally for one model over a sample set.
#[derive(Debug, Clone, Default)]
pub struct Tally {
    pub samples: usize,
    pub correct: usize,
    pub failed_queries: usize,
    pub total_seconds: f64,
}

impl Tally {
    pub fn record(&mut self, correct: bool, seconds: f64) {
        self.samples += 1;
        self.total_seconds += seconds;
        if correct {
            self.correct += 1;
        }
    }

    pub fn record_failure(&mut self) {
        self.samples += 1;
        self.failed_queries += 1;
    }

    pub fn all_failed(&self) -> bool {
        self.samples > 0 && self.failed_queries == self.samples
    }

    /// Keyword matching yields a single hit rate, reported for every score.
    pub fn metrics(&self) -> EvaluationMetrics {
        let accuracy =
            if self.samples == 0 { 0.0 } else { self.correct as f64 / self.samples as f64 };
        let answered = self.samples - self.failed_queries;
        let inference_time =
            if answered == 0 { 0.0 } else { self.total_seconds / answered as f64 };
        EvaluationMetrics {
            accuracy,
            precision: accuracy,
            recall: accuracy,
            f1: accuracy,
            inference_time,
            samples: self.samples,
        }
    }
}
