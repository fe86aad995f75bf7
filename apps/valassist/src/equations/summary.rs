use std::collections::HashSet;

use chrono::Local;
use serde::Serialize;

use crate::equations::models::{EvaluationResult, EvaluationStatus};

/// Aggregate statistics for one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_rows: usize,
    pub successful: usize,
    pub warnings: usize,
    pub errors: usize,
    pub success_rate: String,
    pub matches: usize,
    pub mismatches: usize,
    pub match_rate: String,
    pub unique_targets: usize,
    pub unique_attributes: usize,
    pub processed_at: String,
}

fn percent(part: usize, total: usize) -> String {
    if total == 0 {
        "0%".to_string()
    } else {
        format!("{:.1}%", part as f64 / total as f64 * 100.0)
    }
}

impl RunSummary {
    pub fn from_results(results: &[EvaluationResult]) -> Self {
        let count = |status: EvaluationStatus| results.iter().filter(|r| r.status == status).count();
        let successful = count(EvaluationStatus::Success);
        let matches = results.iter().filter(|r| r.matches_reported).count();

        let unique_targets = results
            .iter()
            .map(|r| r.target_name.as_str())
            .filter(|t| !t.is_empty())
            .collect::<HashSet<_>>()
            .len();
        let unique_attributes = results
            .iter()
            .flat_map(|r| r.attribute_values.iter())
            .filter_map(|v| v.split_once(": ").map(|(name, _)| name))
            .collect::<HashSet<_>>()
            .len();

        Self {
            total_rows: results.len(),
            successful,
            warnings: count(EvaluationStatus::Warning),
            errors: count(EvaluationStatus::Error),
            success_rate: percent(successful, results.len()),
            matches,
            mismatches: results.len() - matches,
            match_rate: percent(matches, results.len()),
            unique_targets,
            unique_attributes,
            processed_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}
