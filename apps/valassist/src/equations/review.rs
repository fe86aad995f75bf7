//! Optional model review of rows the evaluator flagged as Warning or Error.
//!
//! Reviews sit next to the evaluator's results and never change them.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::equations::compare::compare_values;
use crate::equations::models::{EquationRow, EvaluationResult, EvaluationStatus};
use crate::equations::prompts;
use crate::llm_client::{ChatMessage, LlmClient, LlmError};

/// Asks a model to evaluate one equation and returns its raw reply.
#[async_trait]
pub trait EquationReviewer: Send + Sync {
    async fn review(
        &self,
        row: &EquationRow,
        result: &EvaluationResult,
    ) -> Result<String, LlmError>;
}

pub struct LlmReviewer {
    client: LlmClient,
}

impl LlmReviewer {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EquationReviewer for LlmReviewer {
    async fn review(
        &self,
        row: &EquationRow,
        result: &EvaluationResult,
    ) -> Result<String, LlmError> {
        let messages = [
            ChatMessage::system(prompts::REVIEW_SYSTEM),
            ChatMessage::user(prompts::review_prompt(row, result)),
        ];
        let completion = self.client.chat(&messages).await?;
        info!(
            target_name = %row.target_name,
            model = self.client.model(),
            tokens = completion.usage.total_tokens,
            "Reviewed equation"
        );
        Ok(completion.text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReviewOutcome {
    /// `value` is the reply's result as `0x` hex.
    Reviewed {
        value: String,
        matches_reported: bool,
    },
    /// The reply held no recognizable value.
    Unparsed { reply: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RowReview {
    /// Position of the row in the evaluated input.
    pub row: usize,
    pub target_name: String,
    pub outcome: ReviewOutcome,
}

fn decimal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d+\b").expect("static pattern compiles"))
}

/// Pulls a value out of a model reply. The first line that is `0x` hex or
/// bare hex digits wins; otherwise the first decimal integer anywhere.
pub fn parse_reply(reply: &str) -> Option<String> {
    let hex_line = reply.lines().map(str::trim).find_map(|line| {
        match line.strip_prefix("0x").or_else(|| line.strip_prefix("0X")) {
            Some(rest) => rest.split(|c: char| !c.is_ascii_hexdigit()).next(),
            None if !line.is_empty() && line.chars().all(|c| c.is_ascii_hexdigit()) => Some(line),
            None => None,
        }
    });
    if let Some(value) = hex_line.and_then(|digits| u128::from_str_radix(digits, 16).ok()) {
        return Some(format!("0x{value:X}"));
    }

    decimal_re()
        .find(reply)
        .and_then(|m| m.as_str().parse::<u128>().ok())
        .map(|value| format!("0x{value:X}"))
}

/// Reviews every row whose status is not Success, in order. A failed review
/// is recorded and the run moves on.
pub async fn review_results(
    reviewer: &dyn EquationReviewer,
    rows: &[EquationRow],
    results: &[EvaluationResult],
) -> Vec<RowReview> {
    let mut reviews = Vec::new();

    for (index, (row, result)) in rows.iter().zip(results).enumerate() {
        if result.status == EvaluationStatus::Success {
            continue;
        }
        let outcome = match reviewer.review(row, result).await {
            Ok(reply) => match parse_reply(&reply) {
                Some(value) => ReviewOutcome::Reviewed {
                    matches_reported: compare_values(&value, &row.reported_value),
                    value,
                },
                None => ReviewOutcome::Unparsed { reply },
            },
            Err(e) => {
                warn!(target_name = %row.target_name, error = %e, "Equation review failed");
                ReviewOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        reviews.push(RowReview {
            row: index,
            target_name: row.target_name.clone(),
            outcome,
        });
    }

    info!(reviewed = reviews.len(), "Equation review complete");
    reviews
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::equations::evaluator::evaluate_rows;
    use crate::equations::models::{AttributeTable, EquationSource};

    /// Replies from a script keyed by target name; unknown targets fail.
    struct ScriptedReviewer {
        replies: Vec<(&'static str, &'static str)>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EquationReviewer for ScriptedReviewer {
        async fn review(
            &self,
            row: &EquationRow,
            _result: &EvaluationResult,
        ) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(row.target_name.clone());
            self.replies
                .iter()
                .find(|(target, _)| *target == row.target_name)
                .map(|(_, reply)| reply.to_string())
                .ok_or(LlmError::EmptyContent)
        }
    }

    fn direct(target: &str, eq: &str, reported: &str) -> EquationRow {
        EquationRow::new(EquationSource::DirectAssignment, target, eq, reported)
    }

    #[test]
    fn test_parse_reply_variants() {
        assert_eq!(parse_reply("0x1f").as_deref(), Some("0x1F"));
        assert_eq!(parse_reply("  \n0X3 (from 2'h3)").as_deref(), Some("0x3"));
        assert_eq!(parse_reply("ff").as_deref(), Some("0xFF"));
        assert_eq!(parse_reply("The result is 12.").as_deref(), Some("0xC"));
        assert_eq!(parse_reply("I cannot tell."), None);
        assert_eq!(parse_reply(""), None);
    }

    #[tokio::test]
    async fn test_only_flagged_rows_are_reviewed() {
        let rows = vec![
            direct("ok", "1 + 1", "2"),
            direct("broken", "(1 +", "0x3"),
            direct("defaulted", "lineItem.GONE.Value + 1", "1"),
            direct("unknown", "frob(1)", "1"),
        ];
        let results = evaluate_rows(&rows, &AttributeTable::default());
        let reviewer = ScriptedReviewer {
            replies: vec![("broken", "0x3"), ("defaulted", "no idea")],
            seen: Mutex::new(vec![]),
        };

        let reviews = review_results(&reviewer, &rows, &results).await;

        assert_eq!(
            *reviewer.seen.lock().unwrap(),
            vec!["broken", "defaulted", "unknown"]
        );
        assert_eq!(reviews.len(), 3);
        assert_eq!(reviews[0].row, 1);
        assert_eq!(
            reviews[0].outcome,
            ReviewOutcome::Reviewed {
                value: "0x3".into(),
                matches_reported: true,
            }
        );
        assert_eq!(
            reviews[1].outcome,
            ReviewOutcome::Unparsed {
                reply: "no idea".into()
            }
        );
        assert!(matches!(reviews[2].outcome, ReviewOutcome::Failed { .. }));
        assert_eq!(results[1].status, EvaluationStatus::Error);
    }

    #[test]
    fn test_review_prompt_carries_row_context() {
        let row = EquationRow::new(
            EquationSource::TableLookup {
                selector: "SKU".into(),
            },
            "sku_mode",
            r#"{"HEDT":"1'h1"}"#,
            "0x1",
        );
        let results = evaluate_rows(&[row.clone()], &AttributeTable::default());
        let prompt = prompts::review_prompt(&row, &results[0]);
        assert!(prompt.contains("Fuse: sku_mode"));
        assert!(prompt.contains("lookup table keyed by SKU"));
        assert!(prompt.contains(r#"Equation: {"HEDT":"1'h1"}"#));
        assert!(prompt.contains("SKU: 0"));
    }
}
