//! Per-row evaluation pipeline: substitute, rewrite, normalize, evaluate,
//! compare.

use tracing::{debug, info, warn};

use crate::equations::compare::{compare_values, convert_to_decimal, normalize_hex_value};
use crate::equations::eval::{EvalError, Evaluator, Value};
use crate::equations::models::{
    AttributeTable, EquationRow, EquationSource, EvaluationResult, EvaluationStatus,
};
use crate::equations::normalize::{normalize_literals, rewrite_ternaries, substitute_attributes};
use crate::equations::parser::{parse, parse_lookup_table, Expr, ParseError};

/// Characters that mark text as an expression rather than a literal.
const OPERATOR_CHARS: &[char] = &[
    '+', '-', '*', '/', '%', '<', '>', '=', '!', '&', '|', '^', '(', ')', '?', ':', ',',
];

/// Longest substituted equation text the pipeline will process.
pub const MAX_EQUATION_LEN: usize = 16 * 1024;

#[derive(Debug)]
enum Failure {
    Parse(ParseError),
    Eval(EvalError),
    NoSelector,
    TooLong(usize),
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Parse(e) => write!(f, "{e}"),
            Failure::Eval(e) => write!(f, "{e}"),
            Failure::NoSelector => f.write_str("lookup table has no selector attribute"),
            Failure::TooLong(len) => write!(
                f,
                "equation is {len} bytes, longer than the {MAX_EQUATION_LEN}-byte limit"
            ),
        }
    }
}

impl From<ParseError> for Failure {
    fn from(e: ParseError) -> Self {
        Failure::Parse(e)
    }
}

impl From<EvalError> for Failure {
    fn from(e: EvalError) -> Self {
        Failure::Eval(e)
    }
}

fn is_literal_pass_through(text: &str) -> bool {
    let lower = text.trim_start().to_ascii_lowercase();
    !text.contains(OPERATOR_CHARS)
        && !lower.starts_with("lineitem")
        && !lower.starts_with("dec2hex")
}

fn evaluate_text(
    text: &str,
    selector: Option<&str>,
    attributes: &AttributeTable,
) -> Result<Value, Failure> {
    let trimmed = text.trim();
    let evaluator = Evaluator::new(attributes);

    if trimmed.is_empty() {
        return Err(ParseError::Empty.into());
    }
    if trimmed.starts_with('{') {
        let entries = parse_lookup_table(trimmed)?;
        let selector = selector.ok_or(Failure::NoSelector)?;
        let expr = Expr::TableLookup {
            entries,
            selector: Box::new(Expr::AttributeRef(selector.to_string())),
        };
        return Ok(evaluator.eval(&expr)?);
    }

    if is_literal_pass_through(trimmed) {
        return Ok(Value::Text(trimmed.to_string()));
    }

    Ok(evaluator.eval(&parse(trimmed)?)?)
}

/// Whether an evaluated value denotes the reported one.
fn value_matches(value: &Value, reported: &str) -> bool {
    match value {
        Value::Text(s) => compare_values(s, reported),
        Value::Bool(b) if reported.trim().eq_ignore_ascii_case(&b.to_string()) => true,
        _ => {
            if let (Some(a), Some(b)) = (value.canonical_hex(), normalize_hex_value(reported)) {
                if a == b {
                    return true;
                }
            }
            match (value.as_number().ok(), convert_to_decimal(reported)) {
                (Some(a), Some(b)) => (a - b).abs() < 1e-9,
                _ => false,
            }
        }
    }
}

/// Evaluates one row against the attribute table. Never fails: parse and
/// evaluation problems are reported through the result's status.
pub fn evaluate_row(row: &EquationRow, attributes: &AttributeTable) -> EvaluationResult {
    let substitution = substitute_attributes(&row.raw_equation, attributes);

    let mut attribute_values = substitution.used;
    let mut missing = substitution.missing;
    let selector = match &row.source {
        EquationSource::TableLookup { selector } => Some(selector.as_str()),
        EquationSource::DirectAssignment => row.attribute_refs().first().map(String::as_str),
    };
    if let EquationSource::TableLookup { selector } = &row.source {
        if !attribute_values.iter().any(|v| v.starts_with(&format!("{selector}: "))) {
            match attributes.stringify(selector) {
                Some(value) => attribute_values.push(format!("{selector}: {value}")),
                None => {
                    attribute_values.push(format!("{selector}: 0"));
                    missing.push(selector.clone());
                }
            }
        }
    }

    let defaulted = if missing.is_empty() {
        String::new()
    } else {
        format!("Attribute(s) {} not found, defaulted to 0. ", missing.join(", "))
    };

    let (processed, outcome) = if substitution.text.len() > MAX_EQUATION_LEN {
        (String::new(), Err(Failure::TooLong(substitution.text.len())))
    } else {
        let processed = normalize_literals(&rewrite_ternaries(&substitution.text));
        let outcome = evaluate_text(&processed, selector, attributes);
        (processed, outcome)
    };

    let (calculated_value, matches_reported, status, explanation) = match outcome {
        Ok(value) => {
            let calculated = value.to_string();
            let matches = value_matches(&value, &row.reported_value);
            let status = if missing.is_empty() {
                EvaluationStatus::Success
            } else {
                EvaluationStatus::Warning
            };
            let explanation = format!(
                "{defaulted}Evaluated `{processed}` to {calculated}; reported {} ({}).",
                row.reported_value,
                if matches { "match" } else { "mismatch" }
            );
            (calculated, matches, status, explanation)
        }
        Err(Failure::Eval(EvalError::KeyNotFound(key))) => {
            let calculated = format!("Key '{key}' not found");
            let explanation = format!(
                "{defaulted}Lookup table has no entry for '{key}'; reported {}.",
                row.reported_value
            );
            (calculated, false, EvaluationStatus::Warning, explanation)
        }
        Err(failure) => {
            let explanation = format!("{defaulted}Could not evaluate `{processed}`: {failure}.");
            (
                format!("ERROR: {failure}"),
                false,
                EvaluationStatus::Error,
                explanation,
            )
        }
    };

    debug!(
        target_name = %row.target_name,
        calculated = %calculated_value,
        ?status,
        "Evaluated equation"
    );

    EvaluationResult {
        target_name: row.target_name.clone(),
        calculated_value,
        matches_reported,
        explanation,
        status,
        processed_equation: processed,
        attribute_values,
    }
}

/// Evaluates every row independently, in input order.
pub fn evaluate_rows(rows: &[EquationRow], attributes: &AttributeTable) -> Vec<EvaluationResult> {
    info!(
        rows = rows.len(),
        attributes = attributes.len(),
        "Evaluating equations"
    );
    if attributes.is_empty() && rows.iter().any(|r| !r.attribute_refs().is_empty()) {
        warn!("Attribute table is empty; every placeholder will default to 0");
    }
    rows.iter().map(|row| evaluate_row(row, attributes)).collect()
}
