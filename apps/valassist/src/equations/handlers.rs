use std::collections::HashMap;

use anyhow::Context;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::equations::evaluator::evaluate_rows;
use crate::equations::extract::{attach_reported, extract_equations, ExtractedEquation};
use crate::equations::models::{
    AttributeTable, EquationRow, EquationSource, EvaluationResult,
};
use crate::equations::review::{review_results, RowReview};
use crate::equations::summary::RunSummary;
use crate::errors::AppError;
use crate::state::AppState;

/// Accepts either a flat `name -> value` object or an attribute export with
/// a `collections` array.
fn attribute_table(value: &Value) -> Result<AttributeTable, AppError> {
    if value.get("collections").is_some() {
        return Ok(AttributeTable::from_export(value));
    }
    match value {
        Value::Object(map) => Ok(AttributeTable::new(
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<HashMap<_, _>>(),
        )),
        Value::Null => Ok(AttributeTable::default()),
        _ => Err(AppError::Validation(
            "attributes must be an object or an attribute export".to_string(),
        )),
    }
}

fn default_source() -> EquationSource {
    EquationSource::DirectAssignment
}

#[derive(Deserialize)]
pub struct RowInput {
    #[serde(default = "default_source")]
    pub source: EquationSource,
    pub target_name: String,
    pub equation: String,
    pub reported_value: Option<String>,
}

#[derive(Deserialize)]
pub struct EvaluateRequest {
    pub rows: Vec<RowInput>,
    #[serde(default)]
    pub attributes: Value,
    /// Send Warning and Error rows to the model reviewer.
    #[serde(default)]
    pub review: bool,
}

#[derive(Serialize)]
pub struct EvaluateResponse {
    pub results: Vec<EvaluationResult>,
    pub summary: RunSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviews: Option<Vec<RowReview>>,
}

/// Evaluation is CPU-bound, so it runs on the blocking pool.
async fn evaluate(
    state: &AppState,
    rows: Vec<EquationRow>,
    attributes: AttributeTable,
    review: bool,
) -> Result<EvaluateResponse, AppError> {
    let (rows, results) = tokio::task::spawn_blocking(move || {
        let results = evaluate_rows(&rows, &attributes);
        (rows, results)
    })
    .await
    .context("equation evaluation task failed")?;

    let summary = RunSummary::from_results(&results);
    let reviews = if review {
        Some(review_results(state.reviewer.as_ref(), &rows, &results).await)
    } else {
        None
    };
    Ok(EvaluateResponse {
        results,
        summary,
        reviews,
    })
}

/// POST /api/v1/equations/evaluate
pub async fn handle_evaluate(
    State(state): State<AppState>,
    Json(req): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>, AppError> {
    let attributes = attribute_table(&req.attributes)?;
    let rows: Vec<EquationRow> = req
        .rows
        .into_iter()
        .map(|r| {
            EquationRow::new(
                r.source,
                r.target_name,
                r.equation,
                r.reported_value
                    .unwrap_or_else(|| crate::equations::extract::NOT_AVAILABLE.to_string()),
            )
        })
        .collect();
    Ok(Json(evaluate(&state, rows, attributes, req.review).await?))
}

#[derive(Deserialize)]
pub struct ExtractRequest {
    pub rule_text: String,
    /// Reported fuse values keyed by target name.
    #[serde(default)]
    pub reported: HashMap<String, String>,
    /// When present, the extracted rows are evaluated against these attributes.
    pub attributes: Option<Value>,
    #[serde(default)]
    pub review: bool,
}

#[derive(Serialize)]
pub struct ExtractResponse {
    pub equations: Vec<ExtractedEquation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluateResponse>,
}

/// POST /api/v1/equations/extract
pub async fn handle_extract(
    State(state): State<AppState>,
    Json(req): Json<ExtractRequest>,
) -> Result<Json<ExtractResponse>, AppError> {
    if req.rule_text.trim().is_empty() {
        return Err(AppError::Validation("rule_text must not be empty".to_string()));
    }
    let equations = extract_equations(&req.rule_text);

    let evaluation = match &req.attributes {
        Some(value) => {
            let attributes = attribute_table(value)?;
            let rows = attach_reported(equations.clone(), &req.reported);
            Some(evaluate(&state, rows, attributes, req.review).await?)
        }
        None => None,
    };

    Ok(Json(ExtractResponse {
        equations,
        evaluation,
    }))
}
