use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::catalog::models::BatchRunSummary;
use crate::errors::AppError;
use crate::state::AppState;
use crate::summary::{summarize_batches, BatchSummary};

#[derive(Deserialize)]
pub struct SummarizeRequest {
    pub ids: Vec<String>,
    pub batch_size: Option<usize>,
}

#[derive(Serialize)]
pub struct SummarizeResponse {
    pub fetch: BatchRunSummary,
    pub summaries: Vec<BatchSummary>,
}

/// POST /api/v1/records/summarize
pub async fn handle_summarize(
    State(state): State<AppState>,
    Json(req): Json<SummarizeRequest>,
) -> Result<Json<SummarizeResponse>, AppError> {
    let batch_size = req.batch_size.unwrap_or(state.config.fetch_batch_size);
    let batches = state.fetcher.fetch_batch(&req.ids, batch_size).await?;
    let summaries = summarize_batches(state.summarizer.as_ref(), &batches).await;
    Ok(Json(SummarizeResponse {
        fetch: BatchRunSummary::from_batches(&batches),
        summaries,
    }))
}
