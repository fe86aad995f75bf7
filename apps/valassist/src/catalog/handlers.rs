use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::catalog::export::write_batch_files;
use crate::catalog::models::{Batch, BatchRunSummary, Record};
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct FieldsQuery {
    /// Comma-separated field list, e.g. `fields=title,status`.
    pub fields: Option<String>,
}

fn split_fields(raw: Option<&str>) -> Option<Vec<String>> {
    let fields: Vec<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    (!fields.is_empty()).then_some(fields)
}

/// GET /api/v1/records/:id
pub async fn handle_get_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<FieldsQuery>,
) -> Result<Json<Record>, AppError> {
    let fields = split_fields(params.fields.as_deref());
    let record = state.fetcher.fetch_one(&id, fields.as_deref()).await?;
    Ok(Json(record))
}

#[derive(Deserialize)]
pub struct BatchRequest {
    pub ids: Vec<String>,
    pub batch_size: Option<usize>,
    /// Also write one JSON file per batch under `BATCH_EXPORT_DIR`.
    #[serde(default)]
    pub export: bool,
}

#[derive(Serialize)]
pub struct BatchResponse {
    pub summary: BatchRunSummary,
    pub batches: Vec<Batch>,
    pub exported: Vec<String>,
}

/// POST /api/v1/records/batch
pub async fn handle_fetch_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, AppError> {
    let export_dir = match (req.export, &state.config.batch_export_dir) {
        (false, _) => None,
        (true, Some(dir)) => Some(dir.clone()),
        (true, None) => {
            return Err(AppError::Validation(
                "export requested but BATCH_EXPORT_DIR is not configured".to_string(),
            ))
        }
    };

    let batch_size = req.batch_size.unwrap_or(state.config.fetch_batch_size);
    let batches = state.fetcher.fetch_batch(&req.ids, batch_size).await?;

    let exported = match export_dir {
        Some(dir) => write_batch_files(&dir, &batches)?
            .into_iter()
            .map(|p| p.display().to_string())
            .collect(),
        None => Vec::new(),
    };

    Ok(Json(BatchResponse {
        summary: BatchRunSummary::from_batches(&batches),
        batches,
        exported,
    }))
}

#[derive(Serialize)]
pub struct QueryIdsResponse {
    pub query_id: String,
    pub count: usize,
    pub ids: Vec<String>,
}

/// GET /api/v1/queries/:query_id/ids
pub async fn handle_query_ids(
    State(state): State<AppState>,
    Path(query_id): Path<String>,
) -> Result<Json<QueryIdsResponse>, AppError> {
    let ids = state.fetcher.fetch_ids_for_query(&query_id).await?;
    Ok(Json(QueryIdsResponse {
        query_id,
        count: ids.len(),
        ids,
    }))
}
