//! RecordFetcher: single-record, query, and batched retrieval from the catalog.
//!
//! Every record gets its own retry budget. Batches are best effort: an ID that
//! cannot be resolved is logged and reported in the batch's `failures`, and the
//! run moves on to the next ID.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::catalog::errors::FetchError;
use crate::catalog::models::{partition_ids, Batch, FetchFailure, Record, DEFAULT_FIELDS};
use crate::catalog::retry::{with_retry, RetryPolicy};
use crate::catalog::transport::CatalogTransport;

#[derive(Clone)]
pub struct RecordFetcher {
    transport: Arc<dyn CatalogTransport>,
    policy: RetryPolicy,
    batch_fields: Vec<String>,
}

impl RecordFetcher {
    pub fn new(transport: Arc<dyn CatalogTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            batch_fields: DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn with_batch_fields(mut self, fields: Vec<String>) -> Self {
        self.batch_fields = fields;
        self
    }

    /// Fetches one record. `fields` restricts the response; `None` or an empty
    /// list asks for every field.
    pub async fn fetch_one(&self, id: &str, fields: Option<&[String]>) -> Result<Record, FetchError> {
        let id = checked_id("record id", id)?;

        let mut query = Vec::new();
        if let Some(fields) = fields.filter(|f| !f.is_empty()) {
            query.push(("fields", fields.join(",")));
        }

        let path = format!("article/{id}");
        let body = self.get_with_retry(&path, &query, &format!("record {id}")).await?;
        extract_first_record(&body, id)
    }

    /// Resolves a saved query to its ordered list of record IDs.
    ///
    /// The first call reads the match count; the second is only issued when the
    /// count is positive and asks for that many results.
    pub async fn fetch_ids_for_query(&self, query_id: &str) -> Result<Vec<String>, FetchError> {
        let query_id = checked_id("query id", query_id)?;

        let path = format!("query/execution/{query_id}");
        let label = format!("query {query_id}");

        let head = self.get_with_retry(&path, &[], &label).await?;
        let total = head
            .get("total")
            .and_then(Value::as_i64)
            .ok_or_else(|| FetchError::Malformed(format!("{label}: missing integer 'total'")))?;

        if total <= 0 {
            info!("{label}: no matching records");
            return Ok(Vec::new());
        }
        info!("{label}: {total} matching records");

        let full = self
            .get_with_retry(&path, &[("max_results", total.to_string())], &label)
            .await?;
        let rows = full
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| FetchError::Malformed(format!("{label}: missing 'data' array")))?;

        rows.iter()
            .map(|row| match row.get("id") {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(Value::Number(n)) => Ok(n.to_string()),
                _ => Err(FetchError::Malformed(format!("{label}: row without 'id'"))),
            })
            .collect()
    }

    /// Partitions `ids` into batches of `batch_size` and fetches every ID.
    pub async fn fetch_batch(&self, ids: &[String], batch_size: usize) -> Result<Vec<Batch>, FetchError> {
        if ids.is_empty() {
            return Err(FetchError::InvalidArgument(
                "ids must be a non-empty list".to_string(),
            ));
        }
        if batch_size == 0 {
            return Err(FetchError::InvalidArgument(
                "batch_size must be greater than zero".to_string(),
            ));
        }

        let chunks = partition_ids(ids, batch_size);
        let total_batches = chunks.len();
        info!(
            "Processing {} records in {total_batches} batches of up to {batch_size}",
            ids.len()
        );

        let mut batches = Vec::with_capacity(total_batches);
        for (i, chunk) in chunks.into_iter().enumerate() {
            let index = i + 1;
            let mut records = Vec::with_capacity(chunk.len());
            let mut failures = Vec::new();

            for id in &chunk {
                match self.fetch_one(id, Some(self.batch_fields.as_slice())).await {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        warn!("Batch {index}/{total_batches}: dropping record {id}: {e}");
                        failures.push(FetchFailure {
                            id: id.clone(),
                            kind: e.kind(),
                            message: e.to_string(),
                        });
                    }
                }
            }

            info!(
                "Batch {index}/{total_batches} complete: {} fetched, {} failed",
                records.len(),
                failures.len()
            );
            batches.push(Batch {
                index,
                total_batches,
                requested_ids: chunk,
                records,
                failures,
            });
        }

        Ok(batches)
    }

    async fn get_with_retry(
        &self,
        path: &str,
        query: &[(&str, String)],
        label: &str,
    ) -> Result<Value, FetchError> {
        let transport = self.transport.as_ref();
        with_retry(&self.policy, label, move |_| transport.get_json(path, query)).await
    }
}

/// Ids become a single path segment, so only `[A-Za-z0-9_-]` is accepted.
fn checked_id<'a>(what: &str, id: &'a str) -> Result<&'a str, FetchError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(FetchError::InvalidArgument(format!("{what} must not be empty")));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(FetchError::InvalidArgument(format!(
            "{what} '{id}' may only contain letters, digits, '_' and '-'"
        )));
    }
    Ok(id)
}

/// Pulls the record out of a `{"data": ...}` envelope.
///
/// A missing or empty `data` is a definitive not-found, not a retryable fault.
fn extract_first_record(body: &Value, id: &str) -> Result<Record, FetchError> {
    let item = match body.get("data") {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => items.first(),
        Some(obj @ Value::Object(_)) => Some(obj),
        Some(other) => {
            return Err(FetchError::Malformed(format!(
                "record {id}: unexpected 'data' value {other}"
            )))
        }
    };

    let item = item.ok_or_else(|| FetchError::NotFound(format!("record {id}: no data returned")))?;
    let mut record: Record = serde_json::from_value(item.clone())
        .map_err(|e| FetchError::Malformed(format!("record {id}: {e}")))?;
    if record.id.is_empty() {
        record.id = id.to_string();
    }
    Ok(record)
}
