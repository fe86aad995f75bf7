use serde::{Deserialize, Deserializer, Serialize};

use crate::catalog::errors::FetchErrorKind;

/// Fields requested for every record in a batch fetch.
pub const DEFAULT_FIELDS: &[&str] = &["id", "title", "description", "status", "comments"];

/// A read-only snapshot of one catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Empty when the catalog left `id` out of a restricted field list.
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub title: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub description: String,
    /// Opaque status string as reported by the service.
    #[serde(default, deserialize_with = "deserialize_text")]
    pub status: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub comments: String,
    /// Any other field the caller asked for.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The catalog returns ids as numbers on some endpoints and strings on others.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "record id must be a string or number, got {other}"
        ))),
    }
}

fn deserialize_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

/// An ID that could not be resolved while building a batch.
#[derive(Debug, Clone, Serialize)]
pub struct FetchFailure {
    pub id: String,
    pub kind: FetchErrorKind,
    pub message: String,
}

/// One contiguous, best-effort chunk of the requested IDs.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    /// 1-based position of this batch in the run.
    pub index: usize,
    pub total_batches: usize,
    pub requested_ids: Vec<String>,
    pub records: Vec<Record>,
    pub failures: Vec<FetchFailure>,
}

impl Batch {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Per-item success/failure counts across a batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchRunSummary {
    pub batches: usize,
    /// Batches in which every requested ID was fetched.
    pub complete_batches: usize,
    pub requested: usize,
    pub fetched: usize,
    pub failed: usize,
}

impl BatchRunSummary {
    pub fn from_batches(batches: &[Batch]) -> Self {
        batches.iter().fold(
            BatchRunSummary {
                batches: batches.len(),
                ..Default::default()
            },
            |mut acc, batch| {
                acc.complete_batches += usize::from(batch.is_complete());
                acc.requested += batch.requested_ids.len();
                acc.fetched += batch.records.len();
                acc.failed += batch.failures.len();
                acc
            },
        )
    }
}

/// Splits `ids` into contiguous chunks of at most `batch_size`, preserving order.
pub fn partition_ids(ids: &[String], batch_size: usize) -> Vec<Vec<String>> {
    if batch_size == 0 {
        return Vec::new();
    }
    ids.chunks(batch_size).map(|c| c.to_vec()).collect()
}
