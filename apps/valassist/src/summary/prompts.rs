use crate::catalog::models::Batch;

pub const SUMMARY_SYSTEM: &str = "You summarize batches of catalog records. \
    Be concise. Refer to records by their id.";

/// The user message for one batch: the batch's records as pretty JSON.
pub fn batch_prompt(batch: &Batch) -> Result<String, serde_json::Error> {
    let records = serde_json::to_string_pretty(&batch.records)?;
    Ok(format!(
        "Batch {} of {} ({} records):\n{}",
        batch.index,
        batch.total_batches,
        batch.records.len(),
        records
    ))
}
