use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde_json::json;
use tracing::info;

use crate::catalog::models::Batch;

/// Writes each batch to its own `{"data": [...]}` JSON file under `dir`.
///
/// File names carry the batch position, record count, and a timestamp so that
/// several runs can share one directory.
pub fn write_batch_files(dir: &Path, batches: &[Batch]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create batch directory {}", dir.display()))?;

    let timestamp = Local::now().format("%Y%m%d%H%M%S");
    let mut paths = Vec::with_capacity(batches.len());

    for batch in batches {
        let file_name = format!(
            "record_batch_{}_of_{}_{}records_{timestamp}.json",
            batch.index,
            batch.total_batches,
            batch.records.len()
        );
        let path = dir.join(file_name);
        let body = serde_json::to_string_pretty(&json!({ "data": batch.records }))?;
        fs::write(&path, body).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Saved batch {}/{} to {}", batch.index, batch.total_batches, path.display());
        paths.push(path);
    }

    Ok(paths)
}
