//! Batch summarization through a pluggable, trait-based seam around the LLM client.
//!
//! `AppState` holds an `Arc<dyn Summarizer>`; the default is `LlmSummarizer`.

pub mod handlers;
pub mod prompts;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::models::Batch;
use crate::llm_client::{ChatMessage, LlmClient, LlmError};

// ────────────────────────────────────────────────────────────────────────────
// Trait definition
// ────────────────────────────────────────────────────────────────────────────

/// Produces a free-text summary for one batch of records.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, batch: &Batch) -> Result<String, LlmError>;
}

// ────────────────────────────────────────────────────────────────────────────
// LlmSummarizer: default implementation
// ────────────────────────────────────────────────────────────────────────────

pub struct LlmSummarizer {
    client: LlmClient,
}

impl LlmSummarizer {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, batch: &Batch) -> Result<String, LlmError> {
        let messages = [
            ChatMessage::system(prompts::SUMMARY_SYSTEM),
            ChatMessage::user(prompts::batch_prompt(batch)?),
        ];
        let completion = self.client.chat(&messages).await?;
        let total = self.client.total_usage();
        info!(
            batch = batch.index,
            model = self.client.model(),
            tokens = completion.usage.total_tokens,
            cumulative_tokens = total.total_tokens,
            "Summarized batch"
        );
        Ok(completion.text)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Batch driver
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SummaryOutcome {
    Summarized { text: String },
    Failed { error: String },
    /// The batch had no records to summarize.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_index: usize,
    pub total_batches: usize,
    pub record_count: usize,
    pub outcome: SummaryOutcome,
}

/// Summarizes each batch in order. A failing batch is recorded and the run
/// continues with the next one.
pub async fn summarize_batches(summarizer: &dyn Summarizer, batches: &[Batch]) -> Vec<BatchSummary> {
    let mut summaries = Vec::with_capacity(batches.len());

    for batch in batches {
        let outcome = if batch.records.is_empty() {
            SummaryOutcome::Skipped
        } else {
            match summarizer.summarize(batch).await {
                Ok(text) => SummaryOutcome::Summarized { text },
                Err(e) => {
                    warn!(batch = batch.index, error = %e, "Batch summarization failed");
                    SummaryOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            }
        };
        summaries.push(BatchSummary {
            batch_index: batch.index,
            total_batches: batch.total_batches,
            record_count: batch.records.len(),
            outcome,
        });
    }

    summaries
}
