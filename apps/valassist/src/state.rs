use std::sync::Arc;

use crate::catalog::RecordFetcher;
use crate::config::Config;
use crate::equations::review::EquationReviewer;
use crate::summary::Summarizer;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<RecordFetcher>,
    /// Pluggable summarizer. Default: LlmSummarizer.
    pub summarizer: Arc<dyn Summarizer>,
    /// Model review of flagged equation rows. Default: LlmReviewer.
    pub reviewer: Arc<dyn EquationReviewer>,
    pub config: Config,
}
