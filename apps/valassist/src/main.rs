mod catalog;
mod config;
mod equations;
mod errors;
mod llm_client;
mod routes;
mod state;
mod summary;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::catalog::{CatalogAuth, HttpCatalogTransport, RecordFetcher};
use crate::config::Config;
use crate::equations::review::LlmReviewer;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;
use crate::summary::LlmSummarizer;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting valassist v{}", env!("CARGO_PKG_VERSION"));

    // Initialize catalog fetcher
    let auth = match &config.catalog_token {
        Some(token) => CatalogAuth::Bearer(token.clone()),
        None => CatalogAuth::Delegated,
    };
    let transport = HttpCatalogTransport::new(
        HttpCatalogTransport::default_client()?,
        config.catalog_base_url.clone(),
        auth,
    );
    let policy = config.retry_policy();
    info!(
        "Catalog client initialized ({}, up to {} attempts per record)",
        config.catalog_base_url, policy.max_attempts
    );
    let mut fetcher = RecordFetcher::new(Arc::new(transport), policy);
    if let Some(fields) = &config.fetch_batch_fields {
        fetcher = fetcher.with_batch_fields(fields.clone());
    }
    let fetcher = Arc::new(fetcher);

    // Initialize LLM client
    let llm = LlmClient::new(
        &config.llm_api_url,
        config.llm_api_key.clone(),
        config.llm_model.clone(),
    )?;
    info!("LLM client initialized (model: {})", llm.model());

    // Build app state
    let state = AppState {
        fetcher,
        reviewer: Arc::new(LlmReviewer::new(llm.clone())),
        summarizer: Arc::new(LlmSummarizer::new(llm)),
        config: config.clone(),
    };

    // Build router
    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
